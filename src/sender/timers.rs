use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::trace;
use crate::seq_num::SeqNum;

/// Retransmission deadlines, one per unacknowledged sequence number.
///
/// There are no timer tasks: the session's event loop sleeps until [RetransmissionTimers::next_deadline]
///  and then asks for the [RetransmissionTimers::expired] sequence numbers. Since arming, disarming and
///  expiry are all done by the same task, a timer can not fire concurrently with the acknowledgement
///  that disarms it.
pub struct RetransmissionTimers {
    timeout: Duration,
    deadlines: FxHashMap<SeqNum, Instant>,
}

impl RetransmissionTimers {
    pub fn new(timeout: Duration) -> RetransmissionTimers {
        RetransmissionTimers {
            timeout,
            deadlines: FxHashMap::default(),
        }
    }

    /// (re)start the timer for a sequence number, replacing a previous deadline
    pub fn arm(&mut self, seq: SeqNum, now: Instant) {
        let deadline = now + self.timeout;
        trace!("arming timer for #{}", seq);
        self.deadlines.insert(seq, deadline);
    }

    pub fn disarm(&mut self, seq: SeqNum) -> bool {
        self.deadlines.remove(&seq).is_some()
    }

    pub fn disarm_range(&mut self, from: SeqNum, to: SeqNum) {
        for seq in from.range_to(to) {
            self.deadlines.remove(&seq);
        }
    }

    pub fn disarm_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, seq: SeqNum) -> bool {
        self.deadlines.contains_key(&seq)
    }

    pub fn is_expired(&self, seq: SeqNum, now: Instant) -> bool {
        self.deadlines.get(&seq)
            .map(|&deadline| deadline <= now)
            .unwrap_or(false)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().cloned()
    }

    /// all sequence numbers whose deadline has passed, in ascending order
    pub fn expired(&self, now: Instant) -> Vec<SeqNum> {
        let mut result = self.deadlines.iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(&seq, _)| seq)
            .collect::<Vec<_>>();
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn seq(raw: u64) -> SeqNum {
        SeqNum::from_raw(raw)
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_and_expire() {
        let mut timers = RetransmissionTimers::new(Duration::from_secs(1));
        assert!(timers.next_deadline().is_none());

        let start = Instant::now();
        timers.arm(seq(0), start);
        tokio::time::advance(Duration::from_millis(400)).await;
        timers.arm(seq(1), Instant::now());

        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(1)));
        assert!(timers.expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(timers.expired(Instant::now()), vec![seq(0)]);
        assert!(timers.is_expired(seq(0), Instant::now()));
        assert!(!timers.is_expired(seq(1), Instant::now()));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(timers.expired(Instant::now()), vec![seq(0), seq(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut timers = RetransmissionTimers::new(Duration::from_secs(1));
        timers.arm(seq(3), Instant::now());

        tokio::time::advance(Duration::from_millis(900)).await;
        let rearmed = Instant::now();
        timers.arm(seq(3), rearmed);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!timers.is_expired(seq(3), Instant::now()));
        assert_eq!(timers.next_deadline(), Some(rearmed + Duration::from_secs(1)));
    }

    #[rstest]
    #[case::single(vec![0, 1, 2], 1, 2, vec![0, 2])]
    #[case::all(vec![0, 1, 2], 0, 3, vec![])]
    #[case::none(vec![0, 1, 2], 3, 5, vec![0, 1, 2])]
    #[case::partial_overlap(vec![2, 3, 4], 0, 3, vec![4])]
    fn test_disarm_range(#[case] armed: Vec<u64>, #[case] from: u64, #[case] to: u64, #[case] expected: Vec<u64>) {
        let now = Instant::now();
        let mut timers = RetransmissionTimers::new(Duration::from_secs(1));
        for s in armed {
            timers.arm(seq(s), now);
        }

        timers.disarm_range(seq(from), seq(to));

        let mut remaining = timers.expired(now + Duration::from_secs(1));
        remaining.sort();
        assert_eq!(remaining, expected.into_iter().map(seq).collect::<Vec<_>>());
    }

    #[test]
    fn test_disarm() {
        let now = Instant::now();
        let mut timers = RetransmissionTimers::new(Duration::from_secs(1));
        timers.arm(seq(5), now);

        assert!(timers.is_armed(seq(5)));
        assert!(timers.disarm(seq(5)));
        assert!(!timers.is_armed(seq(5)));
        assert!(!timers.disarm(seq(5)));
        assert!(!timers.is_expired(seq(5), now + Duration::from_secs(10)));
        assert!(timers.next_deadline().is_none());
    }
}
