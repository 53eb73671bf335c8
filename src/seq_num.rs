use std::fmt::{Display, Formatter};
use std::ops::Add;
use serde::{Deserialize, Serialize};

/// Sequence number of a data packet. Sequence numbers are assigned by the sender when a message
///  is fragmented, and they increase monotonically for the lifetime of a session.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNum(u64);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> SeqNum {
        *self + 1
    }

    /// the number of sequence numbers from `other` (incl) up to `self` (excl), or `None` if
    ///  `other` is greater than `self`
    pub fn distance_from(&self, other: SeqNum) -> Option<u64> {
        self.0.checked_sub(other.0)
    }

    /// iterate over all sequence numbers from `self` (incl) to `end` (excl)
    pub fn range_to(self, end: SeqNum) -> impl Iterator<Item = SeqNum> {
        (self.0..end.0).map(SeqNum)
    }
}

impl Add<u64> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u64) -> SeqNum {
        // 2^64 packets of at least one byte each will not be sent in a single session
        SeqNum(self.0.saturating_add(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 0, Some(0))]
    #[case::one(5, 4, Some(1))]
    #[case::many(100, 3, Some(97))]
    #[case::negative(3, 4, None)]
    fn test_distance_from(#[case] this: u64, #[case] other: u64, #[case] expected: Option<u64>) {
        assert_eq!(SeqNum::from_raw(this).distance_from(SeqNum::from_raw(other)), expected);
    }

    #[rstest]
    #[case::empty(3, 3, vec![])]
    #[case::single(3, 4, vec![3])]
    #[case::several(0, 3, vec![0, 1, 2])]
    #[case::inverted(5, 2, vec![])]
    fn test_range_to(#[case] from: u64, #[case] to: u64, #[case] expected: Vec<u64>) {
        let actual = SeqNum::from_raw(from).range_to(SeqNum::from_raw(to))
            .map(|s| s.to_raw())
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_serialized_as_plain_number() {
        assert_eq!(serde_json::to_string(&SeqNum::from_raw(17)).unwrap(), "17");
        assert_eq!(serde_json::from_str::<SeqNum>("4").unwrap(), SeqNum::from_raw(4));
    }
}
