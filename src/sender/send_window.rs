use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::checksum::checksum;
use crate::config::TransferConfig;
use crate::encryption::PayloadCipher;
use crate::error::ArqError;
use crate::fault_injection::{corrupt_checksum, Fault, FaultPlan};
use crate::handshake::SessionParameters;
use crate::packet::{DataPacket, OperationMode, Packet};
use crate::packet_sink::PacketSink;
use crate::sender::timers::RetransmissionTimers;
use crate::seq_num::SeqNum;
use crate::util::safe_converter::SafeCast;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendState {
    /// there are unsent fragments, and the window has room for at least one of them
    Filling,
    /// either all fragments are sent, or the window is full
    AwaitingAcks,
    /// all fragments are acknowledged
    Done,
}

/// Statistics for a message after all of its fragments were acknowledged
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendReport {
    pub fragments: u64,
    /// all transmissions including retransmissions. A first transmission that was suppressed by
    ///  fault injection counts as a transmission.
    pub transmissions: u64,
    /// sequence numbers in the order in which they were retransmitted, with repetitions
    pub retransmitted: Vec<SeqNum>,
    pub elapsed: Duration,
}

struct SentPacket {
    /// always with the correct checksum, even if the first transmission was corrupted on purpose
    packet: DataPacket,
    transmissions: u32,
}

/// The sending side's window for a single message.
///
/// The message is split into fragments of `payload_unit_size` characters each, numbered
///  consecutively starting at `first_seq`. At most `window_size` fragments are in flight (i.e. sent
///  but not acknowledged) at any given time, and the window slides only over a contiguous prefix of
///  acknowledged fragments.
///
/// All operations are driven by the session's event loop, so there is no internal locking.
pub struct SendWindow {
    mode: OperationMode,
    window_size: u64,
    cipher: Option<Arc<dyn PayloadCipher>>,
    fault_plan: FaultPlan,
    max_retransmissions: Option<u32>,

    fragments: Vec<String>,
    first_seq: SeqNum,

    /// lowest unacknowledged sequence number
    base_seq: SeqNum,
    next_seq_to_send: SeqNum,
    sent_packets: BTreeMap<SeqNum, SentPacket>,
    /// acknowledged sequence numbers at or above `base_seq`
    acknowledged: BTreeSet<SeqNum>,
    timers: RetransmissionTimers,

    transmissions: u64,
    retransmitted: Vec<SeqNum>,
    started: Instant,
}

impl SendWindow {
    pub fn new(message: &str, first_seq: SeqNum, params: &SessionParameters, transfer: &TransferConfig) -> Result<SendWindow, ArqError> {
        let len: u64 = message.chars().count().safe_cast();
        if len > params.max_message_size {
            return Err(ArqError::MessageTooLarge { len, max: params.max_message_size });
        }

        let fragments = fragment(message, transfer.payload_unit_size);
        debug!("sending message of {} characters as {} fragments, starting at #{}", len, fragments.len(), first_seq);

        Ok(SendWindow {
            mode: params.operation_mode,
            window_size: params.window_size.safe_cast(),
            cipher: params.cipher.clone(),
            fault_plan: transfer.fault_plan.clone(),
            max_retransmissions: transfer.max_retransmissions,
            fragments,
            first_seq,
            base_seq: first_seq,
            next_seq_to_send: first_seq,
            sent_packets: BTreeMap::default(),
            acknowledged: BTreeSet::default(),
            timers: RetransmissionTimers::new(transfer.retransmission_timeout),
            transmissions: 0,
            retransmitted: Vec::new(),
            started: Instant::now(),
        })
    }

    fn num_fragments(&self) -> u64 {
        self.fragments.len().safe_cast()
    }

    /// the first sequence number after this message
    pub fn end_seq(&self) -> SeqNum {
        self.first_seq + self.num_fragments()
    }

    pub fn state(&self) -> SendState {
        if self.base_seq >= self.end_seq() {
            SendState::Done
        }
        else if self.next_seq_to_send < self.end_seq() && self.next_seq_to_send < self.base_seq + self.window_size {
            SendState::Filling
        }
        else {
            SendState::AwaitingAcks
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == SendState::Done
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn report(&self) -> SendReport {
        SendReport {
            fragments: self.num_fragments(),
            transmissions: self.transmissions,
            retransmitted: self.retransmitted.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    fn build_packet(&self, seq: SeqNum) -> Result<DataPacket, ArqError> {
        let plaintext = seq.distance_from(self.first_seq)
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| self.fragments.get(idx))
            .ok_or_else(|| ArqError::InvalidParameters(format!("#{} is not part of the message", seq)))?;

        // the checksum is always calculated on the plaintext
        let plaintext_checksum = checksum(plaintext.as_bytes());
        let (payload, encrypted) = match &self.cipher {
            Some(cipher) => {
                let ciphertext = cipher.encrypt(plaintext)
                    .map_err(|e| ArqError::EncryptFailed { seq, reason: e.to_string() })?;
                (ciphertext, true)
            }
            None => (plaintext.clone(), false),
        };

        Ok(DataPacket {
            seq_num: seq,
            payload,
            checksum: plaintext_checksum,
            encrypted,
            total_fragments: Some(self.num_fragments()),
        })
    }

    /// Send all fragments that fit into the window
    pub async fn fill<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), ArqError> {
        while self.state() == SendState::Filling {
            let seq = self.next_seq_to_send;
            let packet = self.build_packet(seq)?;

            match self.fault_plan.fault_for(seq) {
                Some(Fault::Drop) => {
                    debug!("fault injection: not sending #{}", seq);
                }
                Some(Fault::Corrupt) => {
                    debug!("fault injection: sending #{} with a corrupted checksum", seq);
                    let mut corrupted = packet.clone();
                    corrupted.checksum = corrupt_checksum(packet.checksum);
                    sink.send_packet(&Packet::Data(corrupted)).await?;
                }
                None => {
                    trace!("sending #{}", seq);
                    sink.send_packet(&Packet::Data(packet.clone())).await?;
                }
            }

            self.sent_packets.insert(seq, SentPacket { packet, transmissions: 1 });
            self.transmissions += 1;
            self.timers.arm(seq, Instant::now());
            self.next_seq_to_send = seq.next();
        }
        Ok(())
    }

    pub async fn on_ack<S: PacketSink + ?Sized>(&mut self, seq: SeqNum, sink: &mut S) -> Result<(), ArqError> {
        if seq < self.base_seq || seq >= self.next_seq_to_send {
            debug!("ACK for #{} outside of the send window [{}, {}) - ignoring", seq, self.base_seq, self.next_seq_to_send);
            return Ok(());
        }
        if !self.acknowledged.insert(seq) {
            debug!("duplicate ACK for #{} - ignoring", seq);
            return Ok(());
        }
        trace!("ACK for #{}", seq);
        self.timers.disarm(seq);

        while self.acknowledged.remove(&self.base_seq) {
            self.sent_packets.remove(&self.base_seq);
            self.base_seq = self.base_seq.next();
        }

        self.fill(sink).await
    }

    pub async fn on_nack<S: PacketSink + ?Sized>(&mut self, seq: SeqNum, sink: &mut S) -> Result<(), ArqError> {
        if !self.is_outstanding(seq) {
            debug!("NACK for #{} which is not outstanding - ignoring", seq);
            return Ok(());
        }
        debug!("NACK for #{}", seq);

        match self.mode {
            OperationMode::GoBackN => self.retransmit_window(sink).await,
            OperationMode::SelectiveRepeat => self.retransmit(seq, sink).await,
        }
    }

    /// Handle all timers that expired at `now`. Retransmitting the whole window under Go-Back-N
    ///  re-arms timers that were part of the same batch, so each one is checked again before it
    ///  is handled.
    pub async fn on_timers_due<S: PacketSink + ?Sized>(&mut self, now: Instant, sink: &mut S) -> Result<(), ArqError> {
        for seq in self.timers.expired(now) {
            if self.timers.is_expired(seq, now) {
                self.on_timer_expired(seq, sink).await?;
            }
        }
        Ok(())
    }

    pub async fn on_timer_expired<S: PacketSink + ?Sized>(&mut self, seq: SeqNum, sink: &mut S) -> Result<(), ArqError> {
        if !self.timers.is_armed(seq) || !self.is_outstanding(seq) {
            trace!("timer for #{} is no longer relevant", seq);
            return Ok(());
        }
        debug!("timeout for #{}", seq);

        match self.mode {
            OperationMode::GoBackN => self.retransmit_window(sink).await,
            OperationMode::SelectiveRepeat => self.retransmit(seq, sink).await,
        }
    }

    fn is_outstanding(&self, seq: SeqNum) -> bool {
        self.sent_packets.contains_key(&seq) && !self.acknowledged.contains(&seq)
    }

    async fn retransmit_window<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), ArqError> {
        self.timers.disarm_range(self.base_seq, self.next_seq_to_send);

        for seq in self.base_seq.range_to(self.next_seq_to_send) {
            if !self.acknowledged.contains(&seq) {
                self.retransmit(seq, sink).await?;
            }
        }
        Ok(())
    }

    async fn retransmit<S: PacketSink + ?Sized>(&mut self, seq: SeqNum, sink: &mut S) -> Result<(), ArqError> {
        let Some(sent) = self.sent_packets.get_mut(&seq) else {
            return Ok(());
        };

        if let Some(max) = self.max_retransmissions {
            let attempts = sent.transmissions;
            if attempts > max {
                warn!("giving up on #{} after {} transmissions", seq, attempts);
                self.timers.disarm_all();
                return Err(ArqError::DeliveryFailed { seq, attempts });
            }
        }

        sent.transmissions += 1;
        trace!("retransmitting #{} (transmission #{})", seq, sent.transmissions);
        let packet = Packet::Data(sent.packet.clone());

        self.timers.arm(seq, Instant::now());
        self.transmissions += 1;
        self.retransmitted.push(seq);
        sink.send_packet(&packet).await
    }
}

/// Split a message into units of `payload_unit_size` characters. An empty message is a single
///  empty fragment, so that it is delivered like any other message.
pub fn fragment(message: &str, payload_unit_size: usize) -> Vec<String> {
    if message.is_empty() {
        return vec![String::new()];
    }

    let chars = message.chars().collect::<Vec<_>>();
    chars.chunks(payload_unit_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}
