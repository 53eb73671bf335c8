use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use crate::checksum::verify;
use crate::encryption::PayloadCipher;
use crate::error::ArqError;
use crate::handshake::SessionParameters;
use crate::packet::{DataPacket, OperationMode, Packet};
use crate::seq_num::SeqNum;
use crate::util::safe_converter::SafeCast;

/// The receiving side's window, reassembling messages from data packets.
///
/// A message's end is known from the `total_fragments` field of its packets. Peers that do not send
///  it delimit messages by closing the stream, see [ReceiveWindow::finish_on_close].
pub struct ReceiveWindow {
    mode: OperationMode,
    window_size: u64,
    max_message_size: u64,
    cipher: Option<Arc<dyn PayloadCipher>>,

    /// sequence number of the current message's first fragment
    message_start: SeqNum,
    /// next sequence number to be appended to the message
    expected_seq: SeqNum,
    total_fragments: Option<u64>,
    /// selective repeat only: fragments that arrived ahead of `expected_seq`
    reorder_buffer: BTreeMap<SeqNum, String>,

    message: String,
    message_len: u64,
}

impl ReceiveWindow {
    pub fn new(params: &SessionParameters) -> ReceiveWindow {
        ReceiveWindow {
            mode: params.operation_mode,
            window_size: params.window_size.safe_cast(),
            max_message_size: params.max_message_size,
            cipher: params.cipher.clone(),
            message_start: SeqNum::ZERO,
            expected_seq: SeqNum::ZERO,
            total_fragments: None,
            reorder_buffer: BTreeMap::default(),
            message: String::new(),
            message_len: 0,
        }
    }

    pub fn expected_seq(&self) -> SeqNum {
        self.expected_seq
    }

    /// Handle an incoming data packet, returning the acknowledgement to send (if any).
    ///
    /// A packet with a wrong checksum is answered with a NACK. Failing to decrypt a packet on the
    ///  other hand is an error: the peers disagree on encryption, and retransmitting will not
    ///  change that.
    pub fn on_data(&mut self, packet: DataPacket) -> Result<Option<Packet>, ArqError> {
        let seq = packet.seq_num;
        let plaintext = self.plaintext(&packet)?;

        if !verify(plaintext.as_bytes(), packet.checksum) {
            debug!("checksum mismatch for #{} - sending NACK", seq);
            return Ok(Some(Packet::Nack { seq_num: seq }));
        }

        match self.mode {
            OperationMode::GoBackN => self.on_valid_go_back_n(seq, plaintext, packet.total_fragments),
            OperationMode::SelectiveRepeat => self.on_valid_selective_repeat(seq, plaintext, packet.total_fragments),
        }
    }

    fn plaintext(&self, packet: &DataPacket) -> Result<String, ArqError> {
        if !packet.encrypted {
            if self.cipher.is_some() {
                trace!("received unencrypted packet #{} in an encrypted session", packet.seq_num);
            }
            return Ok(packet.payload.clone());
        }

        match &self.cipher {
            Some(cipher) => cipher.decrypt(&packet.payload)
                .map_err(|e| ArqError::DecryptFailed { seq: packet.seq_num, reason: e.to_string() }),
            None => Err(ArqError::DecryptFailed {
                seq: packet.seq_num,
                reason: "packet is encrypted, but encryption was not negotiated".to_string(),
            }),
        }
    }

    fn on_valid_go_back_n(&mut self, seq: SeqNum, plaintext: String, total_fragments: Option<u64>) -> Result<Option<Packet>, ArqError> {
        if seq != self.expected_seq {
            // out of order, including duplicates - the sender will retransmit the window
            trace!("expected #{}, received #{} - dropping", self.expected_seq, seq);
            return Ok(None);
        }

        self.register_total_fragments(seq, total_fragments);
        self.append(&plaintext)?;
        self.expected_seq = self.expected_seq.next();
        Ok(Some(Packet::Ack { seq_num: seq }))
    }

    fn on_valid_selective_repeat(&mut self, seq: SeqNum, plaintext: String, total_fragments: Option<u64>) -> Result<Option<Packet>, ArqError> {
        if seq < self.expected_seq {
            // the previous ACK may have been lost, so we acknowledge again - but deliver only once
            trace!("#{} was delivered before - acknowledging again", seq);
            return Ok(Some(Packet::Ack { seq_num: seq }));
        }
        if seq >= self.expected_seq + 2 * self.window_size {
            debug!("#{} is too far ahead of #{} - dropping", seq, self.expected_seq);
            return Ok(None);
        }

        self.register_total_fragments(seq, total_fragments);
        if self.reorder_buffer.contains_key(&seq) {
            trace!("#{} is already buffered", seq);
        }
        else {
            self.reorder_buffer.insert(seq, plaintext);
        }

        while let Some(fragment) = self.reorder_buffer.remove(&self.expected_seq) {
            self.append(&fragment)?;
            self.expected_seq = self.expected_seq.next();
        }
        Ok(Some(Packet::Ack { seq_num: seq }))
    }

    fn register_total_fragments(&mut self, seq: SeqNum, total_fragments: Option<u64>) {
        let Some(total) = total_fragments else {
            return;
        };
        match self.total_fragments {
            None => self.total_fragments = Some(total),
            Some(prev) if prev != total => {
                warn!("#{} claims a message of {} fragments, previous packets claimed {} - ignoring", seq, total, prev);
            }
            Some(_) => {}
        }
    }

    fn append(&mut self, fragment: &str) -> Result<(), ArqError> {
        let len: u64 = fragment.chars().count().safe_cast();
        self.message_len += len;
        if self.message_len > self.max_message_size {
            return Err(ArqError::MessageTooLarge { len: self.message_len, max: self.max_message_size });
        }
        self.message.push_str(fragment);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        match self.total_fragments {
            Some(total) => self.expected_seq >= self.message_start + total,
            None => false,
        }
    }

    /// `true` if no part of a message was received since the last complete one
    pub fn is_idle(&self) -> bool {
        self.expected_seq == self.message_start && self.reorder_buffer.is_empty()
    }

    /// Returns the complete message and starts collecting the next one
    pub fn take_message(&mut self) -> Option<String> {
        if !self.is_complete() {
            return None;
        }
        Some(self.reset())
    }

    fn reset(&mut self) -> String {
        debug!("message [#{}, #{}) complete", self.message_start, self.expected_seq);
        self.message_start = self.expected_seq;
        self.total_fragments = None;
        self.message_len = 0;
        std::mem::take(&mut self.message)
    }

    /// The stream was closed by the peer. For peers that do not announce `total_fragments`, this
    ///  completes the message in progress. Otherwise, a message in progress is incomplete.
    pub fn finish_on_close(&mut self) -> Result<Option<String>, ArqError> {
        if self.is_idle() {
            return Ok(None);
        }
        if self.total_fragments.is_none() && self.reorder_buffer.is_empty() {
            return Ok(Some(self.reset()));
        }
        Err(ArqError::StreamClosed)
    }
}
