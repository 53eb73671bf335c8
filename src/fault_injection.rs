//! Deliberate packet loss and corruption on the sending side, for exercising retransmission.
//!
//! Faults apply to the *first* transmission of a sequence number only. Retransmissions always go
//!  on the wire unaltered, otherwise a dropped packet could never be delivered.

use std::collections::BTreeSet;
use std::ops::Range;
use crate::seq_num::SeqNum;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// The packet is treated as sent (it is tracked and its timer is armed), but nothing is
    ///  written to the stream
    Drop,
    /// The packet is sent with a checksum that does not match its payload
    Corrupt,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FaultPlan {
    drop: BTreeSet<SeqNum>,
    corrupt: BTreeSet<SeqNum>,
}

impl FaultPlan {
    pub fn none() -> FaultPlan {
        FaultPlan::default()
    }

    pub fn drop_seq(mut self, seq: u64) -> FaultPlan {
        self.drop.insert(SeqNum::from_raw(seq));
        self
    }

    pub fn drop_range(mut self, range: Range<u64>) -> FaultPlan {
        self.drop.extend(range.map(SeqNum::from_raw));
        self
    }

    pub fn corrupt_seq(mut self, seq: u64) -> FaultPlan {
        self.corrupt.insert(SeqNum::from_raw(seq));
        self
    }

    pub fn corrupt_range(mut self, range: Range<u64>) -> FaultPlan {
        self.corrupt.extend(range.map(SeqNum::from_raw));
        self
    }

    /// NB: if a sequence number is scheduled for both, dropping wins - a packet that is not sent
    ///  can not be corrupted
    pub fn fault_for(&self, seq: SeqNum) -> Option<Fault> {
        if self.drop.contains(&seq) {
            Some(Fault::Drop)
        }
        else if self.corrupt.contains(&seq) {
            Some(Fault::Corrupt)
        }
        else {
            None
        }
    }
}

pub fn corrupt_checksum(checksum: u8) -> u8 {
    checksum.wrapping_add(1)
}
