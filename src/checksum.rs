//! Single-byte additive checksum over a packet's plaintext payload.
//!
//! NB: This detects injected corruption of the checksum field and most single-byte changes, but
//!      it is trivially defeated by reordering bytes. It is not meant to be more than that.

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

pub fn verify(payload: &[u8], claimed: u8) -> bool {
    checksum(payload) == claimed
}
