//! This crate implements an ARQ (automatic repeat request) protocol on top of an ordered,
//!  reliable byte stream (typically TCP). It exists mostly to exercise and demonstrate the two
//!  classic sliding-window retransmission schemes - Go-Back-N and Selective Repeat - with
//!  deliberately injected packet loss and corruption.
//!
//! ## Design goals
//!
//! * A *session* is one connection between two peers. Session parameters are negotiated once in
//!    a handshake and do not change afterwards
//!   * the client proposes maximum message size, operation mode and encryption
//!   * the server is authoritative for the window size, and it may downgrade encryption if it
//!      cannot honor it
//! * The abstraction is sending / receiving *messages* (text). A message is split into payload
//!    units of a configured (small) number of characters, and each unit travels in its own
//!    `data` packet with a sequence number
//!   * sequence numbers start at 0 and continue across messages of the same session, so they are
//!      never reused inside a session
//! * Each data packet carries an additive checksum over its plaintext payload. The checksum is
//!    intentionally weak - it is there to detect injected corruption, not to provide integrity
//! * The receiver responds with `ack` for every accepted packet and `nack` for every packet with
//!    a wrong checksum
//! * Both peers may send and receive concurrently, driven by a single event loop per session
//!
//! ## Framing
//!
//! Every packet is a JSON document, framed with a length prefix:
//!
//! ```ascii
//! 0: length N of the JSON document in bytes (u32 BE), must be > 0
//! 4: N bytes of UTF-8 encoded JSON
//! ```
//!
//! ## Packets
//!
//! The JSON document's `type` field determines the kind of packet.
//!
//! *handshake* (client -> server)
//!
//! ```ascii
//! max_message_size:   maximum number of characters per message the client intends to send
//! operation_mode:     "go_back_n" or "selective_repeat"; anything else is treated as "go_back_n"
//! encryption_enabled: bool, defaults to false if missing
//! caesar_shift:       (optional) shift for the Caesar cipher
//! encryption_key:     (optional) hex encoded AES-256-GCM key
//! ```
//!
//! *handshake_ack* (server -> client)
//!
//! ```ascii
//! max_message_size:   confirmed maximum message size
//! window_size:        the window size for both directions
//! operation_mode:     confirmed operation mode
//! encryption_enabled: whether the server actually enabled encryption
//! status:             "success" or "rejected"
//! ```
//!
//! *data*
//!
//! ```ascii
//! seq_num:         sequence number (u64)
//! payload:         the payload unit - ciphertext if 'encrypted' is set
//! checksum:        sum of the plaintext payload's bytes, mod 256
//! encrypted:       (optional) bool
//! total_fragments: (optional) the number of payload units of the message this packet belongs
//!                   to. If it is missing, the receiver treats the end of the stream as the end
//!                   of the message
//! ```
//!
//! *ack*, *nack*
//!
//! ```ascii
//! seq_num: sequence number of the data packet that is (negatively) acknowledged
//! ```
//!
//! ## Go-Back-N vs. Selective Repeat
//!
//! Under Go-Back-N, the receiver accepts only the next expected sequence number and silently
//!  drops everything else. The sender retransmits its whole unacknowledged window whenever a
//!  timer expires or a `nack` arrives.
//!
//! Under Selective Repeat, the receiver buffers out-of-order packets and acknowledges each of
//!  them individually, so the sender retransmits only the specific packet that timed out or was
//!  NAK'ed.
//!
//! In both modes, the sender's window slides only over a contiguous prefix of acknowledged
//!  packets.

pub mod checksum;
pub mod config;
pub mod encryption;
pub mod error;
pub mod fault_injection;
pub mod framing;
pub mod handshake;
pub mod packet;
pub mod packet_sink;
pub mod receiver;
pub mod sender;
pub mod seq_num;
pub mod session;
pub mod util;
