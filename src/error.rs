use std::sync::Arc;
use thiserror::Error;
use crate::seq_num::SeqNum;

/// Failures decoding a frame from the underlying stream. All of them are fatal to the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The stream ended cleanly at a frame boundary. This is how the peer closes a session.
    #[error("stream closed before a length prefix was read")]
    ClosedBeforePrefix,
    #[error("stream closed after {read} of 4 length prefix bytes")]
    TruncatedPrefix { read: usize },
    #[error("stream closed after {read} of {declared} declared frame bytes")]
    TruncatedBody { declared: usize, read: usize },
    #[error("received a frame with declared length 0")]
    ZeroLength,
    #[error("received a frame with declared length {declared}, the maximum is {max}")]
    TooLong { declared: usize, max: usize },
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// The errors a session can report to application code.
///
/// This is `Clone` because a fatal error is reported both to a pending send and to the receiving
///  side of a session.
#[derive(Debug, Clone, Error)]
pub enum ArqError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("stream closed before the message was complete")]
    StreamClosed,
    #[error("the peer rejected the handshake")]
    HandshakeRejected,
    #[error("handshake did not complete in time")]
    HandshakeTimeout,
    #[error("received a '{received}' packet while waiting for '{expected}'")]
    UnexpectedPacket { expected: &'static str, received: &'static str },
    #[error("invalid session parameters: {0}")]
    InvalidParameters(String),
    #[error("decrypting packet #{seq} failed: {reason}")]
    DecryptFailed { seq: SeqNum, reason: String },
    #[error("encrypting packet #{seq} failed: {reason}")]
    EncryptFailed { seq: SeqNum, reason: String },
    #[error("message of {len} characters exceeds the negotiated maximum of {max}")]
    MessageTooLarge { len: u64, max: u64 },
    #[error("packet #{seq} was not acknowledged after {attempts} transmissions")]
    DeliveryFailed { seq: SeqNum, attempts: u32 },
    #[error("session aborted")]
    Aborted,
}

impl From<std::io::Error> for ArqError {
    fn from(value: std::io::Error) -> Self {
        ArqError::Io(Arc::new(value))
    }
}

impl ArqError {
    /// `true` if this error means the peer closed the stream at a packet boundary
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ArqError::Framing(FramingError::ClosedBeforePrefix))
    }
}
