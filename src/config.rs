use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use crate::encryption::{Aes256GcmCipher, CaesarCipher, PayloadCipher};
use crate::fault_injection::FaultPlan;
use crate::framing::DEFAULT_MAX_FRAME_LEN;
use crate::packet::OperationMode;

/// Frames must at least be able to hold a handshake
const MIN_FRAME_LEN: usize = 256;

/// Settings for moving data packets that each peer decides for itself, i.e. they are not part of
///  the handshake
#[derive(Clone, Debug)]
pub struct TransferConfig {
    /// The number of characters (not bytes) per data packet. Messages are split into units of
    ///  this size, the last unit being shorter if the message length is not a multiple.
    pub payload_unit_size: usize,

    /// Time after which an unacknowledged packet is retransmitted. This should be well above
    ///  the round trip time, but there is no adaptive estimation
    pub retransmission_timeout: Duration,

    /// The number of *re*transmissions of a single packet before the send is abandoned with
    ///  [crate::error::ArqError::DeliveryFailed]. `None` means retransmitting forever.
    pub max_retransmissions: Option<u32>,

    /// Upper bound for the declared length of incoming frames. Anything longer is treated as
    ///  a broken stream.
    pub max_frame_len: usize,

    /// testing only
    pub fault_plan: FaultPlan,
}

impl TransferConfig {
    pub fn new() -> TransferConfig {
        TransferConfig {
            payload_unit_size: 4,
            retransmission_timeout: Duration::from_secs(1),
            max_retransmissions: Some(16),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            fault_plan: FaultPlan::none(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.payload_unit_size == 0 {
            bail!("payload unit size must be at least 1");
        }
        if self.retransmission_timeout.is_zero() {
            bail!("retransmission timeout must be greater than zero");
        }
        if self.max_frame_len < MIN_FRAME_LEN {
            bail!("max frame length must be at least {} bytes, was {}", MIN_FRAME_LEN, self.max_frame_len);
        }
        if self.max_frame_len > u32::MAX as usize {
            bail!("max frame length must fit into the 4 byte length prefix");
        }
        Ok(())
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig::new()
    }
}


/// Encryption that a client requests. The key material travels in the handshake, so this is
///  about exercising the payload pipeline rather than about confidentiality.
#[derive(Clone)]
pub enum EncryptionConfig {
    Disabled,
    Caesar { shift: u8 },
    Aes256Gcm { key: Vec<u8> },
}

impl Debug for EncryptionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionConfig::Disabled => write!(f, "Disabled"),
            EncryptionConfig::Caesar { shift } => write!(f, "Caesar{{shift: {}}}", shift),
            EncryptionConfig::Aes256Gcm { .. } => write!(f, "Aes256Gcm{{..}}"),
        }
    }
}

impl EncryptionConfig {
    pub fn aes_from_shared_secret(secret: &[u8]) -> EncryptionConfig {
        EncryptionConfig::Aes256Gcm {
            key: Aes256GcmCipher::key_from_shared_secret(secret),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, EncryptionConfig::Disabled)
    }

    pub fn build_cipher(&self) -> anyhow::Result<Option<Arc<dyn PayloadCipher>>> {
        Ok(match self {
            EncryptionConfig::Disabled => None,
            EncryptionConfig::Caesar { shift } => Some(Arc::new(CaesarCipher::new(*shift))),
            EncryptionConfig::Aes256Gcm { key } => Some(Arc::new(Aes256GcmCipher::new(key)?)),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let EncryptionConfig::Aes256Gcm { key } = self {
            if key.len() != Aes256GcmCipher::KEY_LEN {
                bail!("AES-256-GCM key must have {} bytes, was {}", Aes256GcmCipher::KEY_LEN, key.len());
            }
        }
        Ok(())
    }
}


#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The maximum message length (in characters) proposed to the server. The server may confirm
    ///  a smaller value, which is then binding for both directions.
    pub max_message_size: u64,

    /// Proposed to the server, which echoes it back
    pub operation_mode: OperationMode,

    pub encryption: EncryptionConfig,

    /// Upper bound for sending the handshake and receiving the server's response
    pub handshake_timeout: Duration,

    pub transfer: TransferConfig,
}

impl ClientConfig {
    pub fn new() -> ClientConfig {
        ClientConfig {
            max_message_size: 50,
            operation_mode: OperationMode::GoBackN,
            encryption: EncryptionConfig::Disabled,
            handshake_timeout: Duration::from_secs(5),
            transfer: TransferConfig::new(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_message_size == 0 {
            bail!("max message size must be at least 1");
        }
        if self.handshake_timeout.is_zero() {
            bail!("handshake timeout must be greater than zero");
        }
        self.encryption.validate()?;
        self.transfer.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new()
    }
}


#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// The server is authoritative for the window size - it is announced in the handshake
    ///  response and applies to both directions
    pub window_size: u32,

    /// The server's limit for message length. The negotiated maximum is the smaller of this and
    ///  the client's proposal.
    pub max_message_size: u64,

    /// If this is `false`, the server downgrades every session to unencrypted transfer
    pub allow_encryption: bool,

    /// Upper bound for waiting for a client's handshake after the connection was established
    pub handshake_timeout: Duration,

    pub transfer: TransferConfig,
}

impl ServerConfig {
    pub fn new() -> ServerConfig {
        ServerConfig {
            window_size: 5,
            max_message_size: 64 * 1024,
            allow_encryption: true,
            handshake_timeout: Duration::from_secs(5),
            transfer: TransferConfig::new(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        if self.max_message_size == 0 {
            bail!("max message size must be at least 1");
        }
        if self.handshake_timeout.is_zero() {
            bail!("handshake timeout must be greater than zero");
        }
        self.transfer.validate()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        ClientConfig::new().validate().unwrap();
        ServerConfig::new().validate().unwrap();
    }

    #[rstest]
    #[case::zero_message_size(|c: &mut ClientConfig| c.max_message_size = 0)]
    #[case::zero_handshake_timeout(|c: &mut ClientConfig| c.handshake_timeout = Duration::ZERO)]
    #[case::zero_payload_unit(|c: &mut ClientConfig| c.transfer.payload_unit_size = 0)]
    #[case::zero_retransmission_timeout(|c: &mut ClientConfig| c.transfer.retransmission_timeout = Duration::ZERO)]
    #[case::tiny_frames(|c: &mut ClientConfig| c.transfer.max_frame_len = 100)]
    #[case::short_aes_key(|c: &mut ClientConfig| c.encryption = EncryptionConfig::Aes256Gcm { key: vec![1; 16] })]
    fn test_invalid_client_config(#[case] f: fn(&mut ClientConfig)) {
        let mut config = ClientConfig::new();
        f(&mut config);
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::zero_window(|c: &mut ServerConfig| c.window_size = 0)]
    #[case::zero_message_size(|c: &mut ServerConfig| c.max_message_size = 0)]
    #[case::zero_handshake_timeout(|c: &mut ServerConfig| c.handshake_timeout = Duration::ZERO)]
    #[case::zero_payload_unit(|c: &mut ServerConfig| c.transfer.payload_unit_size = 0)]
    fn test_invalid_server_config(#[case] f: fn(&mut ServerConfig)) {
        let mut config = ServerConfig::new();
        f(&mut config);
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::disabled(EncryptionConfig::Disabled, None)]
    #[case::caesar(EncryptionConfig::Caesar { shift: 3 }, Some("caesar"))]
    #[case::aes(EncryptionConfig::aes_from_shared_secret(b"abc"), Some("aes-256-gcm"))]
    fn test_build_cipher(#[case] config: EncryptionConfig, #[case] expected: Option<&str>) {
        config.validate().unwrap();
        let cipher = config.build_cipher().unwrap();
        assert_eq!(cipher.map(|c| c.name()), expected);
    }

    #[test]
    fn test_debug_hides_key() {
        let config = EncryptionConfig::Aes256Gcm { key: vec![0xab; 32] };
        assert_eq!(format!("{:?}", config), "Aes256Gcm{..}");
    }
}
