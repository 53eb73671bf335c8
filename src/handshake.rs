//! Session parameter negotiation. The client proposes, the server decides:
//!
//! * max message size: the smaller of the client's proposal and the server's limit
//! * window size: the server's, applying to both directions
//! * operation mode: the client's, with unknown modes normalized to Go-Back-N
//! * encryption: the client's choice (and key), unless the server can not or will not honor it -
//!    then the session runs unencrypted

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use crate::config::{ClientConfig, EncryptionConfig, ServerConfig};
use crate::encryption::{Aes256GcmCipher, CaesarCipher, PayloadCipher};
use crate::error::ArqError;
use crate::framing::{read_frame, write_frame};
use crate::packet::{HandshakeAck, HandshakeRequest, HandshakeStatus, OperationMode, Packet};

/// The result of a successful handshake. These parameters are fixed for the session's lifetime.
#[derive(Clone, Debug)]
pub struct SessionParameters {
    pub max_message_size: u64,
    pub window_size: u32,
    pub operation_mode: OperationMode,
    /// `true` if the requested operation mode was not recognized and Go-Back-N is used instead
    pub mode_fallback: bool,
    pub cipher: Option<Arc<dyn PayloadCipher>>,
}

impl SessionParameters {
    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }
}

/// Lenient parsing of an operation mode: everything that is not a known mode is treated as
///  Go-Back-N. The second element of the result signals that this fallback happened.
pub fn normalize_operation_mode(raw: &str) -> (OperationMode, bool) {
    match OperationMode::from_wire(raw) {
        Some(mode) => (mode, false),
        None => {
            warn!("unsupported operation mode {:?} - falling back to {}", raw, OperationMode::GoBackN);
            (OperationMode::GoBackN, true)
        }
    }
}

pub fn build_request(config: &ClientConfig) -> HandshakeRequest {
    let (caesar_shift, encryption_key) = match &config.encryption {
        EncryptionConfig::Disabled => (None, None),
        EncryptionConfig::Caesar { shift } => (Some(*shift), None),
        EncryptionConfig::Aes256Gcm { key } => (None, Some(hex::encode(key))),
    };

    HandshakeRequest {
        max_message_size: config.max_message_size,
        operation_mode: config.operation_mode.wire_name().to_string(),
        encryption_enabled: config.encryption.is_enabled(),
        caesar_shift,
        encryption_key,
    }
}

/// Server side decision. The returned parameters are `None` if and only if the handshake is
///  rejected.
pub fn negotiate(request: &HandshakeRequest, config: &ServerConfig) -> (HandshakeAck, Option<SessionParameters>) {
    let (operation_mode, mode_fallback) = normalize_operation_mode(&request.operation_mode);

    if request.max_message_size == 0 {
        warn!("rejecting handshake with max message size 0");
        let ack = HandshakeAck {
            max_message_size: 0,
            window_size: config.window_size,
            operation_mode: operation_mode.wire_name().to_string(),
            encryption_enabled: false,
            status: HandshakeStatus::Rejected,
        };
        return (ack, None);
    }

    let max_message_size = request.max_message_size.min(config.max_message_size);
    if max_message_size < request.max_message_size {
        debug!("limiting max message size to {} (proposed: {})", max_message_size, request.max_message_size);
    }

    let cipher = server_cipher(request, config);

    let ack = HandshakeAck {
        max_message_size,
        window_size: config.window_size,
        operation_mode: operation_mode.wire_name().to_string(),
        encryption_enabled: cipher.is_some(),
        status: HandshakeStatus::Success,
    };
    let params = SessionParameters {
        max_message_size,
        window_size: config.window_size,
        operation_mode,
        mode_fallback,
        cipher,
    };
    (ack, Some(params))
}

fn server_cipher(request: &HandshakeRequest, config: &ServerConfig) -> Option<Arc<dyn PayloadCipher>> {
    if !request.encryption_enabled {
        return None;
    }
    if !config.allow_encryption {
        info!("client requested encryption, but it is disabled locally - continuing unencrypted");
        return None;
    }

    if let Some(key) = &request.encryption_key {
        let cipher = hex::decode(key)
            .map_err(anyhow::Error::from)
            .and_then(|key| Aes256GcmCipher::new(&key));
        return match cipher {
            Ok(cipher) => Some(Arc::new(cipher)),
            Err(e) => {
                warn!("client sent an unusable encryption key ({}) - continuing unencrypted", e);
                None
            }
        };
    }
    if let Some(shift) = request.caesar_shift {
        return Some(Arc::new(CaesarCipher::new(shift)));
    }

    warn!("client requested encryption without sending a key - continuing unencrypted");
    None
}

/// Client side evaluation of the server's response
pub fn accept_ack(config: &ClientConfig, ack: &HandshakeAck) -> Result<SessionParameters, ArqError> {
    if ack.status == HandshakeStatus::Rejected {
        return Err(ArqError::HandshakeRejected);
    }
    if ack.window_size == 0 {
        return Err(ArqError::InvalidParameters("server announced window size 0".to_string()));
    }
    if ack.max_message_size == 0 {
        return Err(ArqError::InvalidParameters("server confirmed max message size 0".to_string()));
    }

    let max_message_size = if ack.max_message_size > config.max_message_size {
        warn!("server confirmed max message size {} which exceeds the proposed {} - using the proposal", ack.max_message_size, config.max_message_size);
        config.max_message_size
    }
    else {
        ack.max_message_size
    };

    let (operation_mode, mode_fallback) = normalize_operation_mode(&ack.operation_mode);
    if operation_mode != config.operation_mode {
        warn!("requested operation mode {}, server confirmed {} - using the server's", config.operation_mode, operation_mode);
    }

    let cipher = match (config.encryption.is_enabled(), ack.encryption_enabled) {
        (true, true) => config.encryption.build_cipher()
            .map_err(|e| ArqError::InvalidParameters(e.to_string()))?,
        (true, false) => {
            warn!("server does not support the requested encryption - continuing unencrypted");
            None
        }
        (false, true) => {
            warn!("server enabled encryption that was not requested - ignoring");
            None
        }
        (false, false) => None,
    };

    Ok(SessionParameters {
        max_message_size,
        window_size: ack.window_size,
        operation_mode,
        mode_fallback,
        cipher,
    })
}

pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, config: &ClientConfig) -> Result<SessionParameters, ArqError> {
    let handshake = async {
        let request = build_request(config);
        debug!("sending handshake: {:?}", request);
        write_frame(stream, &Packet::Handshake(request)).await?;

        match read_frame(stream, config.transfer.max_frame_len).await? {
            Packet::HandshakeAck(ack) => {
                debug!("received handshake response: {:?}", ack);
                accept_ack(config, &ack)
            }
            other => Err(ArqError::UnexpectedPacket { expected: "handshake_ack", received: other.kind() }),
        }
    };

    tokio::time::timeout(config.handshake_timeout, handshake).await
        .map_err(|_| ArqError::HandshakeTimeout)?
}

pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, config: &ServerConfig) -> Result<SessionParameters, ArqError> {
    let handshake = async {
        let request = match read_frame(stream, config.transfer.max_frame_len).await? {
            Packet::Handshake(request) => request,
            other => return Err(ArqError::UnexpectedPacket { expected: "handshake", received: other.kind() }),
        };
        debug!("received handshake: {:?}", request);

        let (ack, params) = negotiate(&request, config);
        write_frame(stream, &Packet::HandshakeAck(ack)).await?;
        params.ok_or(ArqError::HandshakeRejected)
    };

    tokio::time::timeout(config.handshake_timeout, handshake).await
        .map_err(|_| ArqError::HandshakeTimeout)?
}
