use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};
use crate::seq_num::SeqNum;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OperationMode {
    GoBackN,
    SelectiveRepeat,
}

impl OperationMode {
    pub const GO_BACK_N: &'static str = "go_back_n";
    pub const SELECTIVE_REPEAT: &'static str = "selective_repeat";

    pub fn wire_name(&self) -> &'static str {
        match self {
            OperationMode::GoBackN => Self::GO_BACK_N,
            OperationMode::SelectiveRepeat => Self::SELECTIVE_REPEAT,
        }
    }

    /// strict parsing - see [crate::handshake::normalize_operation_mode] for the lenient variant
    ///  used during negotiation
    pub fn from_wire(raw: &str) -> Option<OperationMode> {
        match raw {
            Self::GO_BACK_N => Some(OperationMode::GoBackN),
            Self::SELECTIVE_REPEAT => Some(OperationMode::SelectiveRepeat),
            _ => None,
        }
    }
}

impl Display for OperationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A packet as it is exchanged between peers. The JSON representation is internally tagged with
///  a `type` field.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    Handshake(HandshakeRequest),
    HandshakeAck(HandshakeAck),
    Data(DataPacket),
    Ack { seq_num: SeqNum },
    Nack { seq_num: SeqNum },
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Handshake(_) => "handshake",
            Packet::HandshakeAck(_) => "handshake_ack",
            Packet::Data(_) => "data",
            Packet::Ack { .. } => "ack",
            Packet::Nack { .. } => "nack",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub max_message_size: u64,
    /// kept as a raw string so that unknown modes can be normalized observably rather than
    ///  failing deserialization
    pub operation_mode: String,
    #[serde(default)]
    pub encryption_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caesar_shift: Option<u8>,
    /// hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeStatus {
    Success,
    Rejected,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub max_message_size: u64,
    pub window_size: u32,
    pub operation_mode: String,
    #[serde(default)]
    pub encryption_enabled: bool,
    pub status: HandshakeStatus,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub seq_num: SeqNum,
    pub payload: String,
    pub checksum: u8,
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fragments: Option<u64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::gbn("go_back_n", Some(OperationMode::GoBackN))]
    #[case::sr("selective_repeat", Some(OperationMode::SelectiveRepeat))]
    #[case::unknown("stop_and_wait", None)]
    #[case::case_sensitive("Go_Back_N", None)]
    #[case::empty("", None)]
    fn test_operation_mode_from_wire(#[case] raw: &str, #[case] expected: Option<OperationMode>) {
        assert_eq!(OperationMode::from_wire(raw), expected);
    }

    #[rstest]
    #[case::ack(Packet::Ack { seq_num: SeqNum::from_raw(3) }, json!({"type": "ack", "seq_num": 3}))]
    #[case::nack(Packet::Nack { seq_num: SeqNum::from_raw(0) }, json!({"type": "nack", "seq_num": 0}))]
    #[case::plain_data(
        Packet::Data(DataPacket { seq_num: SeqNum::from_raw(1), payload: "EFGH".to_string(), checksum: 26, encrypted: false, total_fragments: None }),
        json!({"type": "data", "seq_num": 1, "payload": "EFGH", "checksum": 26}),
    )]
    #[case::encrypted_data(
        Packet::Data(DataPacket { seq_num: SeqNum::from_raw(2), payload: "LMNO".to_string(), checksum: 42, encrypted: true, total_fragments: Some(3) }),
        json!({"type": "data", "seq_num": 2, "payload": "LMNO", "checksum": 42, "encrypted": true, "total_fragments": 3}),
    )]
    #[case::handshake(
        Packet::Handshake(HandshakeRequest { max_message_size: 50, operation_mode: "go_back_n".to_string(), encryption_enabled: true, caesar_shift: Some(3), encryption_key: None }),
        json!({"type": "handshake", "max_message_size": 50, "operation_mode": "go_back_n", "encryption_enabled": true, "caesar_shift": 3}),
    )]
    #[case::handshake_ack(
        Packet::HandshakeAck(HandshakeAck { max_message_size: 50, window_size: 5, operation_mode: "selective_repeat".to_string(), encryption_enabled: false, status: HandshakeStatus::Success }),
        json!({"type": "handshake_ack", "max_message_size": 50, "window_size": 5, "operation_mode": "selective_repeat", "encryption_enabled": false, "status": "success"}),
    )]
    fn test_json_representation(#[case] packet: Packet, #[case] expected: serde_json::Value) {
        assert_eq!(serde_json::to_value(&packet).unwrap(), expected);
        assert_eq!(serde_json::from_value::<Packet>(expected).unwrap(), packet);
    }

    #[test]
    fn test_handshake_without_encryption_fields() {
        // this is what a minimal client sends
        let raw = r#"{"type": "handshake", "max_message_size": 50, "operation_mode": "go_back_n"}"#;
        let packet: Packet = serde_json::from_str(raw).unwrap();
        assert_eq!(packet, Packet::Handshake(HandshakeRequest {
            max_message_size: 50,
            operation_mode: "go_back_n".to_string(),
            encryption_enabled: false,
            caesar_shift: None,
            encryption_key: None,
        }));
    }

    #[test]
    fn test_data_with_legacy_original_checksum_field() {
        let raw = r#"{"type": "data", "seq_num": 4, "payload": "xyz", "checksum": 7, "encrypted": true, "original_checksum": 99}"#;
        let packet: Packet = serde_json::from_str(raw).unwrap();
        assert_eq!(packet, Packet::Data(DataPacket {
            seq_num: SeqNum::from_raw(4),
            payload: "xyz".to_string(),
            checksum: 7,
            encrypted: true,
            total_fragments: None,
        }));
    }

    #[rstest]
    #[case::unknown_type(r#"{"type": "syn", "seq_num": 1}"#)]
    #[case::missing_type(r#"{"seq_num": 1}"#)]
    #[case::missing_field(r#"{"type": "data", "seq_num": 1, "payload": "a"}"#)]
    #[case::negative_seq(r#"{"type": "ack", "seq_num": -1}"#)]
    #[case::checksum_out_of_range(r#"{"type": "data", "seq_num": 1, "payload": "a", "checksum": 256}"#)]
    fn test_malformed(#[case] raw: &str) {
        assert!(serde_json::from_str::<Packet>(raw).is_err());
    }
}
