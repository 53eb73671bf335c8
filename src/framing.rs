//! Length-prefixed framing of JSON encoded packets on a byte stream. A frame is a 4 byte big
//!  endian length N, followed by N bytes of UTF-8 JSON.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use crate::error::{ArqError, FramingError};
use crate::packet::Packet;
use crate::util::safe_converter::SafeCast;

pub const LEN_PREFIX_SIZE: usize = 4;

/// Frames larger than this are considered garbage unless configured otherwise
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

pub fn encode(packet: &Packet) -> Result<BytesMut, ArqError> {
    let json = serde_json::to_vec(packet)
        .map_err(|e| FramingError::Malformed(e.to_string()))?;
    let len: u32 = u32::try_from(json.len())
        .map_err(|_| FramingError::TooLong { declared: json.len(), max: u32::MAX.safe_cast() })?;

    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + json.len());
    buf.put_u32(len);
    buf.put_slice(&json);
    Ok(buf)
}

pub fn decode_body(body: &[u8]) -> Result<Packet, FramingError> {
    serde_json::from_slice(body)
        .map_err(|e| FramingError::Malformed(e.to_string()))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<(), ArqError> {
    let buf = encode(packet)?;
    trace!("writing '{}' frame of {} bytes", packet.kind(), buf.len());
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a single frame. A stream that is closed before the first byte of the length prefix is
///  reported as [FramingError::ClosedBeforePrefix], which is how a peer ends a session.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_len: usize) -> Result<Packet, ArqError> {
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    let read = read_fully(reader, &mut len_buf).await?;
    match read {
        0 => return Err(FramingError::ClosedBeforePrefix.into()),
        n if n < LEN_PREFIX_SIZE => return Err(FramingError::TruncatedPrefix { read: n }.into()),
        _ => {}
    }

    let declared: usize = u32::from_be_bytes(len_buf).safe_cast();
    if declared == 0 {
        return Err(FramingError::ZeroLength.into());
    }
    if declared > max_frame_len {
        // NB: we do not try to skip the frame - after a garbage prefix, the stream is out of sync
        return Err(FramingError::TooLong { declared, max: max_frame_len }.into());
    }

    let mut body = vec![0u8; declared];
    let read = read_fully(reader, &mut body).await?;
    if read < declared {
        return Err(FramingError::TruncatedBody { declared, read }.into());
    }

    let packet = decode_body(&body)?;
    trace!("read '{}' frame of {} bytes", packet.kind(), declared + LEN_PREFIX_SIZE);
    Ok(packet)
}

/// Read until `buf` is full or the stream ends, returning the number of bytes read. Unlike
///  `read_exact`, this reports how far we got, which is needed to distinguish a clean close.
async fn read_fully<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ArqError> {
    let mut read = 0;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DataPacket;
    use crate::seq_num::SeqNum;
    use rstest::rstest;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut result = (body.len() as u32).to_be_bytes().to_vec();
        result.extend_from_slice(body);
        result
    }

    #[tokio::test]
    async fn test_write_then_read_several_frames() {
        let packets = vec![
            Packet::Ack { seq_num: SeqNum::from_raw(2) },
            Packet::Data(DataPacket {
                seq_num: SeqNum::from_raw(3),
                payload: "ABCD".to_string(),
                checksum: 10,
                encrypted: false,
                total_fragments: Some(4),
            }),
            Packet::Nack { seq_num: SeqNum::from_raw(3) },
        ];

        let (mut client, mut server) = tokio::io::duplex(16);
        let to_write = packets.clone();
        let writer = tokio::spawn(async move {
            for p in &to_write {
                write_frame(&mut client, p).await.unwrap();
            }
        });

        for expected in &packets {
            let actual = read_frame(&mut server, DEFAULT_MAX_FRAME_LEN).await.unwrap();
            assert_eq!(&actual, expected);
        }
        writer.await.unwrap();

        // the writer was dropped, so the stream is closed at a frame boundary
        let closed = read_frame(&mut server, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(closed.is_clean_close());
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode(&Packet::Ack { seq_num: SeqNum::from_raw(1) }).unwrap();
        let body = br#"{"type":"ack","seq_num":1}"#;
        assert_eq!(&buf[..4], (body.len() as u32).to_be_bytes().as_slice());
        assert_eq!(&buf[4..], body.as_slice());
    }

    #[rstest]
    #[case::empty(vec![], FramingError::ClosedBeforePrefix)]
    #[case::partial_prefix(vec![0, 0], FramingError::TruncatedPrefix { read: 2 })]
    #[case::zero_length(vec![0, 0, 0, 0], FramingError::ZeroLength)]
    #[case::too_long(vec![0, 1, 0, 0, b'{'], FramingError::TooLong { declared: 65536, max: 1024 })]
    #[case::truncated_body(vec![0, 0, 0, 10, b'{', b'}'], FramingError::TruncatedBody { declared: 10, read: 2 })]
    fn test_read_frame_failures(#[case] raw: Vec<u8>, #[case] expected: FramingError) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let mut reader = raw.as_slice();
            match read_frame(&mut reader, 1024).await {
                Err(ArqError::Framing(e)) => assert_eq!(e, expected),
                other => panic!("unexpected result {:?}", other),
            }
        });
    }

    #[rstest]
    #[case::not_json(b"hello".as_slice())]
    #[case::unknown_type(br#"{"type":"bogus"}"#.as_slice())]
    #[case::not_utf8(&[0xff, 0xfe, 0xfd])]
    fn test_read_frame_malformed(#[case] body: &[u8]) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let raw = frame(body);
            let mut reader = raw.as_slice();
            match read_frame(&mut reader, 1024).await {
                Err(ArqError::Framing(FramingError::Malformed(_))) => {}
                other => panic!("unexpected result {:?}", other),
            }
        });
    }

    #[tokio::test]
    async fn test_read_frame_across_short_reads() {
        let raw = frame(br#"{"type":"nack","seq_num":7}"#);
        let mut reader = tokio_test_reader(raw);
        let packet = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(packet, Packet::Nack { seq_num: SeqNum::from_raw(7) });
    }

    /// a reader that hands out one byte per read
    fn tokio_test_reader(raw: Vec<u8>) -> impl AsyncRead + Unpin {
        let (mut tx, rx) = tokio::io::duplex(1);
        tokio::spawn(async move {
            tx.write_all(&raw).await.unwrap();
        });
        rx
    }
}
