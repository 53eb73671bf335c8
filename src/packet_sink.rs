use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use crate::error::ArqError;
use crate::framing::write_frame;
use crate::packet::Packet;

/// This is an abstraction for putting a packet on the wire, introduced to facilitate mocking
///  the I/O part away when testing the window engines
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketSink: Send {
    async fn send_packet(&mut self, packet: &Packet) -> Result<(), ArqError>;
}

/// Writes packets as length-prefixed frames to (the write half of) a stream
pub struct FramedSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FramedSink<W> {
    pub fn new(writer: W) -> FramedSink<W> {
        FramedSink { writer }
    }

    /// flush and shut down the write side of the stream, signalling the end of the session
    pub async fn close(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> PacketSink for FramedSink<W> {
    async fn send_packet(&mut self, packet: &Packet) -> Result<(), ArqError> {
        write_frame(&mut self.writer, packet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_frame, DEFAULT_MAX_FRAME_LEN};
    use crate::seq_num::SeqNum;

    #[tokio::test]
    async fn test_framed_sink() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut sink = FramedSink::new(a);

        sink.send_packet(&Packet::Ack { seq_num: SeqNum::from_raw(9) }).await.unwrap();
        sink.send_packet(&Packet::Nack { seq_num: SeqNum::from_raw(10) }).await.unwrap();

        assert_eq!(read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap(), Packet::Ack { seq_num: SeqNum::from_raw(9) });
        assert_eq!(read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap(), Packet::Nack { seq_num: SeqNum::from_raw(10) });
    }

    #[tokio::test]
    async fn test_framed_sink_reports_closed_stream() {
        let (a, b) = tokio::io::duplex(1024);
        drop(b);
        let mut sink = FramedSink::new(a);

        match sink.send_packet(&Packet::Ack { seq_num: SeqNum::ZERO }).await {
            Err(ArqError::Io(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_ends_the_stream() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut sink = FramedSink::new(a);
        sink.send_packet(&Packet::Ack { seq_num: SeqNum::ZERO }).await.unwrap();
        sink.close().await.unwrap();

        assert!(read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.is_ok());
        assert!(read_frame(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap_err().is_clean_close());
    }
}
