use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::protocol::message::Message;
use crate::protocol::text::FRAME_DELIMITER;
use crate::transport::{RawFrame, RecvOutcome};

const READ_BUFFER_SIZE: usize = 1500;

pub struct TcpTransport {
    stream: TcpStream,
    /// Bytes read but not yet terminated by CRLF. A frame can straddle
    /// reads, so this accumulator lives as long as the connection.
    received: BytesMut,
}

impl TcpTransport {
    pub async fn connect(server_addr: SocketAddr) -> anyhow::Result<TcpTransport> {
        let stream = TcpStream::connect(server_addr).await?;
        debug!(%server_addr, "connected");
        Ok(TcpTransport {
            stream,
            received: BytesMut::new(),
        })
    }

    /// Serializes the message's textual form and writes it as one frame.
    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        let frame = msg.ser_tcp();
        trace!(frame = frame.trim_end(), "sending frame");
        self.stream.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Reads once from the stream and pushes every completed frame, with
    /// the delimiter stripped, onto the inbound queue. A read of zero bytes
    /// means the peer closed the connection.
    pub async fn recv_into(
        &mut self,
        inbound: &mut VecDeque<RawFrame>,
    ) -> anyhow::Result<RecvOutcome> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            debug!("server closed the connection");
            return Ok(RecvOutcome::PeerClosed);
        }
        self.received.extend_from_slice(&buf[..n]);

        while let Some(pos) = find_delimiter(&self.received) {
            let frame = self.received.split_to(pos);
            self.received.advance(FRAME_DELIMITER.len());
            trace!(len = frame.len(), "received frame");
            inbound.push_back(RawFrame {
                data: frame.to_vec(),
                from: None,
            });
        }
        Ok(RecvOutcome::Frames)
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}


#[cfg(test)]
mod test {
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (transport, accept) =
            tokio::join!(TcpTransport::connect(addr), listener.accept());
        let (peer, _) = accept.unwrap();
        (transport.unwrap(), peer)
    }

    #[tokio::test]
    async fn test_frame_straddles_reads() {
        let (mut transport, mut peer) = connected_pair().await;
        let mut inbound = VecDeque::new();

        peer.write_all(b"MSG FROM a IS hi\r\nMSG FR").await.unwrap();
        transport.recv_into(&mut inbound).await.unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound.pop_front().unwrap().data, b"MSG FROM a IS hi");

        peer.write_all(b"OM b IS yo\r\n").await.unwrap();
        transport.recv_into(&mut inbound).await.unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound.pop_front().unwrap().data, b"MSG FROM b IS yo");
    }

    #[tokio::test]
    async fn test_multiple_frames_in_one_read() {
        let (mut transport, mut peer) = connected_pair().await;
        let mut inbound = VecDeque::new();

        peer.write_all(b"REPLY OK IS hi\r\nBYE\r\n").await.unwrap();
        transport.recv_into(&mut inbound).await.unwrap();
        assert_eq!(inbound.len(), 2);
        assert_eq!(inbound.pop_front().unwrap().data, b"REPLY OK IS hi");
        assert_eq!(inbound.pop_front().unwrap().data, b"BYE");
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (mut transport, peer) = connected_pair().await;
        let mut inbound = VecDeque::new();

        drop(peer);
        let outcome = transport.recv_into(&mut inbound).await.unwrap();
        assert!(matches!(outcome, RecvOutcome::PeerClosed));
        assert!(inbound.is_empty());
    }

    #[tokio::test]
    async fn test_send_writes_textual_frame() {
        let (mut transport, mut peer) = connected_pair().await;

        let msg = Message::Bye { id: crate::protocol::message::MessageId::ZERO };
        transport.send(&msg).await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"BYE\r\n");
    }
}
