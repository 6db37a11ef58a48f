use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use rustc_hash::FxHashSet;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::protocol::message::{Message, MessageId};
use crate::transport::RawFrame;

/// Large enough for the biggest legal message (1400 bytes of content plus
/// header and display name); anything bigger is truncated by the kernel and
/// rejected by the decoder.
const MAX_DATAGRAM_SIZE: usize = 1500;

pub struct UdpTransport {
    socket: UdpSocket,
    /// configured server address; AUTH is sent here
    server_addr: SocketAddr,
    /// per-session server port, learned from the source address of the
    /// confirmation that acknowledges AUTH
    response_addr: Option<SocketAddr>,
    confirm_timeout: Duration,
    max_retransmissions: u32,
    /// inbound ids already delivered; duplicates are re-confirmed but not
    /// acted upon
    seen_ids: FxHashSet<MessageId>,
}

impl UdpTransport {
    pub async fn bind(
        server_addr: SocketAddr,
        confirm_timeout: Duration,
        max_retransmissions: u32,
    ) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        debug!(%server_addr, local = %socket.local_addr()?, "datagram socket bound");
        Ok(UdpTransport {
            socket,
            server_addr,
            response_addr: None,
            confirm_timeout,
            max_retransmissions,
            seen_ids: FxHashSet::default(),
        })
    }

    pub fn max_retransmissions(&self) -> u32 {
        self.max_retransmissions
    }

    /// Where outbound traffic goes: the configured address until the
    /// per-session port is known, that port afterwards.
    pub fn target(&self) -> SocketAddr {
        self.response_addr.unwrap_or(self.server_addr)
    }

    /// Records the per-session server port. Only the first call counts;
    /// later datagram sources do not move the session.
    pub fn learn_response_addr(&mut self, addr: SocketAddr) {
        if self.response_addr.is_none() {
            debug!(%addr, "learned per-session server address");
            self.response_addr = Some(addr);
        }
    }

    pub fn already_seen(&self, id: MessageId) -> bool {
        self.seen_ids.contains(&id)
    }

    pub fn mark_seen(&mut self, id: MessageId) {
        self.seen_ids.insert(id);
    }

    pub async fn send_message(&self, msg: &Message, to: SocketAddr) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        msg.ser_udp(&mut buf);
        trace!(id = %msg.id(), ?to, "sending datagram");
        self.socket.send_to(&buf, to).await?;
        Ok(())
    }

    /// Confirms delivery of an inbound message. Falls back to the frame's
    /// own source while the per-session address is not known yet.
    pub async fn send_confirm(&self, ref_id: MessageId, source: SocketAddr) -> anyhow::Result<()> {
        let to = self.response_addr.unwrap_or(source);
        self.send_message(&Message::Confirm { ref_id }, to).await
    }

    /// Waits for one datagram, bounded by the confirmation timeout.
    /// `Ok(None)` means the timeout elapsed.
    pub async fn recv_timeout(&self) -> anyhow::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match tokio::time::timeout(self.confirm_timeout, self.socket.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok((len, from))) => Ok(Some((buf[..len].to_vec(), from))),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// Waits for one datagram without a deadline (the event loop's receive
    /// path) and pushes it onto the inbound queue.
    pub async fn recv_into(&self, inbound: &mut VecDeque<RawFrame>) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        trace!(len, %from, "received datagram");
        inbound.push_back(RawFrame {
            data: buf[..len].to_vec(),
            from: Some(from),
        });
        Ok(())
    }
}
