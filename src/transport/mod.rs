pub mod tcp;
pub mod udp;

use std::collections::VecDeque;
use std::net::SocketAddr;

use anyhow::anyhow;

use crate::config::{ClientConfig, TransportKind};
use crate::transport::tcp::TcpTransport;
use crate::transport::udp::UdpTransport;

/// A server-sourced frame before protocol decoding: one datagram for UDP,
/// one delimiter-stripped line for TCP.
pub struct RawFrame {
    pub data: Vec<u8>,
    /// datagram source address; `None` on the stream transport
    pub from: Option<SocketAddr>,
}

pub enum RecvOutcome {
    Frames,
    /// the stream peer closed the connection (zero-byte read)
    PeerClosed,
}

/// The two transports diverge substantially (acknowledgement layer versus
/// stream framing), so they are a tagged sum rather than a trait object;
/// the engine matches on the variant where behavior differs.
pub enum Transport {
    Tcp(TcpTransport),
    Udp(UdpTransport),
}

impl Transport {
    pub async fn connect(config: &ClientConfig) -> anyhow::Result<Transport> {
        let server_addr = resolve_server_addr(&config.server, config.port).await?;
        match config.transport {
            TransportKind::Tcp => Ok(Transport::Tcp(TcpTransport::connect(server_addr).await?)),
            TransportKind::Udp => Ok(Transport::Udp(
                UdpTransport::bind(server_addr, config.confirm_timeout, config.max_retransmissions)
                    .await?,
            )),
        }
    }

    /// One receive step for the event loop: blocks until the socket yields
    /// something, then pushes zero or more raw frames onto the queue.
    pub async fn recv_into(
        &mut self,
        inbound: &mut VecDeque<RawFrame>,
    ) -> anyhow::Result<RecvOutcome> {
        match self {
            Transport::Tcp(tcp) => tcp.recv_into(inbound).await,
            Transport::Udp(udp) => {
                udp.recv_into(inbound).await?;
                Ok(RecvOutcome::Frames)
            }
        }
    }
}

/// Resolves the server to an IPv4 socket address; a literal address parses
/// without a lookup.
async fn resolve_server_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    addrs
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| anyhow!("no IPv4 address found for {}", host))
}
