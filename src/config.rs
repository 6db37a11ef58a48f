use std::time::Duration;

/// The transport protocol a session runs on. The two variants differ far
/// beyond the socket type: datagram sessions carry their own acknowledgement
/// and retransmission layer, stream sessions rely on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportKind,
    /// server IPv4 address or host name
    pub server: String,
    pub port: u16,
    /// how long to wait for a datagram confirmation before retransmitting
    pub confirm_timeout: Duration,
    /// retransmission budget per message, the initial send not counted
    pub max_retransmissions: u32,
}

impl ClientConfig {
    pub fn new(transport: TransportKind, server: impl Into<String>) -> ClientConfig {
        ClientConfig {
            transport,
            server: server.into(),
            port: 4567,
            confirm_timeout: Duration::from_millis(250),
            max_retransmissions: 3,
        }
    }
}
