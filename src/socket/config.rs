//! Socket creation options (§6 "Configuration options recognized at socket
//! creation").

use crate::protocol::DEFAULT_MSG_LIMIT;

/// Options recognized when a [`crate::socket::client::ClientSocket`] or
/// [`crate::socket::server::ServerSocket`] is created.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// `listen()` queue length.
    pub backlog: u32,
    /// Max distinct client IPs on a server.
    pub client_limit: u32,
    /// Per-socket write-queue cap, in bytes.
    pub msg_limit: u32,
    /// Remote port (client after connect) or local bind port (server).
    pub port: u16,
    /// Remote host, client mode only; `None` means the caller supplies an
    /// IP literal or already-resolved address directly.
    pub address: Option<String>,
    /// Allow more than one connection per distinct client IP.
    pub multi_connect: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            backlog: 10,
            client_limit: 1024,
            msg_limit: DEFAULT_MSG_LIMIT,
            port: 0,
            address: None,
            multi_connect: false,
        }
    }
}

impl SocketConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_client_limit(mut self, client_limit: u32) -> Self {
        self.client_limit = client_limit;
        self
    }

    pub fn with_msg_limit(mut self, msg_limit: u32) -> Self {
        self.msg_limit = msg_limit;
        self
    }

    pub fn with_multi_connect(mut self, multi_connect: bool) -> Self {
        self.multi_connect = multi_connect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SocketConfig::default();
        assert_eq!(cfg.backlog, 10);
        assert_eq!(cfg.client_limit, 1024);
        assert_eq!(cfg.msg_limit, 1024 * 1024);
    }
}
