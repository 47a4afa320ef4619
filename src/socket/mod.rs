//! The socket state machine, its configuration, and the callback plumbing
//! shared by client and server-side connections.

mod callback;
pub mod client;
pub mod config;
pub mod server;

pub use callback::Callback;
pub use config::SocketConfig;

/// The socket's lifecycle state (§3, §6 "Feedback states").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Disconnected = 0,
    Connecting = 1,
    ConnectingTls = 2,
    Connected = 3,
}

/// Socket flags, a bit set over the options in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketFlags(u32);

impl SocketFlags {
    const SERVER: u32 = 0b0000_0001;
    const TLS: u32 = 0b0000_0010;
    const MULTI_CONNECT: u32 = 0b0000_0100;
    const ASYNC_RESOLVE: u32 = 0b0000_1000;
    const TLS_NO_VERIFY: u32 = 0b0001_0000;
    const LOG_ALL: u32 = 0b0010_0000;

    pub const fn empty() -> Self {
        SocketFlags(0)
    }
    pub const fn server() -> Self {
        SocketFlags(Self::SERVER)
    }
    pub const fn tls() -> Self {
        SocketFlags(Self::TLS)
    }
    pub const fn multi_connect() -> Self {
        SocketFlags(Self::MULTI_CONNECT)
    }
    pub const fn async_resolve() -> Self {
        SocketFlags(Self::ASYNC_RESOLVE)
    }
    pub const fn tls_no_verify() -> Self {
        SocketFlags(Self::TLS_NO_VERIFY)
    }
    pub const fn log_all() -> Self {
        SocketFlags(Self::LOG_ALL)
    }

    pub const fn contains(self, other: SocketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: SocketFlags) -> SocketFlags {
        SocketFlags(self.0 | other.0)
    }

    pub fn is_server(self) -> bool {
        self.contains(SocketFlags::server())
    }
    pub fn is_tls(self) -> bool {
        self.contains(SocketFlags::tls())
    }
    pub fn is_multi_connect(self) -> bool {
        self.contains(SocketFlags::multi_connect())
    }
    pub fn is_tls_no_verify(self) -> bool {
        self.contains(SocketFlags::tls_no_verify())
    }
}

impl std::ops::BitOr for SocketFlags {
    type Output = SocketFlags;
    fn bitor(self, rhs: SocketFlags) -> SocketFlags {
        self.union(rhs)
    }
}
