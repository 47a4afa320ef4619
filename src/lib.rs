//! Non-blocking TCP socket engine with optional TLS, server-side client
//! fan-out, a framed message protocol, and an asynchronous DNS resolver.
//!
//! The event loop in [`engine`] is the entry point: it owns the `mio`
//! poller, the token-keyed connection table, and the DNS resolver's wakeup
//! plumbing. [`socket::client::ClientSocket`] is a single TCP connection
//! (client-initiated or server-accepted); [`socket::server::ServerSocket`]
//! is a listening socket and its client graph.

mod addr;
mod dns;
mod engine;
mod error;
mod protocol;
mod queue;
mod socket;
#[cfg(feature = "tls")]
mod tls;

pub use addr::{host_to_net_long, host_to_net_short, net_to_host_long, net_to_host_short, Address, AddressKind};
pub use dns::{DnsEntry, NetErrorKind, Query, ResolveEvent, Resolver};
pub use engine::Engine;
pub use error::{NetError, Result};
pub use protocol::{crc32, encode, FrameEvent, FrameReader, DEFAULT_MSG_LIMIT};
pub use queue::ByteQueue;
pub use socket::client::{Busy, ClientSocket};
pub use socket::server::{AcceptOutcome, ClientRecord, ServerSocket};
pub use socket::{Callback, SocketConfig, SocketFlags, State};

#[cfg(feature = "tls")]
pub use tls::{client_context, server_context, server_context_self_signed};
