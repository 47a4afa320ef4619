//! The closed error taxonomy shared by every layer of the engine.
//!
//! OS errors are translated to a [`NetError`] exactly once, at the
//! platform-shim boundary (socket syscalls via `mio`/`std::net`, or the TLS
//! library). Once translated, a `NetError` is carried as-is rather than
//! re-inspected further up the stack.

use std::io;

/// The engine's closed error enumeration.
///
/// Two members, [`NetError::Okay`]-equivalent conditions, are intentionally
/// absent: success is represented by `Ok(_)` everywhere in this crate's
/// idiomatic Rust API rather than by a zero-value error code.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("null or invalid argument")]
    Args,

    #[error("numeric parameter out of range")]
    OutOfRange,

    #[error("operation not valid in the current socket state")]
    InvalidState,

    #[error("wire data violated the message protocol")]
    InvalidData,

    #[error("peer closed the connection")]
    Disconnected,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("host unreachable")]
    HostUnreachable,

    #[error("operation timed out")]
    TimedOut,

    #[error("connection aborted")]
    ConnectionAborted,

    #[error("write would exceed the configured message limit")]
    BufferOverflow,

    #[error("message exceeds the OS transport's maximum size")]
    DataSize,

    #[error("user callback requested termination")]
    Terminate,

    #[error("operation not supported on this build")]
    NoSupport,

    #[error("host name could not be resolved")]
    HostNotFound,

    #[error("operation failed")]
    Failed,

    #[error("system call failed: {0}")]
    SystemCall(#[source] io::Error),
}

impl NetError {
    /// True for conditions the engine treats as recoverable: the caller
    /// should keep servicing the connection rather than tear it down.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NetError::BufferOverflow)
    }
}

/// Translates an OS error into the closed taxonomy. This is the single
/// point where `errno`/`WSAGetLastError`-shaped values cross into
/// [`NetError`]; every other layer treats `NetError` as opaque.
pub fn from_io_error(err: io::Error) -> NetError {
    use io::ErrorKind::*;
    match err.kind() {
        WouldBlock => NetError::Failed, // caller should treat Ok(0)/retry, see would_block()
        ConnectionRefused => NetError::ConnectionRefused,
        ConnectionAborted => NetError::ConnectionAborted,
        ConnectionReset | BrokenPipe | UnexpectedEof => NetError::Disconnected,
        TimedOut => NetError::TimedOut,
        NotConnected => NetError::InvalidState,
        InvalidInput | InvalidData => NetError::Args,
        _ => {
            #[cfg(unix)]
            {
                if let Some(raw) = err.raw_os_error() {
                    match raw {
                        libc::ENETUNREACH | libc::ENETDOWN => return NetError::NetworkUnreachable,
                        libc::EHOSTUNREACH => return NetError::HostUnreachable,
                        libc::EMSGSIZE => return NetError::DataSize,
                        libc::ENOBUFS | libc::ENOMEM => return NetError::BufferOverflow,
                        _ => {}
                    }
                }
            }
            NetError::SystemCall(err)
        }
    }
}

/// Returns `true` when an I/O error is the non-fatal "would block" signal
/// that the base spec maps to a benign, non-terminal condition.
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        from_io_error(err)
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
