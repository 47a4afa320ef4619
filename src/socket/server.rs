//! The server/client graph: the listening socket, per-IP client record
//! aggregation, and the accept path (§3, §4.6.1, §4.6.3).

use std::io;
use std::net::SocketAddr;

use log::debug;
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};

#[cfg(feature = "tls")]
use openssl::ssl::SslContext;

use crate::addr::Address;
use crate::error::{NetError, Result};

use super::callback::Callback;
use super::client::{ClientSocket, IncomingFn, OutgoingFn};
use super::config::SocketConfig;
use super::{SocketFlags, State};

/// A server-level `Feedback`, fired for the listening socket's own
/// lifecycle events — currently just a newly-accepted connection reaching
/// `Connected` (§4.6.1 step 6) — keyed by the new connection's token since
/// one server fans out to many per-connection sockets.
pub type ServerFeedbackFn = dyn FnMut(Token, State) + Send;

/// One unique remote IP address connected to a server socket, and every
/// per-connection socket accepted from it (§3 "Client record").
#[derive(Debug, Default)]
pub struct ClientRecord {
    pub ip: Address,
    pub connections: Vec<Token>,
}

impl ClientRecord {
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }
}

/// The result of a single accept attempt (§4.6.1).
pub enum AcceptOutcome {
    /// A new per-connection socket was created and linked into its client
    /// record (new or existing).
    Accepted { token: Token, client_index: usize, is_new_client: bool, conn: Box<ClientSocket> },
    /// Rejected: the server is at `client_limit` (new IP) capacity.
    ClientLimitReached,
    /// Rejected: `MULTI_CONNECT` is off and this IP already has a
    /// connection.
    DuplicateConnectionRejected,
}

/// A listening socket: owns the accept queue and the full client graph.
pub struct ServerSocket {
    listener: TcpListener,
    token: Token,
    flags: SocketFlags,
    config: SocketConfig,
    clients: Vec<ClientRecord>,
    total_clients: u32,
    #[cfg(feature = "tls")]
    pub tls_context: Option<SslContext>,
    /// Fired for a newly-accepted connection before it can receive any
    /// `Incoming` dispatch (§4.6.1 step 6, §5 ordering invariant).
    pub feedback: Option<Callback<ServerFeedbackFn>>,
    /// Fallback `Incoming` for per-connection sockets that have none of
    /// their own (§3, §4.6.2).
    pub incoming: Option<Callback<IncomingFn>>,
    /// Fallback `Outgoing` for per-connection sockets that have none of
    /// their own (§3).
    pub outgoing: Option<Callback<OutgoingFn>>,
}

impl ServerSocket {
    pub fn bind(addr: SocketAddr, token: Token, flags: SocketFlags, config: SocketConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(ServerSocket {
            listener,
            token,
            flags,
            config,
            clients: Vec::new(),
            total_clients: 0,
            #[cfg(feature = "tls")]
            tls_context: None,
            feedback: None,
            incoming: None,
            outgoing: None,
        })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.listener, self.token, Interest::READABLE)
    }

    pub fn total_clients(&self) -> u32 {
        self.total_clients
    }

    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    pub fn is_tls(&self) -> bool {
        self.flags.is_tls()
    }

    /// Accepts exactly one pending connection (the engine loops this until
    /// `WouldBlock`), mutating the client graph per §4.6.1.
    ///
    /// `make_token` allocates a fresh `Token` for the new per-connection
    /// socket; the caller (the engine) owns token-space bookkeeping.
    pub fn accept_one(
        &mut self,
        make_token: impl FnOnce() -> Token,
    ) -> io::Result<Option<AcceptOutcome>> {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        };

        if self.total_clients >= self.config.client_limit {
            debug!("server at client_limit ({}); rejecting {peer}", self.config.client_limit);
            drop(stream);
            return Ok(Some(AcceptOutcome::ClientLimitReached));
        }

        let ip = Address::from(peer.ip());
        let existing = self.clients.iter().position(|c| c.ip == ip);

        let (client_index, is_new_client) = match existing {
            Some(idx) => {
                if !self.flags.is_multi_connect() {
                    debug!("MULTI_CONNECT disabled; rejecting duplicate connection from {ip}");
                    drop(stream);
                    return Ok(Some(AcceptOutcome::DuplicateConnectionRejected));
                }
                (idx, false)
            }
            None => {
                self.clients.push(ClientRecord { ip, connections: Vec::new() });
                self.total_clients += 1;
                (self.clients.len() - 1, true)
            }
        };

        let token = make_token();
        let conn = ClientSocket::new(token, stream, self.config.msg_limit, false, self.flags.is_tls());
        self.clients[client_index].connections.push(token);

        Ok(Some(AcceptOutcome::Accepted {
            token,
            client_index,
            is_new_client,
            conn: Box::new(conn),
        }))
    }

    /// Runs the server `Feedback` callback for a newly-accepted connection
    /// reaching `Connected`. The engine calls this right after registering
    /// the connection, before it is reachable from any readiness event, so
    /// `Feedback(CONNECTED)` always precedes `Incoming` for that socket
    /// (§4.6.1 step 6, §5 ordering invariant).
    pub fn notify_connected(&mut self, token: Token) {
        let mut cb = self.feedback.take();
        if let Some(cb_ref) = cb.as_mut() {
            if cb_ref.is_alive() {
                (cb_ref.func_mut())(token, State::Connected);
            }
        }
        self.feedback = cb;
    }

    /// Runs this server's `Incoming` callback against a per-connection
    /// socket that has none of its own. Returns `true` if it ran; the
    /// caller falls back further to `drain_discard` when it doesn't
    /// (§3 "falling back to the server socket's", §4.6.2).
    pub fn dispatch_incoming_for(&mut self, conn: &mut ClientSocket) -> bool {
        let mut cb = self.incoming.take();
        let mut ran = false;
        if let Some(cb_ref) = cb.as_mut() {
            if cb_ref.is_alive() {
                ran = true;
                match (cb_ref.func_mut())(conn) {
                    Ok(()) => {}
                    Err(NetError::Terminate) => conn.disconnect(),
                    Err(_) => {}
                }
            }
        }
        self.incoming = cb;
        ran
    }

    /// Unlinks `token` from its client record (§4.6.3). Returns `true` when
    /// the client record became empty and was destroyed, decrementing
    /// `total_clients`.
    pub fn unlink_connection(&mut self, token: Token) -> bool {
        let mut emptied_index = None;
        for (idx, record) in self.clients.iter_mut().enumerate() {
            if let Some(pos) = record.connections.iter().position(|t| *t == token) {
                record.connections.remove(pos);
                if record.connections.is_empty() {
                    emptied_index = Some(idx);
                }
                break;
            }
        }
        if let Some(idx) = emptied_index {
            self.clients.remove(idx);
            self.total_clients -= 1;
            true
        } else {
            false
        }
    }

    pub fn client_of(&self, token: Token) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.connections.contains(&token))
    }

    pub fn client_index_of(&self, ip: Address) -> Option<usize> {
        self.clients.iter().position(|c| c.ip == ip)
    }

    pub fn disconnect_client(&mut self, client_index: usize) -> Vec<Token> {
        if client_index >= self.clients.len() {
            return Vec::new();
        }
        let record = self.clients.remove(client_index);
        self.total_clients -= 1;
        record.connections
    }

    pub fn local_ip_address(&self) -> Result<Address> {
        self.local_addr().map(|a| Address::from(a.ip())).map_err(|_| NetError::Failed)
    }
}
