//! The event loop: owns `mio::Poll`, the token space, the connection table,
//! the listening sockets, the DNS resolver's wakeup channel, and the TLS
//! contexts shared across connections (§4.1, §4.2, §4.5.1, §4.6.1).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace, warn};
use mio::{Events, Poll, Token, Waker};

#[cfg(feature = "tls")]
use openssl::ssl::SslContext;

use crate::addr::Address;
use crate::dns::{ResolveEvent, Resolver};
use crate::error::{from_io_error, NetError, Result};
use crate::socket::client::ClientSocket;
use crate::socket::server::{AcceptOutcome, ServerSocket};
use crate::socket::{SocketConfig, SocketFlags};

/// Reserved token the DNS resolver's completion channel wakes on; real
/// sockets are allocated tokens starting above this value.
const DNS_WAKE_TOKEN: Token = Token(0);
const FIRST_SOCKET_TOKEN: usize = 1;

enum Connection {
    Client(ClientSocket),
    Server(ServerSocket),
}

/// The engine's top-level run loop and connection table: the one piece of
/// `Registry`-owning state every socket operation ultimately goes through.
pub struct Engine {
    poll: Poll,
    waker: std::sync::Arc<Waker>,
    events: Events,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    resolver: Resolver,
    #[cfg(feature = "tls")]
    client_tls_ctx: Option<SslContext>,
}

impl Engine {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = std::sync::Arc::new(Waker::new(poll.registry(), DNS_WAKE_TOKEN)?);
        let mut resolver = Resolver::new();
        resolver.set_waker(waker.clone());
        Ok(Engine {
            poll,
            waker,
            events: Events::with_capacity(1024),
            connections: HashMap::new(),
            next_token: FIRST_SOCKET_TOKEN,
            resolver,
            #[cfg(feature = "tls")]
            client_tls_ctx: None,
        })
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Installs the default client-role TLS context (system trust store,
    /// verification on) used by [`Engine::connect`] when `flags` requests
    /// TLS. Call again to replace it (e.g. with a `no_verify` context).
    #[cfg(feature = "tls")]
    pub fn set_client_tls_context(&mut self, ctx: SslContext) {
        self.client_tls_ctx = Some(ctx);
    }

    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    /// §4.5.1: validates inputs, skips DNS for an IP literal, resolves a
    /// hostname otherwise, performs the non-blocking `connect()`, and
    /// registers for read+write readiness. Returns the token the new
    /// connection is addressed by in every later engine call.
    pub fn connect(&mut self, host: &str, port: u16, flags: SocketFlags, config: SocketConfig) -> Result<Token> {
        if host.is_empty() || port == 0 {
            return Err(NetError::Args);
        }

        let address = if Address::is_literal(host) {
            Address::parse(host)?
        } else {
            self.resolver
                .resolve_name_blocking(host)
                .map_err(|_| NetError::HostNotFound)?
                .addresses
                .first()
                .copied()
                .ok_or(NetError::HostNotFound)?
        };

        let sockaddr = SocketAddr::new(address.into(), port);
        let stream = mio::net::TcpStream::connect(sockaddr).map_err(from_io_error)?;
        let token = self.allocate_token();
        let mut conn = ClientSocket::new(token, stream, config.msg_limit, true, flags.is_tls());
        conn.register(self.poll.registry()).map_err(from_io_error)?;
        self.connections.insert(token, Connection::Client(conn));
        debug!("connect({host}:{port}) assigned {token:?}");
        Ok(token)
    }

    /// Binds and registers a listening socket; §4.6.1's accept path is
    /// driven later, once per `poll()` readiness event on its token.
    pub fn listen(&mut self, addr: SocketAddr, flags: SocketFlags, config: SocketConfig) -> Result<Token> {
        let token = self.allocate_token();
        let mut server = ServerSocket::bind(addr, token, flags, config).map_err(from_io_error)?;
        server.register(self.poll.registry()).map_err(from_io_error)?;
        self.connections.insert(token, Connection::Server(server));
        debug!("listen({addr}) assigned {token:?}");
        Ok(token)
    }

    pub fn client(&self, token: Token) -> Option<&ClientSocket> {
        match self.connections.get(&token) {
            Some(Connection::Client(c)) => Some(c),
            _ => None,
        }
    }

    pub fn client_mut(&mut self, token: Token) -> Option<&mut ClientSocket> {
        match self.connections.get_mut(&token) {
            Some(Connection::Client(c)) => Some(c),
            _ => None,
        }
    }

    pub fn server(&self, token: Token) -> Option<&ServerSocket> {
        match self.connections.get(&token) {
            Some(Connection::Server(s)) => Some(s),
            _ => None,
        }
    }

    pub fn server_mut(&mut self, token: Token) -> Option<&mut ServerSocket> {
        match self.connections.get_mut(&token) {
            Some(Connection::Server(s)) => Some(s),
            _ => None,
        }
    }

    /// Removes and drops a connection's state after it reaches
    /// `Disconnected`, unlinking it from its server's client graph (if
    /// any) first (§4.6.3).
    pub fn remove(&mut self, token: Token) {
        self.connections.remove(&token);
        for conn in self.connections.values_mut() {
            if let Connection::Server(server) = conn {
                server.unlink_connection(token);
            }
        }
    }

    /// Blocks for up to `timeout` (or indefinitely, if `None`) and
    /// dispatches every readiness event, including accept loops and DNS
    /// completion drains. Returns the tokens that transitioned to
    /// `Disconnected` during this call so the caller can retire them (the
    /// caller decides when [`Engine::remove`] is appropriate; some callers
    /// want to inspect `last_error` first).
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Token>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut newly_disconnected = Vec::new();
        let mut accept_tokens = Vec::new();

        let events: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, is_readable, is_writable) in events {

            if token == DNS_WAKE_TOKEN {
                trace!("DNS wakeup fired");
                self.resolver.drain_completions();
                continue;
            }

            match self.connections.get(&token) {
                Some(Connection::Server(_)) if is_readable => accept_tokens.push(token),
                _ => {}
            }

            if matches!(self.connections.get(&token), Some(Connection::Client(_))) {
                let Some(Connection::Client(mut conn)) = self.connections.remove(&token) else {
                    unreachable!()
                };
                let registry = self.poll.registry();

                if is_writable {
                    #[cfg(feature = "tls")]
                    conn.on_writable(registry, self.client_tls_ctx.as_ref(), None);
                    #[cfg(not(feature = "tls"))]
                    conn.on_writable(registry);
                }
                if is_readable {
                    conn.on_readable(registry);
                    self.dispatch_incoming(&mut conn);
                }
                if conn.state() == crate::socket::State::Disconnected {
                    newly_disconnected.push(token);
                }
                self.connections.insert(token, Connection::Client(conn));
            }
        }

        for server_token in accept_tokens {
            self.accept_loop(server_token);
        }

        Ok(newly_disconnected)
    }

    /// Runs a connection's own `Incoming` callback, falling back to its
    /// parent server's `Incoming`, and finally to discarding the input, so
    /// a connection with neither can never busy-loop on readiness (§3,
    /// §4.5.3, §4.6.2).
    fn dispatch_incoming(&mut self, conn: &mut ClientSocket) {
        if conn.dispatch_incoming() {
            return;
        }
        if let Some(server_token) = conn.parent_server() {
            if let Some(Connection::Server(server)) = self.connections.get_mut(&server_token) {
                if server.dispatch_incoming_for(conn) {
                    return;
                }
            }
        }
        conn.drain_discard();
    }

    /// Drains a listening socket's accept queue (§4.6.1), registering each
    /// newly-accepted connection and starting its server-role TLS
    /// handshake if the listener requests TLS.
    fn accept_loop(&mut self, server_token: Token) {
        loop {
            let outcome = {
                let Some(Connection::Server(server)) = self.connections.get_mut(&server_token) else {
                    return;
                };
                let mut next_token = self.next_token;
                let result = server.accept_one(|| {
                    let t = Token(next_token);
                    next_token += 1;
                    t
                });
                self.next_token = next_token;
                result
            };

            let outcome = match outcome {
                Ok(Some(outcome)) => outcome,
                Ok(None) => break,
                Err(e) => {
                    warn!("accept() failed on {server_token:?}: {e}");
                    break;
                }
            };

            match outcome {
                AcceptOutcome::ClientLimitReached | AcceptOutcome::DuplicateConnectionRejected => {
                    continue;
                }
                AcceptOutcome::Accepted { token, conn, .. } => {
                    let mut conn = *conn;
                    conn.set_parent_server(server_token);
                    if let Err(e) = conn.register(self.poll.registry()) {
                        warn!("failed to register accepted connection {token:?}: {e}");
                        continue;
                    }
                    #[cfg(feature = "tls")]
                    {
                        let is_tls = self.server(server_token).map(|s| s.is_tls()).unwrap_or(false);
                        if is_tls {
                            let ctx = self.server(server_token).and_then(|s| s.tls_context.clone());
                            if let Some(ctx) = ctx {
                                conn.begin_server_tls_handshake(self.poll.registry(), &ctx);
                            }
                        }
                    }
                    // Fire before the new connection is reachable from any
                    // readiness event, so Feedback(CONNECTED) always
                    // precedes Incoming for it (§5 ordering invariant).
                    if let Some(Connection::Server(server)) = self.connections.get_mut(&server_token) {
                        server.notify_connected(token);
                    }
                    self.connections.insert(token, Connection::Client(conn));
                }
            }
        }
    }

    /// Kicks off async name resolution; completion is delivered through the
    /// resolver's callback after a future [`Engine::poll`] drains the DNS
    /// wakeup token.
    pub fn resolve_name_async(&mut self, host: impl Into<String>) -> Result<()> {
        self.resolver.resolve_name_async(host)
    }

    pub fn set_dns_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ResolveEvent) + Send + 'static,
    {
        self.resolver.set_callback(callback);
    }

    /// A cloneable handle other threads can use to wake this engine's
    /// `poll()` call (e.g. a resolver worker thread posting a completion).
    pub fn waker(&self) -> std::sync::Arc<Waker> {
        self.waker.clone()
    }
}
