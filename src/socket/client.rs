//! The client-mode (and per-connection, server-side) socket state machine:
//! connect progression, the queued write path, the callback-driven read
//! path and TLS integration (§4.5, §4.6.2).

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use log::{debug, trace, warn};
use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Registry, Token};

#[cfg(feature = "tls")]
use openssl::ssl::{MidHandshakeSslStream, SslContext, SslStream};

use crate::error::{from_io_error, would_block, NetError, Result};
use crate::protocol::{self, FrameEvent, FrameReader};
use crate::queue::ByteQueue;
#[cfg(feature = "tls")]
use crate::tls;

use super::callback::Callback;
use super::State;

/// Bounded chunk size used to drain the write queue per write-ready event
/// (§4.5.4); TLS imposes its own record-size ceiling on top of this.
pub const WRITE_CHUNK: usize = 16 * 1024;

pub type IncomingFn = dyn FnMut(&mut ClientSocket) -> Result<()> + Send;
pub type OutgoingFn = dyn FnMut(&mut ClientSocket) -> Result<()> + Send;
pub type FeedbackFn = dyn FnMut(State) + Send;

/// Per-socket TLS activity flag (§4.4 "Busy states"), kept outside the
/// `tls` module so the socket state machine's shape doesn't change between
/// TLS-enabled and TLS-disabled builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    NotBusy,
    #[cfg_attr(not(feature = "tls"), allow(dead_code))]
    HandshakeRead,
    #[cfg_attr(not(feature = "tls"), allow(dead_code))]
    HandshakeWrite,
}

/// The underlying transport, progressing from a plain stream through an
/// (optional) in-progress TLS handshake to an established TLS stream.
enum Transport {
    Plain(MioTcpStream),
    #[cfg(feature = "tls")]
    TlsHandshaking(MidHandshakeSslStream<MioTcpStream>),
    #[cfg(feature = "tls")]
    TlsEstablished(SslStream<MioTcpStream>),
    /// Transport has been torn down; only reachable between `disconnect`
    /// and the struct's own drop.
    Closed,
}

impl Transport {
    fn source(&mut self) -> Option<&mut MioTcpStream> {
        match self {
            Transport::Plain(s) => Some(s),
            #[cfg(feature = "tls")]
            Transport::TlsHandshaking(mid) => Some(mid.get_mut()),
            #[cfg(feature = "tls")]
            Transport::TlsEstablished(s) => Some(s.get_mut()),
            Transport::Closed => None,
        }
    }
}

/// A single TCP connection: the base spec's `Socket` in client mode, or a
/// server's per-connection socket (§3 "Per-connection socket"). Both share
/// this type; the server/client graph owns the distinction.
pub struct ClientSocket {
    pub(crate) token: Token,
    transport: Transport,
    state: State,
    tls_requested: bool,
    tls_busy: Busy,
    msg_limit: u32,
    write_queue: ByteQueue,
    frame_reader: FrameReader,
    write_interest: bool,
    in_use: u32,
    terminating: bool,
    last_error: Option<NetError>,
    /// The listening socket this connection was accepted from, if any.
    /// `None` for client-initiated connections. Used to fall back to the
    /// server's `Incoming` callback when this socket has none of its own
    /// (§3 "falling back to the server socket's", §4.6.2).
    parent_server: Option<Token>,
    pub feedback: Option<Callback<FeedbackFn>>,
    pub incoming: Option<Callback<IncomingFn>>,
    pub outgoing: Option<Callback<OutgoingFn>>,
}

impl ClientSocket {
    /// Wraps a freshly (non-blocking) connected or accepted stream,
    /// starting in `Connecting` (client-initiated) or `Connected`
    /// (server-accepted) state depending on `connecting`.
    pub(crate) fn new(
        token: Token,
        stream: MioTcpStream,
        msg_limit: u32,
        connecting: bool,
        tls_requested: bool,
    ) -> Self {
        ClientSocket {
            token,
            transport: Transport::Plain(stream),
            state: if connecting { State::Connecting } else { State::Connected },
            tls_requested: tls_requested && cfg!(feature = "tls"),
            tls_busy: Busy::NotBusy,
            msg_limit,
            write_queue: ByteQueue::new(),
            frame_reader: FrameReader::new(msg_limit),
            write_interest: connecting,
            in_use: 0,
            terminating: false,
            last_error: None,
            parent_server: None,
            feedback: None,
            incoming: None,
            outgoing: None,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Records the listening socket this connection was accepted from.
    /// Only the engine calls this, once, right after `accept_one` hands
    /// back the new connection.
    pub(crate) fn set_parent_server(&mut self, token: Token) {
        self.parent_server = Some(token);
    }

    pub fn parent_server(&self) -> Option<Token> {
        self.parent_server
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn last_error(&self) -> Option<&NetError> {
        self.last_error.as_ref()
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub fn mark_terminating(&mut self) {
        self.terminating = true;
    }

    pub fn peer_addr(&mut self) -> io::Result<SocketAddr> {
        self.transport.source().map_or(Err(io::Error::from(io::ErrorKind::NotConnected)), |s| s.peer_addr())
    }

    /// The readiness this socket currently needs, per §8 invariant 4/5 and
    /// the TLS busy-state direction flip (§4.4/§9). `None` means the
    /// connection no longer needs to be polled (disconnected).
    pub fn desired_interest(&self) -> Option<Interest> {
        match self.state {
            State::Disconnected => None,
            State::Connecting => Some(Interest::READABLE.add(Interest::WRITABLE)),
            State::ConnectingTls => Some(match self.tls_busy {
                Busy::HandshakeWrite => Interest::WRITABLE,
                _ => Interest::READABLE,
            }),
            State::Connected => {
                if self.write_interest {
                    Some(Interest::READABLE.add(Interest::WRITABLE))
                } else {
                    Some(Interest::READABLE)
                }
            }
        }
    }

    /// Registers this socket's current interest set with `registry`.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.token;
        if let Some(interest) = self.desired_interest() {
            if let Some(src) = self.transport.source() {
                registry.register(src, token, interest)?;
            }
        }
        Ok(())
    }

    /// Re-registers with the registry after the desired interest set may
    /// have changed (state transition, write queue drained, TLS busy-state
    /// flip).
    pub fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.token;
        match (self.desired_interest(), self.transport.source()) {
            (Some(interest), Some(src)) => registry.reregister(src, token, interest),
            (None, Some(src)) => registry.deregister(src),
            _ => Ok(()),
        }
    }

    fn set_state(&mut self, new_state: State) {
        if self.state == new_state {
            return;
        }
        debug!("socket {:?} {:?} -> {:?}", self.token, self.state, new_state);
        self.state = new_state;
        let mut cb = self.feedback.take();
        if let Some(cb) = cb.as_mut() {
            if cb.is_alive() {
                (cb.func_mut())(new_state);
            }
        }
        self.feedback = cb;
    }

    /// Step 4 of §4.5.1: called once the connect-completion readiness event
    /// fires. Queries the pending socket error and transitions accordingly.
    #[cfg(feature = "tls")]
    pub fn complete_connect(&mut self, registry: &Registry, tls_ctx: Option<&SslContext>, sni: Option<&str>) {
        debug_assert_eq!(self.state, State::Connecting);
        let Transport::Plain(stream) = &self.transport else { return };
        match stream.take_error() {
            Ok(None) => {
                self.write_interest = false;
                if self.tls_requested {
                    self.begin_tls_handshake(tls_ctx, sni);
                } else {
                    self.set_state(State::Connected);
                    self.flush_queued_writes();
                }
            }
            Ok(Some(err)) | Err(err) => {
                self.last_error = Some(from_io_error(err));
                self.set_state(State::Disconnected);
            }
        }
        let _ = self.reregister(registry);
    }

    #[cfg(not(feature = "tls"))]
    pub fn complete_connect(&mut self, registry: &Registry) {
        debug_assert_eq!(self.state, State::Connecting);
        let Transport::Plain(stream) = &self.transport else { return };
        match stream.take_error() {
            Ok(None) => {
                self.write_interest = false;
                self.set_state(State::Connected);
                self.flush_queued_writes();
            }
            Ok(Some(err)) | Err(err) => {
                self.last_error = Some(from_io_error(err));
                self.set_state(State::Disconnected);
            }
        }
        let _ = self.reregister(registry);
    }

    #[cfg(feature = "tls")]
    fn begin_tls_handshake(&mut self, ctx: Option<&SslContext>, sni: Option<&str>) {
        let Some(ctx) = ctx else {
            warn!("TLS requested but no context supplied; disconnecting");
            self.last_error = Some(NetError::InvalidState);
            self.set_state(State::Disconnected);
            return;
        };
        let Transport::Plain(_) = &self.transport else { return };
        let Transport::Plain(stream) = std::mem::replace(&mut self.transport, Transport::Closed)
        else {
            unreachable!()
        };
        match tls::start_client_handshake(ctx, sni, stream) {
            Ok(tls::HandshakeOutcome::Connected(s)) => {
                self.transport = Transport::TlsEstablished(s);
                self.tls_busy = Busy::NotBusy;
                self.set_state(State::Connected);
                self.flush_queued_writes();
            }
            Ok(tls::HandshakeOutcome::WouldBlock(mid, busy)) => {
                self.transport = Transport::TlsHandshaking(mid);
                self.tls_busy = busy;
                self.set_state(State::ConnectingTls);
            }
            Ok(tls::HandshakeOutcome::Failed(e)) | Err(e) => {
                self.last_error = Some(e);
                self.set_state(State::Disconnected);
            }
        }
    }

    /// Accepts a server-role handshake in place of a client-role one;
    /// server per-connection sockets call this instead of
    /// `complete_connect`.
    #[cfg(feature = "tls")]
    pub fn begin_server_tls_handshake(&mut self, registry: &Registry, ctx: &SslContext) {
        let Transport::Plain(_) = &self.transport else { return };
        let Transport::Plain(stream) = std::mem::replace(&mut self.transport, Transport::Closed)
        else {
            unreachable!()
        };
        match tls::start_server_handshake(ctx, stream) {
            Ok(tls::HandshakeOutcome::Connected(s)) => {
                self.transport = Transport::TlsEstablished(s);
                self.tls_busy = Busy::NotBusy;
                self.set_state(State::Connected);
            }
            Ok(tls::HandshakeOutcome::WouldBlock(mid, busy)) => {
                self.transport = Transport::TlsHandshaking(mid);
                self.tls_busy = busy;
                self.set_state(State::ConnectingTls);
            }
            Ok(tls::HandshakeOutcome::Failed(e)) | Err(e) => {
                self.last_error = Some(e);
                self.set_state(State::Disconnected);
            }
        }
        let _ = self.reregister(registry);
    }

    /// Resumes a parked handshake once its subscribed direction fires.
    #[cfg(feature = "tls")]
    fn resume_handshake(&mut self) {
        let Transport::TlsHandshaking(_) = &self.transport else { return };
        let Transport::TlsHandshaking(mid) = std::mem::replace(&mut self.transport, Transport::Closed)
        else {
            unreachable!()
        };
        match tls::resume_handshake(mid) {
            tls::HandshakeOutcome::Connected(s) => {
                self.transport = Transport::TlsEstablished(s);
                self.tls_busy = Busy::NotBusy;
                self.set_state(State::Connected);
                self.flush_queued_writes();
            }
            tls::HandshakeOutcome::WouldBlock(mid, busy) => {
                self.transport = Transport::TlsHandshaking(mid);
                self.tls_busy = busy;
            }
            tls::HandshakeOutcome::Failed(e) => {
                self.last_error = Some(e);
                self.set_state(State::Disconnected);
            }
        }
    }

    /// Entry point for a write-ready event (§4.5.1 step 4, §4.5.4 step 3).
    #[cfg(feature = "tls")]
    pub fn on_writable(&mut self, registry: &Registry, tls_ctx: Option<&SslContext>, sni: Option<&str>) {
        self.in_use += 1;
        match self.state {
            State::Connecting => self.complete_connect(registry, tls_ctx, sni),
            State::ConnectingTls => {
                if self.tls_busy == Busy::HandshakeWrite {
                    self.resume_handshake();
                }
            }
            State::Connected => self.drain_write_queue(),
            State::Disconnected => {}
        }
        let _ = self.reregister(registry);
        self.in_use -= 1;
    }

    #[cfg(not(feature = "tls"))]
    pub fn on_writable(&mut self, registry: &Registry) {
        self.in_use += 1;
        match self.state {
            State::Connecting => self.complete_connect(registry),
            State::ConnectingTls | State::Disconnected => {}
            State::Connected => self.drain_write_queue(),
        }
        let _ = self.reregister(registry);
        self.in_use -= 1;
    }

    /// Entry point for a read-ready event (§4.5.3, §4.6.2).
    ///
    /// The caller (the engine) follows this with `dispatch_incoming`, then
    /// the server-fallback and `drain_discard` steps it alone can see, so a
    /// connection with no callback of its own — and no server to fall back
    /// to — can't leave the socket readiness busy-looping.
    pub fn on_readable(&mut self, registry: &Registry) {
        self.in_use += 1;
        #[cfg(feature = "tls")]
        if self.state == State::ConnectingTls && self.tls_busy == Busy::HandshakeRead {
            self.resume_handshake();
        }
        let _ = self.reregister(registry);
        self.in_use -= 1;
    }

    /// Directly reads plaintext bytes into `buf` from the socket (through
    /// TLS if enabled), used by an `Incoming` callback.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != State::Connected {
            return Err(NetError::InvalidState);
        }
        match &mut self.transport {
            Transport::Plain(stream) => match stream.read(buf) {
                Ok(0) => Err(NetError::Disconnected),
                Ok(n) => Ok(n),
                Err(e) if would_block(&e) => Ok(0),
                Err(e) => Err(from_io_error(e)),
            },
            #[cfg(feature = "tls")]
            Transport::TlsEstablished(stream) => {
                let (outcome, recall) = tls::read_records(stream, buf);
                if recall {
                    trace!("re-arming read callback to drain TLS-buffered bytes");
                }
                match outcome {
                    tls::ReadOutcome::Read(n) => Ok(n),
                    tls::ReadOutcome::WouldBlock => Ok(0),
                    tls::ReadOutcome::Closed => Err(NetError::Disconnected),
                    tls::ReadOutcome::Err(e) => Err(e),
                }
            }
            _ => Err(NetError::InvalidState),
        }
    }

    /// Drains and discards any pending readable bytes, protecting against a
    /// misbehaving `Incoming` callback that neither reads nor terminates
    /// (§4.5.3).
    pub fn drain_discard(&mut self) {
        let mut scratch = [0u8; 4096];
        while let Ok(n) = self.read(&mut scratch) {
            if n == 0 {
                break;
            }
        }
    }

    /// Feeds freshly-read bytes into the framed-message reader and
    /// advances it, reading directly from the socket as needed (§4.6.4).
    pub fn read_msg(&mut self) -> Result<FrameEvent> {
        let want = self.frame_reader.want();
        let mut buf = vec![0u8; want];
        let n = self.read(&mut buf)?;
        if n > 0 {
            self.frame_reader.fill(&buf[..n]);
        }
        self.frame_reader.advance()
    }

    /// Encodes and writes a complete framed message (§4.6.4).
    pub fn write_msg(&mut self, payload: &[u8]) -> Result<()> {
        let wire = protocol::encode(payload, self.msg_limit)?;
        self.write(&wire)?;
        Ok(())
    }

    /// The unified outbound entry point (§4.5.4).
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if (self.write_queue.length() as u64) + buf.len() as u64 > self.msg_limit as u64 {
            return Err(NetError::BufferOverflow);
        }

        if self.state != State::Connected || !self.write_queue.is_empty() {
            self.enqueue(buf);
            return Ok(buf.len());
        }

        let sent = match &mut self.transport {
            Transport::Plain(stream) => match stream.write(buf) {
                Ok(n) => n,
                Err(e) if would_block(&e) => 0,
                Err(e) => return Err(from_io_error(e)),
            },
            #[cfg(feature = "tls")]
            Transport::TlsEstablished(stream) => match tls::write_records(stream, buf) {
                tls::WriteOutcome::Written(n) => n,
                tls::WriteOutcome::WouldBlock => 0,
                tls::WriteOutcome::NeedsRead => {
                    self.tls_busy = Busy::HandshakeRead;
                    0
                }
                tls::WriteOutcome::Err(e) => return Err(e),
            },
            _ => return Err(NetError::InvalidState),
        };

        if sent < buf.len() {
            self.enqueue(&buf[sent..]);
        }
        Ok(buf.len())
    }

    fn enqueue(&mut self, buf: &[u8]) {
        self.write_queue.compact();
        self.write_queue.push(buf);
        self.write_interest = true;
    }

    /// Flushes data queued while `Disconnected`/`Connecting` once the
    /// socket transitions into `Connected` (§4.5.2).
    fn flush_queued_writes(&mut self) {
        if !self.write_queue.is_empty() {
            self.drain_write_queue();
        } else {
            self.write_interest = false;
        }
    }

    /// Drains the write queue in bounded chunks (§4.5.4 step 3), then runs
    /// the `Outgoing` callback if the queue emptied.
    fn drain_write_queue(&mut self) {
        while !self.write_queue.is_empty() {
            let chunk_len = self.write_queue.remaining().min(WRITE_CHUNK);
            let chunk = self.write_queue.unread()[..chunk_len].to_vec();
            let sent = match &mut self.transport {
                Transport::Plain(stream) => match stream.write(&chunk) {
                    Ok(n) => n,
                    Err(e) if would_block(&e) => break,
                    Err(_) => {
                        self.set_state(State::Disconnected);
                        return;
                    }
                },
                #[cfg(feature = "tls")]
                Transport::TlsEstablished(stream) => match tls::write_records(stream, &chunk) {
                    tls::WriteOutcome::Written(n) => n,
                    tls::WriteOutcome::WouldBlock => break,
                    tls::WriteOutcome::NeedsRead => {
                        self.tls_busy = Busy::HandshakeRead;
                        break;
                    }
                    tls::WriteOutcome::Err(_) => {
                        self.set_state(State::Disconnected);
                        return;
                    }
                },
                _ => return,
            };
            self.write_queue.consume(sent);
            if sent < chunk_len {
                break;
            }
        }

        if self.write_queue.is_empty() {
            self.run_outgoing();
            if self.write_queue.is_empty() {
                self.write_interest = self.outgoing.is_some();
            }
        }
    }

    fn run_outgoing(&mut self) {
        let mut cb = self.outgoing.take();
        if let Some(cb_ref) = cb.as_mut() {
            if cb_ref.is_alive() {
                match (cb_ref.func_mut())(self) {
                    Ok(()) => {}
                    Err(NetError::Terminate) => {
                        self.set_state(State::Disconnected);
                        return;
                    }
                    Err(_) => {
                        // Non-terminal error: callback is not retried but
                        // the connection keeps being serviced (§7).
                        return;
                    }
                }
            }
        }
        self.outgoing = cb;
    }

    /// Runs the `Incoming` callback if present and alive. Returns `true` if
    /// it ran. A connection with none of its own falls back first to its
    /// parent server's `Incoming` (§3, §4.6.2), and only then to discarding
    /// input so the event loop cannot spin (§4.5.3) — both steps are the
    /// caller's responsibility since only the engine can see the server.
    pub fn dispatch_incoming(&mut self) -> bool {
        let mut cb = self.incoming.take();
        let mut ran = false;
        if let Some(cb_ref) = cb.as_mut() {
            if cb_ref.is_alive() {
                ran = true;
                match (cb_ref.func_mut())(self) {
                    Ok(()) => {}
                    Err(NetError::Terminate) => {
                        self.incoming = None;
                        self.set_state(State::Disconnected);
                        return true;
                    }
                    Err(_) => {
                        self.incoming = None;
                        return true;
                    }
                }
            }
        }
        self.incoming = cb;
        ran
    }

    /// Graceful teardown: TLS shutdown (if established), then close.
    pub fn disconnect(&mut self) {
        #[allow(unused_mut)]
        let mut transport = std::mem::replace(&mut self.transport, Transport::Closed);
        #[cfg(feature = "tls")]
        if let Transport::TlsEstablished(ref mut stream) = transport {
            tls::shutdown(stream);
        }
        self.set_state(State::Disconnected);
    }
}
