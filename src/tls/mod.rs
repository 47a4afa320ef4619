//! The TLS integration layer: context setup, non-blocking handshake
//! progression, transparent record I/O and graceful shutdown, built on
//! `openssl` — the base spec's TLS section is phrased directly in that
//! library's vocabulary (`SSL_shutdown`, `SSL_pending`, `WANT_READ`).

use std::io;
use std::sync::Once;

use log::{debug, trace, warn};
use mio::net::TcpStream as MioTcpStream;
use openssl::ssl::{
    HandshakeError, MidHandshakeSslStream, Ssl, SslContext, SslFiletype, SslMethod, SslStream,
    SslVerifyMode,
};

use crate::error::{NetError, Result};
use crate::socket::client::Busy;

static INIT: Once = Once::new();

fn ensure_library_init() {
    INIT.call_once(|| {
        openssl::init();
    });
}

/// Builds a client-role [`SslContext`].
///
/// Verification is enabled by default, preferring the system trust store;
/// `ca_file`/`ca_dir` are tried as fallbacks in order, and if none load,
/// verification is disabled with a logged warning (mirroring the "SSL_NO_
/// VERIFY" escape hatch explicitly offered by the base spec).
pub fn client_context(
    no_verify: bool,
    ca_file: Option<&std::path::Path>,
    ca_dir: Option<&std::path::Path>,
) -> Result<SslContext> {
    ensure_library_init();
    let mut builder =
        SslContext::builder(SslMethod::tls_client()).map_err(|_| NetError::Failed)?;

    if no_verify {
        builder.set_verify(SslVerifyMode::NONE);
        return Ok(builder.build());
    }

    builder.set_verify(SslVerifyMode::PEER);
    let mut loaded_any = builder.set_default_verify_paths().is_ok();

    if !loaded_any {
        if let Some(file) = ca_file {
            loaded_any = builder.set_ca_file(file).is_ok();
        }
    }
    if !loaded_any {
        if let Some(dir) = ca_dir {
            loaded_any = builder.set_ca_file(dir).is_ok();
        }
    }
    if !loaded_any {
        warn!("no trust store loaded; disabling certificate verification");
        builder.set_verify(SslVerifyMode::NONE);
    }

    Ok(builder.build())
}

/// Builds a server-role [`SslContext`] with a provisioned certificate and
/// private key.
pub fn server_context(cert_file: &std::path::Path, key_file: &std::path::Path) -> Result<SslContext> {
    ensure_library_init();
    let mut builder =
        SslContext::builder(SslMethod::tls_server()).map_err(|_| NetError::Failed)?;
    builder
        .set_certificate_file(cert_file, SslFiletype::PEM)
        .map_err(|_| NetError::Failed)?;
    builder
        .set_private_key_file(key_file, SslFiletype::PEM)
        .map_err(|_| NetError::Failed)?;
    Ok(builder.build())
}

/// Builds a server-role [`SslContext`] with an ephemeral, self-signed
/// certificate synthesized on the fly.
///
/// This is explicitly a testing convenience in the base spec ("implementers
/// should mark this path as opt-in and never default-on") — callers must
/// request it by name, there is no implicit fallback to it.
pub fn server_context_self_signed() -> Result<SslContext> {
    ensure_library_init();
    warn!("synthesizing an ephemeral self-signed TLS certificate; testing use only");

    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509NameBuilder, X509};

    let rsa = Rsa::generate(2048).map_err(|_| NetError::Failed)?;
    let pkey = PKey::from_rsa(rsa).map_err(|_| NetError::Failed)?;

    let mut name_builder = X509NameBuilder::new().map_err(|_| NetError::Failed)?;
    name_builder
        .append_entry_by_text("CN", "netcore-ephemeral")
        .map_err(|_| NetError::Failed)?;
    let name = name_builder.build();

    let mut serial = BigNum::new().map_err(|_| NetError::Failed)?;
    serial
        .rand(64, MsbOption::MAYBE_ZERO, false)
        .map_err(|_| NetError::Failed)?;
    let serial = serial.to_asn1_integer().map_err(|_| NetError::Failed)?;

    let mut x509_builder = X509::builder().map_err(|_| NetError::Failed)?;
    x509_builder.set_version(2).map_err(|_| NetError::Failed)?;
    x509_builder.set_subject_name(&name).map_err(|_| NetError::Failed)?;
    x509_builder.set_issuer_name(&name).map_err(|_| NetError::Failed)?;
    x509_builder.set_pubkey(&pkey).map_err(|_| NetError::Failed)?;
    let not_before = Asn1Time::days_from_now(0).map_err(|_| NetError::Failed)?;
    let not_after = Asn1Time::days_from_now(365).map_err(|_| NetError::Failed)?;
    x509_builder.set_not_before(&not_before).map_err(|_| NetError::Failed)?;
    x509_builder.set_not_after(&not_after).map_err(|_| NetError::Failed)?;
    x509_builder.set_serial_number(&serial).map_err(|_| NetError::Failed)?;
    x509_builder
        .sign(&pkey, MessageDigest::sha256())
        .map_err(|_| NetError::Failed)?;
    let cert = x509_builder.build();

    let mut builder =
        SslContext::builder(SslMethod::tls_server()).map_err(|_| NetError::Failed)?;
    builder.set_certificate(&cert).map_err(|_| NetError::Failed)?;
    builder.set_private_key(&pkey).map_err(|_| NetError::Failed)?;
    Ok(builder.build())
}

/// Outcome of driving a handshake one step.
pub enum HandshakeOutcome {
    /// The handshake completed; the connection is ready for record I/O.
    Connected(SslStream<MioTcpStream>),
    /// The handshake is blocked on socket readiness; resume with
    /// [`resume_handshake`] once that direction is ready.
    WouldBlock(MidHandshakeSslStream<MioTcpStream>, Busy),
    /// The handshake failed terminally.
    Failed(NetError),
}

fn classify_handshake_error(err: HandshakeError<MioTcpStream>) -> HandshakeOutcome {
    match err {
        HandshakeError::WouldBlock(mid) => {
            let busy = if mid.error().io_error().map(|e| e.kind()) == Some(io::ErrorKind::WouldBlock)
            {
                // openssl reports the direction via error code, not io::ErrorKind;
                // use SslError's code to disambiguate read vs write.
                if mid.error().code() == openssl::ssl::ErrorCode::WANT_WRITE {
                    Busy::HandshakeWrite
                } else {
                    Busy::HandshakeRead
                }
            } else {
                Busy::HandshakeRead
            };
            HandshakeOutcome::WouldBlock(mid, busy)
        }
        HandshakeError::SetupFailure(_) | HandshakeError::Failure(_) => {
            HandshakeOutcome::Failed(NetError::Failed)
        }
    }
}

/// Begins a client-side handshake on an already-connected, non-blocking
/// stream. `sni_hostname` is set when the remote name is a hostname, not an
/// IP literal, per §4.4.
pub fn start_client_handshake(
    ctx: &SslContext,
    sni_hostname: Option<&str>,
    stream: MioTcpStream,
) -> Result<HandshakeOutcome> {
    let mut ssl = Ssl::new(ctx).map_err(|_| NetError::Failed)?;
    if let Some(host) = sni_hostname {
        ssl.set_hostname(host).map_err(|_| NetError::Failed)?;
    }
    debug!("starting TLS client handshake");
    Ok(match ssl.connect(stream) {
        Ok(s) => HandshakeOutcome::Connected(s),
        Err(e) => classify_handshake_error(e),
    })
}

/// Begins a server-side handshake on an accepted, non-blocking stream.
pub fn start_server_handshake(ctx: &SslContext, stream: MioTcpStream) -> Result<HandshakeOutcome> {
    let ssl = Ssl::new(ctx).map_err(|_| NetError::Failed)?;
    debug!("starting TLS server handshake");
    Ok(match ssl.accept(stream) {
        Ok(s) => HandshakeOutcome::Connected(s),
        Err(e) => classify_handshake_error(e),
    })
}

/// Resumes a handshake previously parked on [`HandshakeOutcome::WouldBlock`]
/// after the subscribed direction becomes ready.
pub fn resume_handshake(mid: MidHandshakeSslStream<MioTcpStream>) -> HandshakeOutcome {
    match mid.handshake() {
        Ok(s) => HandshakeOutcome::Connected(s),
        Err(e) => classify_handshake_error(e),
    }
}

/// Outcome of a single non-blocking TLS record read.
pub enum ReadOutcome {
    /// `n` plaintext bytes were copied into the caller's buffer.
    Read(usize),
    /// No data available right now; benign.
    WouldBlock,
    /// Peer performed a clean TLS shutdown.
    Closed,
    /// Terminal error.
    Err(NetError),
}

/// Reads decrypted bytes into `buf`, looping while the TLS library reports
/// pending buffered data, the caller's buffer still has room, and the
/// socket is not blocked — matching §4.4's record-read algorithm.
///
/// Returns alongside a `recall` flag: `true` means the caller should
/// re-arm this socket's read callback with a one-shot recall even though
/// the OS socket may not be readable, because `SSL_pending` still reports
/// buffered bytes after a partial read.
pub fn read_records(stream: &mut SslStream<MioTcpStream>, buf: &mut [u8]) -> (ReadOutcome, bool) {
    let mut total = 0usize;
    loop {
        if total == buf.len() {
            return (ReadOutcome::Read(total), false);
        }
        match stream.ssl_read(&mut buf[total..]) {
            Ok(0) => {
                return if total > 0 {
                    (ReadOutcome::Read(total), false)
                } else {
                    (ReadOutcome::Closed, false)
                };
            }
            Ok(n) => {
                total += n;
                if stream.ssl().pending() == 0 {
                    return (ReadOutcome::Read(total), false);
                }
                // More decrypted bytes are buffered inside the TLS library
                // even though the OS socket may be empty; keep looping.
            }
            Err(e) => {
                if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::WouldBlock) {
                    if total > 0 {
                        return (ReadOutcome::Read(total), false);
                    }
                    // Pending TLS-buffered bytes but the underlying recv
                    // returned WouldBlock: recall without waiting for OS
                    // readiness (see module docs / §4.4).
                    let recall = stream.ssl().pending() > 0;
                    return (ReadOutcome::WouldBlock, recall);
                }
                return (ReadOutcome::Err(NetError::Disconnected), false);
            }
        }
    }
}

/// Outcome of a single non-blocking TLS record write.
pub enum WriteOutcome {
    Written(usize),
    /// `WANT_WRITE`: caller should enqueue the remainder and subscribe to
    /// write readiness (reported as [`NetError::BufferOverflow`] per
    /// §4.4/§7).
    WouldBlock,
    /// A rehandshake requires a read before the write can proceed; the
    /// busy state flips to [`Busy::HandshakeRead`].
    NeedsRead,
    Err(NetError),
}

pub fn write_records(stream: &mut SslStream<MioTcpStream>, buf: &[u8]) -> WriteOutcome {
    match stream.ssl_write(buf) {
        Ok(n) => WriteOutcome::Written(n),
        Err(e) => match e.code() {
            openssl::ssl::ErrorCode::WANT_WRITE => WriteOutcome::WouldBlock,
            openssl::ssl::ErrorCode::WANT_READ => WriteOutcome::NeedsRead,
            _ => WriteOutcome::Err(NetError::Disconnected),
        },
    }
}

/// Bidirectional graceful shutdown: `SSL_shutdown`, then a second call if
/// the first reports the shutdown is still in progress, per §4.4.
pub fn shutdown(stream: &mut SslStream<MioTcpStream>) {
    trace!("TLS shutdown");
    if stream.shutdown().map(|r| r == openssl::ssl::ShutdownResult::Sent).unwrap_or(false) {
        let _ = stream.shutdown();
    }
}
