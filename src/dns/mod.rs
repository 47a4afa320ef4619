//! The asynchronous DNS resolver: name<->address lookup with a
//! monotonically-growing cache and a transient worker-thread pool.
//!
//! Every public operation has a blocking variant (used directly by the
//! caller's thread) and an asynchronous variant (returns immediately; the
//! result is delivered through the resolver's callback once the worker
//! thread's completion message has been drained on the main thread, via
//! [`Resolver::drain_completions`]).

mod cache;
mod worker;

pub use cache::DnsEntry;

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use log::{debug, trace};
use mio::Waker;

use crate::addr::Address;
use crate::error::{NetError, Result};

use cache::{AddrCache, NameCache};
use worker::LiveThreads;

/// The query a completed worker thread was resolving, carried on the
/// completion message alongside the resolver and thread identifiers so the
/// main thread can safely re-locate state even if the resolver has since
/// been torn down (the completion channel closing is how "the resolver no
/// longer exists" is detected — see module docs and §4.3/§9).
#[derive(Debug, Clone)]
pub enum Query {
    Name(String),
    Address(Address),
}

/// One resolver query's outcome, delivered to the resolver's callback.
#[derive(Debug, Clone)]
pub struct ResolveEvent {
    pub query: Query,
    pub result: std::result::Result<Arc<DnsEntry>, NetErrorKind>,
}

/// A cheap, `Clone`-able copy of the failure kind, since [`NetError`] itself
/// is not `Clone` (it can wrap an [`std::io::Error`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetErrorKind {
    HostNotFound,
    Failed,
}

impl From<NetErrorKind> for NetError {
    fn from(kind: NetErrorKind) -> Self {
        match kind {
            NetErrorKind::HostNotFound => NetError::HostNotFound,
            NetErrorKind::Failed => NetError::Failed,
        }
    }
}

struct Completion {
    worker_id: u64,
    event: ResolveEvent,
}

/// Async DNS resolver: owns a name cache, an address cache, and a
/// mutex-protected set of live worker-thread ids.
pub struct Resolver {
    name_cache: Arc<NameCache>,
    addr_cache: Arc<AddrCache>,
    live: Arc<LiveThreads>,
    next_worker_id: AtomicU64,
    tx: mpsc::Sender<Completion>,
    rx: mpsc::Receiver<Completion>,
    callback: Option<Box<dyn FnMut(ResolveEvent) + Send>>,
    /// Wakes the owning engine's `poll()` call once a worker thread posts a
    /// completion, so a miss resolved entirely between two `poll()` calls
    /// isn't left undelivered until some unrelated readiness event fires.
    waker: Option<Arc<Waker>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Resolver {
            name_cache: Arc::new(NameCache::default()),
            addr_cache: Arc::new(AddrCache::default()),
            live: Arc::new(LiveThreads::default()),
            next_worker_id: AtomicU64::new(1),
            tx,
            rx,
            callback: None,
            waker: None,
        }
    }

    /// Sets the resolver's completion callback (the base spec's single
    /// `Callback` property).
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ResolveEvent) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Registers a waker worker threads use to interrupt the owning
    /// engine's blocked `poll()` call once a completion is posted.
    pub fn set_waker(&mut self, waker: Arc<Waker>) {
        self.waker = Some(waker);
    }

    /// Blocking name resolution: bypasses the async worker pool entirely.
    pub fn resolve_name_blocking(&self, host: &str) -> Result<Arc<DnsEntry>> {
        if let Some(entry) = self.name_cache.get(host) {
            return Ok(entry);
        }
        let entry = Arc::new(lookup_name(host)?);
        self.name_cache.insert(host.to_string(), entry.clone());
        Ok(entry)
    }

    /// Blocking reverse resolution.
    pub fn resolve_address_blocking(&self, addr: Address) -> Result<Arc<DnsEntry>> {
        if let Some(entry) = self.addr_cache.get(&addr) {
            return Ok(entry);
        }
        let entry = Arc::new(lookup_address(addr)?);
        self.addr_cache.insert(addr, entry.clone());
        Ok(entry)
    }

    /// Asynchronous name resolution. Returns `Ok(())` immediately; the
    /// result reaches the callback either synchronously on a cache hit
    /// (matching §4.3's "deliver the cached entry through the normal
    /// callback path") or later via [`Resolver::drain_completions`].
    pub fn resolve_name_async(&mut self, host: impl Into<String>) -> Result<()> {
        let host = host.into();
        if let Some(entry) = self.name_cache.get(&host) {
            trace!("DNS cache hit for name {host}");
            self.deliver(ResolveEvent { query: Query::Name(host), result: Ok(entry) });
            return Ok(());
        }
        self.spawn_name_worker(host);
        Ok(())
    }

    /// Asynchronous reverse resolution; same cache-first contract as
    /// [`Resolver::resolve_name_async`].
    pub fn resolve_address_async(&mut self, addr: Address) -> Result<()> {
        if let Some(entry) = self.addr_cache.get(&addr) {
            trace!("DNS cache hit for address {addr}");
            self.deliver(ResolveEvent { query: Query::Address(addr), result: Ok(entry) });
            return Ok(());
        }
        self.spawn_addr_worker(addr);
        Ok(())
    }

    fn spawn_name_worker(&mut self, host: String) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.live.insert(worker_id);
        let tx = self.tx.clone();
        let live = self.live.clone();
        let cache = self.name_cache.clone();
        let query_host = host.clone();
        let waker = self.waker.clone();

        std::thread::spawn(move || {
            debug!("DNS worker {worker_id} resolving name {query_host}");
            let result = lookup_name(&query_host).map(Arc::new).map_err(to_kind);
            if let Ok(entry) = &result {
                cache.insert(query_host.clone(), entry.clone());
            }
            let _ = tx.send(Completion {
                worker_id,
                event: ResolveEvent { query: Query::Name(query_host), result },
            });
            live.remove(worker_id);
            if let Some(w) = waker {
                let _ = w.wake();
            }
        });
    }

    fn spawn_addr_worker(&mut self, addr: Address) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.live.insert(worker_id);
        let tx = self.tx.clone();
        let live = self.live.clone();
        let cache = self.addr_cache.clone();
        let waker = self.waker.clone();

        std::thread::spawn(move || {
            debug!("DNS worker {worker_id} resolving address {addr}");
            let result = lookup_address(addr).map(Arc::new).map_err(to_kind);
            if let Ok(entry) = &result {
                cache.insert(addr, entry.clone());
            }
            let _ = tx.send(Completion { worker_id, event: ResolveEvent { query: Query::Address(addr), result } });
            live.remove(worker_id);
            if let Some(w) = waker {
                let _ = w.wake();
            }
        });
    }

    fn deliver(&mut self, event: ResolveEvent) {
        if let Some(cb) = self.callback.as_mut() {
            cb(event);
        }
    }

    /// Drains any worker completion messages posted since the last call and
    /// invokes the callback for each. The engine calls this after draining
    /// its wakeup channel's readiness event; this is the "main thread
    /// drains that queue" step of §4.3.
    pub fn drain_completions(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            trace!("DNS worker {} completed", completion.worker_id);
            self.deliver(completion.event);
        }
    }

    /// Blocks until every worker thread spawned by this resolver has
    /// self-removed from the live set, ensuring no worker outlives the
    /// resolver (§4.3 "Thread set" / §9).
    pub fn free_warning(&self) {
        self.live.wait_empty();
    }

    /// A receiver clone the engine can register with its poll loop via a
    /// shared [`mio::Waker`], independent of this resolver's internal
    /// channel plumbing. Exposed for engines that want to multiplex several
    /// resolvers onto one `Waker` token.
    pub fn has_pending(&self) -> bool {
        !self.live.is_empty()
    }
}

fn to_kind(err: NetError) -> NetErrorKind {
    match err {
        NetError::HostNotFound | NetError::HostUnreachable => NetErrorKind::HostNotFound,
        _ => NetErrorKind::Failed,
    }
}

fn lookup_name(host: &str) -> Result<DnsEntry> {
    let addrs: Vec<Address> = (host, 0u16)
        .to_socket_addrs()
        .map_err(|_| NetError::HostNotFound)?
        .map(|sa| Address::from(sa.ip()))
        .collect();
    if addrs.is_empty() {
        return Err(NetError::HostNotFound);
    }
    Ok(DnsEntry { hostname: host.to_string(), addresses: addrs })
}

fn lookup_address(addr: Address) -> Result<DnsEntry> {
    let ip: std::net::IpAddr = addr.into();
    let hostname = worker::reverse_lookup(ip).map_err(|_| NetError::HostNotFound)?;
    Ok(DnsEntry { hostname, addresses: vec![addr] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn cache_hit_does_not_spawn_a_worker() {
        let mut resolver = Resolver::new();
        let (tx, rx) = channel();
        resolver.set_callback(move |event| {
            let _ = tx.send(event);
        });

        resolver
            .name_cache
            .insert("localhost".into(), Arc::new(DnsEntry {
                hostname: "localhost".into(),
                addresses: vec![Address::v4([127, 0, 0, 1])],
            }));

        resolver.resolve_name_async("localhost").unwrap();
        let event = rx.try_recv().expect("callback fired synchronously on cache hit");
        assert!(event.result.is_ok());
        assert_eq!(resolver.live.len(), 0);
    }

    #[test]
    fn blocking_localhost_resolves_to_loopback() {
        let resolver = Resolver::new();
        let entry = resolver.resolve_name_blocking("localhost").unwrap();
        assert!(entry.addresses.iter().any(|a| a.is_v4() || a.is_v6()));
    }

    #[test]
    fn async_miss_eventually_delivers_via_drain_completions() {
        let mut resolver = Resolver::new();
        let (tx, rx) = channel();
        resolver.set_callback(move |event| {
            let _ = tx.send(event);
        });

        resolver.resolve_name_async("localhost").unwrap();
        resolver.free_warning();
        resolver.drain_completions();

        let event = rx.try_recv().expect("completion delivered after drain");
        assert!(event.result.is_ok());
    }
}
