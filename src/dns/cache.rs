//! The two monotonically-growing DNS caches (name->entry, address->entry).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::addr::Address;

/// A cached DNS record: the canonical hostname and every address it
/// resolved to.
#[derive(Debug, Clone)]
pub struct DnsEntry {
    pub hostname: String,
    pub addresses: Vec<Address>,
}

/// A thread-safe, insert-only cache. Entries are never evicted or mutated
/// once inserted, matching §8's invariant 7 ("DNS caches only monotonically
/// grow during a run; any entry, once inserted, is stable").
#[derive(Default)]
pub struct NameCache {
    inner: Mutex<HashMap<String, Arc<DnsEntry>>>,
}

impl NameCache {
    pub fn get(&self, host: &str) -> Option<Arc<DnsEntry>> {
        self.inner.lock().unwrap().get(host).cloned()
    }

    pub fn insert(&self, host: String, entry: Arc<DnsEntry>) {
        self.inner.lock().unwrap().entry(host).or_insert(entry);
    }
}

#[derive(Default)]
pub struct AddrCache {
    inner: Mutex<HashMap<Address, Arc<DnsEntry>>>,
}

impl AddrCache {
    pub fn get(&self, addr: &Address) -> Option<Arc<DnsEntry>> {
        self.inner.lock().unwrap().get(addr).cloned()
    }

    pub fn insert(&self, addr: Address, entry: Arc<DnsEntry>) {
        self.inner.lock().unwrap().entry(addr).or_insert(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent_first_write_wins() {
        let cache = NameCache::default();
        cache.insert(
            "host".into(),
            Arc::new(DnsEntry { hostname: "host".into(), addresses: vec![Address::v4([1, 1, 1, 1])] }),
        );
        cache.insert(
            "host".into(),
            Arc::new(DnsEntry { hostname: "host".into(), addresses: vec![Address::v4([2, 2, 2, 2])] }),
        );
        let entry = cache.get("host").unwrap();
        assert_eq!(entry.addresses[0], Address::v4([1, 1, 1, 1]));
    }
}
