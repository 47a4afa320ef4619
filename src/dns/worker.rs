//! The resolver's live worker-thread bookkeeping and the platform reverse-
//! lookup primitive.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

/// Mutex-protected set of live worker-thread ids, guarding the invariant
/// that no worker thread outlives its resolver (§4.3/§9). Threads
/// self-remove on completion; [`LiveThreads::wait_empty`] is the blocking
/// primitive behind `Resolver::free_warning`.
#[derive(Default)]
pub struct LiveThreads {
    set: Mutex<HashSet<u64>>,
    drained: Condvar,
}

impl LiveThreads {
    pub fn insert(&self, id: u64) {
        self.set.lock().unwrap().insert(id);
    }

    pub fn remove(&self, id: u64) {
        let mut guard = self.set.lock().unwrap();
        guard.remove(&id);
        if guard.is_empty() {
            self.drained.notify_all();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.lock().unwrap().len()
    }

    /// Blocks the calling thread until the live set is empty.
    pub fn wait_empty(&self) {
        let guard = self.set.lock().unwrap();
        let _guard = self
            .drained
            .wait_while(guard, |set| !set.is_empty())
            .unwrap();
    }
}

/// Reverse-resolves `addr` to a canonical hostname using the OS resolver.
#[cfg(unix)]
pub fn reverse_lookup(addr: std::net::IpAddr) -> std::io::Result<String> {
    use std::ffi::CStr;
    use std::mem;

    let (sockaddr, len): (libc::sockaddr_storage, libc::socklen_t) = match addr {
        std::net::IpAddr::V4(v4) => {
            let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        std::net::IpAddr::V6(v6) => {
            let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: 0,
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr { s6_addr: v6.octets() },
                sin6_scope_id: 0,
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    };

    let mut host = [0u8; 256];
    let rc = unsafe {
        libc::getnameinfo(
            &sockaddr as *const _ as *const libc::sockaddr,
            len,
            host.as_mut_ptr() as *mut libc::c_char,
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            0,
        )
    };

    if rc != 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "getnameinfo failed"));
    }

    let cstr = unsafe { CStr::from_ptr(host.as_ptr() as *const libc::c_char) };
    Ok(cstr.to_string_lossy().into_owned())
}

/// Reverse-resolves `addr` to a canonical hostname using the OS resolver.
///
/// Non-Unix targets fall back to the textual address: a full `GetNameInfoW`
/// binding is outside this crate's current platform coverage.
#[cfg(not(unix))]
pub fn reverse_lookup(addr: std::net::IpAddr) -> std::io::Result<String> {
    Ok(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_empty_returns_immediately_when_already_empty() {
        let live = LiveThreads::default();
        live.wait_empty();
    }

    #[test]
    fn insert_then_remove_drains_the_set() {
        let live = LiveThreads::default();
        live.insert(1);
        assert_eq!(live.len(), 1);
        live.remove(1);
        assert!(live.is_empty());
    }
}
