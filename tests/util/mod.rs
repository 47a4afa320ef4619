#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::time::{Duration, Instant};

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub fn any_local_address() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Polls `engine` in a loop until `condition` returns `true` or `timeout`
/// elapses, returning whether it converged. Mirrors the bounded poll loops
/// the base spec's scenarios describe ("within N poll cycles").
pub fn wait_until(engine: &mut netcore::Engine, timeout: Duration, mut condition: impl FnMut(&mut netcore::Engine) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition(engine) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        let _ = engine.poll(Some(Duration::from_millis(50)));
    }
}
