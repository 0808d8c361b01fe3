use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{BalancerError, Result};

/// One upstream server and its observed state.
///
/// `active` counts connections currently proxied to this backend and is
/// only ever moved through [`ConnectionGuard`], so every increment has a
/// matching decrement even when the session task panics.
pub struct Backend {
    addr: SocketAddr,
    alive: RwLock<bool>,
    active: AtomicUsize,
}

impl Backend {
    pub fn new(addr: &str) -> Result<Arc<Self>> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| BalancerError::InvalidAddress(addr.to_string()))?;
        Ok(Arc::new(Self {
            addr,
            alive: RwLock::new(true),
            active: AtomicUsize::new(0),
        }))
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for forwarding HTTP requests to this backend
    #[must_use]
    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.alive.read()
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.write() = alive;
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Count one proxied connection against this backend for the lifetime
    /// of the returned guard.
    #[must_use]
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }
}

/// Releases a backend's connection slot on drop.
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_addresses() {
        assert!(Backend::new("not an address").is_err());
        assert!(Backend::new("127.0.0.1:8080").is_ok());
    }

    #[test]
    fn guard_releases_the_slot_on_drop() {
        let backend = Backend::new("127.0.0.1:8080").unwrap();

        let first = backend.track();
        let second = backend.track();
        assert_eq!(backend.active_connections(), 2);

        drop(first);
        assert_eq!(backend.active_connections(), 1);
        drop(second);
        assert_eq!(backend.active_connections(), 0);
    }

    #[test]
    fn guard_releases_even_when_the_session_panics() {
        let backend = Backend::new("127.0.0.1:8080").unwrap();
        let clone = Arc::clone(&backend);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = clone.track();
            panic!("session died");
        }));
        assert!(result.is_err());
        assert_eq!(backend.active_connections(), 0);
    }
}
