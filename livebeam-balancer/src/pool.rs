use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::{BalancerError, Result};

/// Shared set of upstream servers.
///
/// Selection filters dead backends first and then takes the live backend
/// with the fewest active connections; ties break toward the earliest
/// configured backend.
pub struct BackendPool {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendPool {
    pub fn new(backends: Vec<Arc<Backend>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(BalancerError::EmptyPool);
        }
        Ok(Self {
            backends: RwLock::new(backends),
        })
    }

    /// Build a pool from configured address strings.
    ///
    /// A malformed address is skipped with a warning rather than failing
    /// startup; an empty result is still an error.
    pub fn from_addresses(addrs: &[String]) -> Result<Self> {
        let mut backends = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match Backend::new(addr) {
                Ok(backend) => backends.push(backend),
                Err(e) => warn!(addr, "skipping backend: {e}"),
            }
        }
        Self::new(backends)
    }

    pub fn add_backend(&self, backend: Arc<Backend>) {
        self.backends.write().push(backend);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    #[must_use]
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().clone()
    }

    /// Select the live backend with the fewest active connections.
    pub fn next_backend(&self) -> Result<Arc<Backend>> {
        self.backends
            .read()
            .iter()
            .filter(|b| b.is_alive())
            .min_by_key(|b| b.active_connections())
            .cloned()
            .ok_or(BalancerError::NoBackend)
    }
}

/// Periodically probe every backend with a TCP connect, restoring ones
/// that were marked dead after a failed proxy attempt.
pub async fn run_health_checks(
    pool: Arc<BackendPool>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        for backend in pool.backends() {
            let reachable = tokio::time::timeout(interval, TcpStream::connect(backend.addr()))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if reachable != backend.is_alive() {
                debug!(addr = %backend.addr(), reachable, "backend liveness changed");
                backend.set_alive(reachable);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(addrs: &[&str]) -> BackendPool {
        let backends = addrs
            .iter()
            .map(|a| Backend::new(a).unwrap())
            .collect();
        BackendPool::new(backends).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            BackendPool::new(Vec::new()),
            Err(BalancerError::EmptyPool)
        ));
    }

    #[test]
    fn malformed_addresses_are_skipped_not_fatal() {
        let pool = BackendPool::from_addresses(&[
            "127.0.0.1:8080".to_string(),
            "definitely not an address".to_string(),
            "127.0.0.1:8081".to_string(),
        ])
        .unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn selection_takes_the_least_loaded_backend() {
        let pool = pool_of(&["127.0.0.1:8080", "127.0.0.1:8081", "127.0.0.1:8082"]);
        let backends = pool.backends();

        // load the pool [2, 0, 1]
        let _g0a = backends[0].track();
        let _g0b = backends[0].track();
        let _g2 = backends[2].track();

        let chosen = pool.next_backend().unwrap();
        assert_eq!(chosen.addr(), backends[1].addr());
    }

    #[test]
    fn dead_backends_are_never_selected_while_a_live_one_exists() {
        let pool = pool_of(&["127.0.0.1:8080", "127.0.0.1:8081"]);
        let backends = pool.backends();

        // the dead backend has fewer connections but must still lose
        backends[0].set_alive(false);
        let _g = backends[1].track();

        for _ in 0..10 {
            let chosen = pool.next_backend().unwrap();
            assert_eq!(chosen.addr(), backends[1].addr());
        }
    }

    #[test]
    fn an_entirely_dead_pool_yields_no_backend() {
        let pool = pool_of(&["127.0.0.1:8080"]);
        pool.backends()[0].set_alive(false);
        assert!(matches!(
            pool.next_backend(),
            Err(BalancerError::NoBackend)
        ));
    }

    #[test]
    fn pool_grows_at_runtime() {
        let pool = pool_of(&["127.0.0.1:8080"]);
        pool.add_backend(Backend::new("127.0.0.1:8081").unwrap());
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_leak_counts() {
        let pool = Arc::new(pool_of(&["127.0.0.1:8080", "127.0.0.1:8081"]));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                let backend = pool.next_backend().unwrap();
                let _guard = backend.track();
                tokio::task::yield_now().await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for backend in pool.backends() {
            assert_eq!(backend.active_connections(), 0);
        }
    }
}
