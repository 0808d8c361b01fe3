// Load balancer: spreads ingest and playback traffic over a backend set.
//
// Both frontends share one selection policy: dead backends are filtered
// out first, then the live backend with the fewest active connections
// wins. Connection counts are maintained by RAII guards so a dropped or
// panicked session can never leak a count.

pub mod backend;
pub mod http;
pub mod pool;
pub mod tcp;

use thiserror::Error;

pub use backend::{Backend, ConnectionGuard};
pub use http::HttpLoadBalancer;
pub use pool::{run_health_checks, BackendPool};
pub use tcp::TcpLoadBalancer;

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("backend pool must not be empty")]
    EmptyPool,

    #[error("no backend found")]
    NoBackend,

    #[error("invalid backend address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BalancerError>;
