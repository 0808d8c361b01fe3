use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pool::BackendPool;
use crate::Result;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Raw TCP frontend, used to spread ingest connections over a pool of
/// ingest servers.
pub struct TcpLoadBalancer {
    pool: Arc<BackendPool>,
}

impl TcpLoadBalancer {
    #[must_use]
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    /// Accept connections until cancelled. Each accepted connection is
    /// proxied on its own task.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        info!(addr = ?listener.local_addr(), backends = self.pool.len(), "tcp balancer listening");
        loop {
            let (conn, peer) = tokio::select! {
                () = cancel.cancelled() => {
                    info!("tcp balancer stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };
            debug!(%peer, "accepted connection");
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                if let Err(e) = proxy_connection(&pool, conn).await {
                    debug!(%peer, "session ended: {e}");
                }
            });
        }
    }
}

/// Pick a backend and splice the connection to it.
///
/// A backend that refuses the connection is marked dead and the next
/// candidate is tried, for at most one pass over the pool.
async fn proxy_connection(pool: &BackendPool, mut client: TcpStream) -> Result<()> {
    let attempts = pool.len();
    for _ in 0..attempts {
        let backend = pool.next_backend()?;
        let _guard = backend.track();

        let upstream =
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(backend.addr())).await;
        let mut upstream = match upstream {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(addr = %backend.addr(), "backend refused connection: {e}");
                backend.set_alive(false);
                continue;
            }
            Err(_) => {
                warn!(addr = %backend.addr(), "backend connect timed out");
                backend.set_alive(false);
                continue;
            }
        };

        tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        return Ok(());
    }
    Err(crate::BalancerError::NoBackend)
}
