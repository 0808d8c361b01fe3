use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pool::BackendPool;
use crate::Result;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// HTTP frontend, used to spread playback requests over a pool of
/// playlist-serving web servers.
pub struct HttpLoadBalancer {
    state: Arc<ProxyState>,
}

struct ProxyState {
    pool: Arc<BackendPool>,
    client: reqwest::Client,
}

impl HttpLoadBalancer {
    #[must_use]
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self {
            state: Arc::new(ProxyState {
                pool,
                client: reqwest::Client::new(),
            }),
        }
    }

    /// Router forwarding every request to the selected backend.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(forward)
            .with_state(Arc::clone(&self.state))
    }

    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        info!(addr = ?listener.local_addr(), backends = self.state.pool.len(), "http balancer listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        info!("http balancer stopped");
        Ok(())
    }
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    // one pass over the pool: a backend that errors is marked dead and
    // the next candidate gets the request
    let attempts = state.pool.len();
    for _ in 0..attempts {
        let backend = match state.pool.next_backend() {
            Ok(backend) => backend,
            Err(e) => {
                return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
            }
        };
        let _guard = backend.track();

        let url = format!("{}{}", backend.http_base(), path_and_query);
        let mut upstream = state
            .client
            .request(parts.method.clone(), &url)
            .body(body.clone());
        for (name, value) in &parts.headers {
            if matches!(
                name.as_str(),
                "host" | "connection" | "accept-encoding" | "content-length" | "transfer-encoding"
            ) {
                continue;
            }
            if let Ok(v) = value.to_str() {
                upstream = upstream.header(name.as_str(), v);
            }
        }

        let response = match upstream.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(addr = %backend.addr(), "backend request failed: {e}");
                backend.set_alive(false);
                continue;
            }
        };

        return into_axum_response(response).await;
    }

    (StatusCode::BAD_GATEWAY, "no backend found").into_response()
}

async fn into_axum_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = response.headers().clone();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        if matches!(
            name.as_str(),
            "connection" | "transfer-encoding" | "content-encoding" | "content-length"
        ) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            builder = builder.header(name.as_str(), v);
        }
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
