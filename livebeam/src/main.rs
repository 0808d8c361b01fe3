// Process entry point: wires configuration, storage, the segment watcher,
// the session pipeline and the load balancers together, then waits for
// ctrl-c.

mod ingest;
mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use livebeam_balancer::{run_health_checks, BackendPool, HttpLoadBalancer, TcpLoadBalancer};
use livebeam_core::bootstrap::load_config;
use livebeam_core::config::{Config, LbTargets, StorageMode};
use livebeam_core::logging::init_logging;
use livebeam_storage::{HlsStorage, OssStorage, P2pStorage};
use livebeam_transcode::TokioProcessRunner;
use livebeam_watcher::{HlsMonitor, PollSource};

use crate::ingest::IngestServer;
use crate::pipeline::Pipeline;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config()?);
    init_logging(&config.logging)?;
    info!(mode = ?config.storage.mode, "starting livebeam");

    prepare_hls_roots(&config).await?;

    let storage: Arc<dyn HlsStorage> = match config.storage.mode {
        StorageMode::Ipfs => Arc::new(
            P2pStorage::new(&config.storage)
                .await
                .context("starting p2p storage backend")?,
        ),
        StorageMode::Oss => Arc::new(
            OssStorage::new(config.storage.oss.clone())
                .context("starting object storage backend")?,
        ),
    };

    let cancel = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // segment watcher over the private HLS root
    let mut monitor = HlsMonitor::new(
        storage,
        config.hls.private_path.clone(),
        config.hls.public_path.clone(),
        config.ffmpeg.master_file_name.clone(),
        config.ffmpeg.qualities.len(),
    );
    let source = PollSource::new(config.hls.private_path.clone(), POLL_INTERVAL);
    let watcher_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        monitor.run(source, watcher_cancel).await;
    }));

    // ingest handoff feeding the transcoder pipeline
    let pipeline = Pipeline::new(Arc::clone(&config), Arc::new(TokioProcessRunner));
    let ingest_listener = TcpListener::bind(&config.ingest.listen_addr)
        .await
        .with_context(|| format!("binding ingest handoff on {}", config.ingest.listen_addr))?;
    let ingest = IngestServer::new(Arc::clone(&pipeline));
    let ingest_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = ingest.serve(ingest_listener, ingest_cancel).await {
            error!("ingest handoff failed: {e}");
        }
    }));

    if let Some(targets) = &config.balancer.tcp {
        tasks.push(spawn_tcp_balancer(targets, &cancel).await?);
    }
    if let Some(targets) = &config.balancer.http {
        tasks.push(spawn_http_balancer(targets, &cancel).await?);
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    cancel.cancel();
    pipeline.shutdown();
    for task in tasks {
        let _ = task.await;
    }
    info!("livebeam stopped");
    Ok(())
}

/// Reset the local HLS trees so a restart never republishes a previous
/// run's artifacts.
async fn prepare_hls_roots(config: &Config) -> anyhow::Result<()> {
    for root in [&config.hls.private_path, &config.hls.public_path] {
        if root.exists() {
            tokio::fs::remove_dir_all(root)
                .await
                .with_context(|| format!("clearing {}", root.display()))?;
        }
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("creating {}", root.display()))?;
    }
    Ok(())
}

async fn spawn_tcp_balancer(
    targets: &LbTargets,
    cancel: &CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let pool = Arc::new(BackendPool::from_addresses(&targets.to)?);
    let listener = TcpListener::bind(&targets.from)
        .await
        .with_context(|| format!("binding tcp balancer on {}", targets.from))?;

    tokio::spawn(run_health_checks(
        Arc::clone(&pool),
        HEALTH_CHECK_INTERVAL,
        cancel.clone(),
    ));

    let balancer = TcpLoadBalancer::new(pool);
    let cancel = cancel.clone();
    Ok(tokio::spawn(async move {
        if let Err(e) = balancer.serve(listener, cancel).await {
            error!("tcp balancer failed: {e}");
        }
    }))
}

async fn spawn_http_balancer(
    targets: &LbTargets,
    cancel: &CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let pool = Arc::new(BackendPool::from_addresses(&targets.to)?);
    let listener = TcpListener::bind(&targets.from)
        .await
        .with_context(|| format!("binding http balancer on {}", targets.from))?;

    tokio::spawn(run_health_checks(
        Arc::clone(&pool),
        HEALTH_CHECK_INTERVAL,
        cancel.clone(),
    ));

    let balancer = HttpLoadBalancer::new(pool);
    let cancel = cancel.clone();
    Ok(tokio::spawn(async move {
        if let Err(e) = balancer.serve(listener, cancel).await {
            error!("http balancer failed: {e}");
        }
    }))
}
