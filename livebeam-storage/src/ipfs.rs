// Peer-to-peer storage backend
//
// Construction happens in two explicit phases: local node construction
// (fails only on local resource problems) and network join (best-effort; a
// dead bootstrap peer leaves the node serving local content in degraded
// mode). A missing bootstrap address is a configuration error and fatal.

use async_trait::async_trait;
use bytes::Bytes;
use libp2p::Multiaddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use livebeam_core::config::StorageConfig;

use crate::error::{Result, StorageError};
use crate::node::ContentNode;
use crate::HlsStorage;

#[derive(Debug)]
pub struct P2pStorage {
    node: ContentNode,
    gateway: String,
}

impl P2pStorage {
    /// Build the local content node and attempt to join the peer network.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let bootstrap = config
            .bootstrap_addr
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or(StorageError::MissingBootstrapAddr)?;

        let bootstrap: Multiaddr = bootstrap
            .parse()
            .map_err(|_| StorageError::InvalidAddress(bootstrap.to_string()))?;

        // Phase one: local node. Must succeed.
        let node = ContentNode::spawn(&config.listen_addr)?;

        // Phase two: network join. Best-effort; the node stays usable for
        // local content and becomes reachable once connectivity returns.
        match node.connect(bootstrap.clone()).await {
            Ok(()) => info!(%bootstrap, "joining peer network"),
            Err(e) => warn!(%bootstrap, "bootstrap connect failed, running local-only: {e}"),
        }

        Ok(Self {
            node,
            gateway: config.gateway.trim_end_matches('/').to_string(),
        })
    }

    /// Wrap an already running node (used by tests to skip the join phase).
    #[must_use]
    pub fn with_node(node: ContentNode, gateway: &str) -> Self {
        Self {
            node,
            gateway: gateway.trim_end_matches('/').to_string(),
        }
    }

    fn gateway_url(&self, id: &str) -> String {
        format!("{}/ipfs/{}", self.gateway, id)
    }

    /// Resolve a previously returned identifier (bare or gateway URL form)
    /// back to the stored bytes.
    pub async fn fetch(&self, remote_id: &str) -> Result<Bytes> {
        let id = remote_id.rsplit('/').next().unwrap_or(remote_id);
        self.node.get_block(id).await
    }

    /// Recursively collect the files below `dir`, sorted by relative path so
    /// the aggregate identifier is deterministic.
    async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl HlsStorage for P2pStorage {
    async fn save_into_hls_directory(&self, file_path: &Path) -> Result<String> {
        let data = tokio::fs::read(file_path).await?;
        let id = self.node.add_block(Bytes::from(data)).await?;
        Ok(self.gateway_url(&id))
    }

    async fn add_directory(&self, dir_path: &Path) -> Result<String> {
        let files = Self::collect_files(dir_path).await?;

        // The aggregate unit is a manifest block listing (relative path,
        // child id) pairs; its content id becomes the directory's root id.
        let mut manifest = String::new();
        for path in files {
            let data = tokio::fs::read(&path).await?;
            let child_id = self.node.add_block(Bytes::from(data)).await?;
            let relative = path
                .strip_prefix(dir_path)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            manifest.push_str(&relative);
            manifest.push(' ');
            manifest.push_str(&child_id);
            manifest.push('\n');
        }

        self.node.add_block(Bytes::from(manifest)).await
    }
}
