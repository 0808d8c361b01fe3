//! The publish state machine.
//!
//! `HlsMonitor` consumes stable-file events and drives each artifact through
//! Published (uploaded, remote id recorded) and Referenced (owning playlist
//! rewritten against remote ids). The per-stream directory aggregate is
//! committed through an explicit pending-work check rather than by polling
//! child states.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livebeam_core::hls::{self, HlsFileKind, HlsStream};
use livebeam_storage::HlsStorage;

use crate::fs_events::{is_direct_child, FsEvent, FsEventKind, FsEventSource};

/// Publishing state for one live session.
struct StreamState {
    stream: HlsStream,
    master_seen: bool,
    committed: bool,
    /// Variant playlists detected but not yet rewritten, re-attempted after
    /// every publish
    dirty_playlists: HashSet<PathBuf>,
    /// Unpublished segments per tier, kept in creation order so a failed
    /// publish never reorders its variant
    pending_segments: Vec<VecDeque<PathBuf>>,
}

impl StreamState {
    fn new(publish_name: &str, tier_count: usize) -> Self {
        Self {
            stream: HlsStream::new(publish_name, tier_count),
            master_seen: false,
            committed: false,
            dirty_playlists: HashSet::new(),
            pending_segments: (0..tier_count).map(|_| VecDeque::new()).collect(),
        }
    }

    fn has_pending_work(&self) -> bool {
        !self.dirty_playlists.is_empty()
            || self.pending_segments.iter().any(|q| !q.is_empty())
    }
}

/// Long-lived watcher over every stream directory beneath the private root.
pub struct HlsMonitor {
    storage: Arc<dyn HlsStorage>,
    private_root: PathBuf,
    public_root: PathBuf,
    master_file_name: String,
    tier_count: usize,
    streams: HashMap<String, StreamState>,
}

impl HlsMonitor {
    #[must_use]
    pub fn new(
        storage: Arc<dyn HlsStorage>,
        private_root: PathBuf,
        public_root: PathBuf,
        master_file_name: String,
        tier_count: usize,
    ) -> Self {
        Self {
            storage,
            private_root,
            public_root,
            master_file_name,
            tier_count,
            streams: HashMap::new(),
        }
    }

    /// Consume events until the source ends or the token is cancelled.
    ///
    /// Cancellation exits the loop promptly; an in-flight publish completes
    /// or fails on its own.
    pub async fn run<S: FsEventSource>(&mut self, mut source: S, cancel: CancellationToken) {
        info!(root = %self.private_root.display(), "segment watcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("segment watcher stopping");
                    break;
                }
                event = source.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                }
            }
        }
    }

    /// Published stream state, for callers handing the root id to metadata.
    #[must_use]
    pub fn stream(&self, publish_name: &str) -> Option<&HlsStream> {
        self.streams.get(publish_name).map(|s| &s.stream)
    }

    async fn handle_event(&mut self, event: FsEvent) {
        if event.kind == FsEventKind::Removed {
            // encoder rotated an old segment out of its window; anything we
            // still reference has already been published
            debug!(path = %event.path.display(), "ignoring removal");
            return;
        }

        if event.is_dir {
            if is_direct_child(&self.private_root, &event.path) {
                self.register_stream(&event.path);
            }
            return;
        }

        match hls::classify(&event.path) {
            Some(HlsFileKind::Segment) => self.on_segment(event.path).await,
            Some(HlsFileKind::Variant) => self.on_variant_playlist(event.path).await,
            Some(HlsFileKind::Master) => self.on_master_playlist(event.path).await,
            None => {}
        }
    }

    fn register_stream(&mut self, dir: &Path) {
        let Some(publish_name) = dir.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let tier_count = self.tier_count;
        self.streams
            .entry(publish_name.to_string())
            .or_insert_with(|| {
                info!(publish_name, tiers = tier_count, "live stream detected");
                StreamState::new(publish_name, tier_count)
            });
    }

    async fn on_segment(&mut self, path: PathBuf) {
        let Some(info) = hls::path_info(&path) else {
            warn!(path = %path.display(), "unrecognized segment path");
            return;
        };
        if info.variant_index >= self.tier_count {
            warn!(
                publish_name = %info.publish_name,
                tier = info.variant_index,
                "segment tier exceeds configured qualities"
            );
            return;
        }

        // directory event can be missed when the tree appears between scans
        self.register_stream(&self.private_root.join(&info.publish_name));

        let state = match self.streams.get_mut(&info.publish_name) {
            Some(state) => state,
            None => return,
        };
        let already_known = state
            .stream
            .variant(info.variant_index)
            .is_some_and(|v| v.has_segment(&info.file_name))
            || state.pending_segments[info.variant_index].contains(&path);
        if !already_known {
            state.pending_segments[info.variant_index].push_back(path);
        }

        self.publish_pending(&info.publish_name).await;
        self.rewrite_dirty_playlists(&info.publish_name).await;
        self.try_commit(&info.publish_name).await;
    }

    /// Publish queued segments in creation order, per tier.
    ///
    /// A failed publish is left at the head of its tier's queue: later
    /// segments of the same tier wait (ordering guarantee), other tiers and
    /// other streams proceed independently.
    async fn publish_pending(&mut self, publish_name: &str) {
        let tier_count = self.tier_count;
        for tier in 0..tier_count {
            loop {
                let next = match self.streams.get(publish_name) {
                    Some(state) => state.pending_segments[tier].front().cloned(),
                    None => return,
                };
                let Some(path) = next else { break };

                match self.storage.save_into_hls_directory(&path).await {
                    Ok(remote_id) => {
                        let Some(state) = self.streams.get_mut(publish_name) else {
                            return;
                        };
                        state.pending_segments[tier].pop_front();
                        if let Some(mut segment) = hls::segment_from_path(&path) {
                            segment.remote_id = Some(remote_id);
                            debug!(
                                publish_name,
                                tier,
                                file = %path.display(),
                                "segment published"
                            );
                            if let Some(variant) = state.stream.variant_mut(tier) {
                                variant.segments.push(segment);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            publish_name,
                            tier,
                            file = %path.display(),
                            "segment publish failed, will retry: {e}"
                        );
                        break;
                    }
                }
            }
        }
    }

    async fn on_variant_playlist(&mut self, path: PathBuf) {
        let Some(info) = hls::path_info(&path) else {
            warn!(path = %path.display(), "unrecognized playlist path");
            return;
        };
        self.register_stream(&self.private_root.join(&info.publish_name));
        if let Some(state) = self.streams.get_mut(&info.publish_name) {
            state.dirty_playlists.insert(path);
        }
        self.rewrite_dirty_playlists(&info.publish_name).await;
        self.try_commit(&info.publish_name).await;
    }

    /// Rewrite every dirty playlist whose listed segments are all published.
    ///
    /// A playlist referencing an unpublished segment stays dirty and is
    /// retried after the next publish; a local filename never reaches the
    /// public tree.
    async fn rewrite_dirty_playlists(&mut self, publish_name: &str) {
        let dirty: Vec<PathBuf> = match self.streams.get(publish_name) {
            Some(state) => state.dirty_playlists.iter().cloned().collect(),
            None => return,
        };

        for path in dirty {
            let Some(info) = hls::path_info(&path) else { continue };
            let ready = match self.playlist_ready(publish_name, &path, info.variant_index).await {
                Ok(ready) => ready,
                Err(e) => {
                    debug!(file = %path.display(), "playlist unreadable, keeping dirty: {e}");
                    continue;
                }
            };
            if !ready {
                continue;
            }

            let rewritten = {
                let Some(state) = self.streams.get(publish_name) else { return };
                let Some(variant) = state.stream.variant(info.variant_index) else {
                    continue;
                };
                match self.storage.generate_remote_playlist(&path, variant).await {
                    Ok(rewritten) => rewritten,
                    Err(e) => {
                        warn!(file = %path.display(), "playlist rewrite failed: {e}");
                        continue;
                    }
                }
            };

            let target = self
                .public_root
                .join(publish_name)
                .join(info.variant_index.to_string())
                .join(&info.file_name);
            if let Err(e) = write_file(&target, rewritten.as_bytes()).await {
                warn!(file = %target.display(), "failed to commit playlist: {e}");
                continue;
            }

            debug!(publish_name, file = %target.display(), "playlist referenced");
            if let Some(state) = self.streams.get_mut(publish_name) {
                state.dirty_playlists.remove(&path);
            }
        }
    }

    /// True when every segment the playlist lists is published.
    async fn playlist_ready(
        &self,
        publish_name: &str,
        path: &Path,
        variant_index: usize,
    ) -> std::io::Result<bool> {
        let contents = tokio::fs::read_to_string(path).await?;
        let Some(variant) = self
            .streams
            .get(publish_name)
            .and_then(|s| s.stream.variant(variant_index))
        else {
            return Ok(false);
        };

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let published = variant
                .segment_by_filename(trimmed)
                .is_some_and(|s| s.is_published());
            if !published {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn on_master_playlist(&mut self, path: PathBuf) {
        let Some(publish_name) = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            return;
        };
        self.register_stream(&self.private_root.join(&publish_name));

        let target = self
            .public_root
            .join(&publish_name)
            .join(&self.master_file_name);
        match tokio::fs::read(&path).await {
            Ok(contents) => {
                if let Err(e) = write_file(&target, &contents).await {
                    warn!(file = %target.display(), "failed to copy master playlist: {e}");
                    return;
                }
            }
            Err(e) => {
                warn!(file = %path.display(), "failed to read master playlist: {e}");
                return;
            }
        }

        if let Some(state) = self.streams.get_mut(&publish_name) {
            state.master_seen = true;
        }
        self.try_commit(&publish_name).await;
    }

    /// Commit the session directory as one aggregate unit once nothing is
    /// pending: master copied, every tier has content, no unpublished
    /// segment and no dirty playlist. Yields the root identifier handed to
    /// the stream's metadata record.
    async fn try_commit(&mut self, publish_name: &str) {
        let ready = match self.streams.get(publish_name) {
            Some(state) => {
                !state.committed
                    && state.master_seen
                    && !state.has_pending_work()
                    && state.stream.variants.iter().all(|v| !v.segments.is_empty())
            }
            None => false,
        };
        if !ready {
            return;
        }

        let dir = self.private_root.join(publish_name);
        match self.storage.add_directory(&dir).await {
            Ok(root_id) => {
                if let Some(state) = self.streams.get_mut(publish_name) {
                    state.committed = true;
                    state.stream.root_remote_id = Some(root_id.clone());
                }
                info!(publish_name, root_id, "publish directory committed");
            }
            Err(e) => {
                warn!(publish_name, "directory commit failed, will retry: {e}");
            }
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}
