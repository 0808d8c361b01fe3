//! Filesystem observation seam.
//!
//! The monitor consumes [`FsEventSource`] so the mechanism is swappable and
//! tests can inject synthetic events. The production implementation is an
//! interval-driven poller: a file is only reported once its size and mtime
//! are unchanged between two consecutive scans, which is the "stable"
//! criterion the publish pipeline depends on.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
    pub is_dir: bool,
}

#[async_trait]
pub trait FsEventSource: Send {
    /// Next filesystem event, or `None` when the source is exhausted.
    async fn next(&mut self) -> Option<FsEvent>;
}

/// Event source backed by a channel, for injecting synthetic events.
pub struct ChannelSource {
    receiver: mpsc::Receiver<FsEvent>,
}

impl ChannelSource {
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<FsEvent>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl FsEventSource for ChannelSource {
    async fn next(&mut self) -> Option<FsEvent> {
        self.receiver.recv().await
    }
}

#[derive(Debug)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
    /// Size/mtime last reported downstream; `None` until first report
    emitted: Option<(u64, Option<SystemTime>)>,
    seen: bool,
}

/// Interval-driven recursive scanner over the private HLS root.
pub struct PollSource {
    root: PathBuf,
    interval: tokio::time::Interval,
    files: HashMap<PathBuf, FileStamp>,
    dirs: HashSet<PathBuf>,
    queue: VecDeque<FsEvent>,
}

impl PollSource {
    #[must_use]
    pub fn new(root: PathBuf, poll_interval: Duration) -> Self {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self {
            root,
            interval,
            files: HashMap::new(),
            dirs: HashSet::new(),
            queue: VecDeque::new(),
        }
    }

    async fn scan(&mut self) -> std::io::Result<()> {
        for stamp in self.files.values_mut() {
            stamp.seen = false;
        }
        let mut seen_dirs = HashSet::new();
        // stable files found this scan, ordered by mtime so segments surface
        // in creation order within a tier
        let mut stable: Vec<(Option<SystemTime>, PathBuf, FsEventKind)> = Vec::new();

        let mut pending = vec![self.root.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    // raced with the encoder's segment rotation
                    Err(_) => continue,
                };

                if meta.is_dir() {
                    seen_dirs.insert(path.clone());
                    if self.dirs.insert(path.clone()) {
                        self.queue.push_back(FsEvent {
                            path: path.clone(),
                            kind: FsEventKind::Created,
                            is_dir: true,
                        });
                    }
                    pending.push(path);
                    continue;
                }

                let len = meta.len();
                let modified = meta.modified().ok();
                match self.files.get_mut(&path) {
                    None => {
                        self.files.insert(
                            path,
                            FileStamp {
                                len,
                                modified,
                                emitted: None,
                                seen: true,
                            },
                        );
                    }
                    Some(stamp) => {
                        stamp.seen = true;
                        if stamp.len == len && stamp.modified == modified {
                            // unchanged since last scan: stable
                            if stamp.emitted != Some((len, modified)) {
                                let kind = if stamp.emitted.is_none() {
                                    FsEventKind::Created
                                } else {
                                    FsEventKind::Modified
                                };
                                stamp.emitted = Some((len, modified));
                                stable.push((modified, path, kind));
                            }
                        } else {
                            stamp.len = len;
                            stamp.modified = modified;
                        }
                    }
                }
            }
        }

        stable.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        for (_, path, kind) in stable {
            self.queue.push_back(FsEvent {
                path,
                kind,
                is_dir: false,
            });
        }

        let gone_files: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, stamp)| !stamp.seen)
            .map(|(path, _)| path.clone())
            .collect();
        for path in gone_files {
            self.files.remove(&path);
            self.queue.push_back(FsEvent {
                path,
                kind: FsEventKind::Removed,
                is_dir: false,
            });
        }
        let gone_dirs: Vec<PathBuf> = self.dirs.difference(&seen_dirs).cloned().collect();
        for path in gone_dirs {
            self.dirs.remove(&path);
            self.queue.push_back(FsEvent {
                path,
                kind: FsEventKind::Removed,
                is_dir: true,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl FsEventSource for PollSource {
    async fn next(&mut self) -> Option<FsEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }
            self.interval.tick().await;
            if let Err(e) = self.scan().await {
                warn!(root = %self.root.display(), "scan failed: {e}");
            }
        }
    }
}

/// True when the path sits directly beneath `root`.
pub(crate) fn is_direct_child(root: &Path, path: &Path) -> bool {
    path.parent() == Some(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(source: &mut PollSource) -> FsEvent {
        timeout(Duration::from_secs(5), source.next())
            .await
            .expect("timed out waiting for fs event")
            .expect("source ended")
    }

    #[tokio::test]
    async fn reports_new_files_once_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PollSource::new(dir.path().to_path_buf(), Duration::from_millis(10));

        tokio::fs::write(dir.path().join("stream0.ts"), b"payload")
            .await
            .unwrap();

        let event = next_event(&mut source).await;
        assert_eq!(event.kind, FsEventKind::Created);
        assert_eq!(event.path, dir.path().join("stream0.ts"));
        assert!(!event.is_dir);
    }

    #[tokio::test]
    async fn reports_new_directories_before_their_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PollSource::new(dir.path().to_path_buf(), Duration::from_millis(10));

        let tier = dir.path().join("alice").join("0");
        tokio::fs::create_dir_all(&tier).await.unwrap();
        tokio::fs::write(tier.join("stream0.ts"), b"payload")
            .await
            .unwrap();

        let first = next_event(&mut source).await;
        assert!(first.is_dir);
        assert_eq!(first.path, dir.path().join("alice"));

        let second = next_event(&mut source).await;
        assert!(second.is_dir);
        assert_eq!(second.path, tier);

        let third = next_event(&mut source).await;
        assert_eq!(third.kind, FsEventKind::Created);
        assert!(!third.is_dir);
    }

    #[tokio::test]
    async fn rewritten_files_surface_as_modified() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("stream.m3u8");
        let mut source = PollSource::new(dir.path().to_path_buf(), Duration::from_millis(10));

        tokio::fs::write(&playlist, b"#EXTM3U\n").await.unwrap();
        let created = next_event(&mut source).await;
        assert_eq!(created.kind, FsEventKind::Created);

        tokio::fs::write(&playlist, b"#EXTM3U\nstream0.ts\n")
            .await
            .unwrap();
        let modified = next_event(&mut source).await;
        assert_eq!(modified.kind, FsEventKind::Modified);
        assert_eq!(modified.path, playlist);
    }

    #[tokio::test]
    async fn rotated_segments_surface_as_removed() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("stream0.ts");
        let mut source = PollSource::new(dir.path().to_path_buf(), Duration::from_millis(10));

        tokio::fs::write(&segment, b"payload").await.unwrap();
        assert_eq!(next_event(&mut source).await.kind, FsEventKind::Created);

        tokio::fs::remove_file(&segment).await.unwrap();
        let removed = next_event(&mut source).await;
        assert_eq!(removed.kind, FsEventKind::Removed);
        assert_eq!(removed.path, segment);
    }
}
