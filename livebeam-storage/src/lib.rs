// Content-addressable storage abstraction for HLS artifacts
//
// Supports multiple backends:
// - P2pStorage: content-addressed peer-to-peer node (default)
// - OssStorage: S3-compatible object storage
// - MemoryStorage: in-memory (for testing)
//
// The watcher only ever sees `Arc<dyn HlsStorage>`; which backend is active
// is a pure configuration choice.

pub mod error;
pub mod ipfs;
pub mod memory;
pub mod node;
pub mod oss;

use async_trait::async_trait;
use std::path::Path;

use livebeam_core::hls::HlsVariant;

pub use error::{Result, StorageError};
pub use ipfs::P2pStorage;
pub use memory::MemoryStorage;
pub use node::{content_id, ContentNode};
pub use oss::OssStorage;

/// Storage contract for publishing HLS artifacts
///
/// Identifiers returned by `save_into_hls_directory` and `add_directory` are
/// backend-specific and opaque to callers: a gateway URL for the P2P
/// backend, an object URL for OSS.
#[async_trait]
pub trait HlsStorage: Send + Sync {
    /// Publish one file's bytes, returning its remote identifier.
    async fn save_into_hls_directory(&self, file_path: &Path) -> Result<String>;

    /// Publish a directory as one aggregate addressable unit, returning the
    /// root identifier handed back to the session's metadata record.
    async fn add_directory(&self, dir_path: &Path) -> Result<String>;

    /// Rewrite a local playlist so every segment line references the
    /// segment's remote identifier instead of its local filename.
    ///
    /// Lines naming a segment that is unknown or not yet published are
    /// dropped; callers must only invoke this once every listed segment has
    /// been published. Comment lines pass through untouched.
    async fn generate_remote_playlist(
        &self,
        playlist_path: &Path,
        variant: &HlsVariant,
    ) -> Result<String> {
        let contents = tokio::fs::read_to_string(playlist_path).await?;
        let mut rewritten = String::with_capacity(contents.len());

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                rewritten.push_str(line);
                rewritten.push('\n');
                continue;
            }
            if let Some(remote_id) = variant
                .segment_by_filename(trimmed)
                .and_then(|s| s.remote_id.as_deref())
            {
                rewritten.push_str(remote_id);
                rewritten.push('\n');
            }
            // unknown or unpublished segment: line dropped
        }

        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livebeam_core::hls::HlsSegment;
    use std::path::PathBuf;

    struct NullStorage;

    #[async_trait]
    impl HlsStorage for NullStorage {
        async fn save_into_hls_directory(&self, _file_path: &Path) -> Result<String> {
            Ok(String::new())
        }
        async fn add_directory(&self, _dir_path: &Path) -> Result<String> {
            Ok(String::new())
        }
    }

    fn variant_with(segments: &[(&str, Option<&str>)]) -> HlsVariant {
        let mut variant = HlsVariant::new(0);
        for (name, remote) in segments {
            variant.segments.push(HlsSegment {
                publish_name: "alice".to_string(),
                variant_index: 0,
                local_path: PathBuf::from(format!("/p/alice/0/{name}")),
                remote_id: remote.map(str::to_string),
            });
        }
        variant
    }

    #[tokio::test]
    async fn rewrites_segment_lines_to_remote_ids() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("stream.m3u8");
        tokio::fs::write(
            &playlist,
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nstream0.ts\n#EXTINF:4.0,\nstream1.ts\n",
        )
        .await
        .unwrap();

        let variant = variant_with(&[
            ("stream0.ts", Some("http://gw/ipfs/aaa")),
            ("stream1.ts", Some("http://gw/ipfs/bbb")),
        ]);

        let rewritten = NullStorage
            .generate_remote_playlist(&playlist, &variant)
            .await
            .unwrap();

        assert!(rewritten.contains("#EXTM3U"));
        assert!(rewritten.contains("http://gw/ipfs/aaa"));
        assert!(rewritten.contains("http://gw/ipfs/bbb"));
        assert!(!rewritten.contains("stream0.ts"));
    }

    #[tokio::test]
    async fn drops_lines_for_unpublished_segments() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("stream.m3u8");
        tokio::fs::write(&playlist, "#EXTM3U\nstream0.ts\nstream1.ts\n")
            .await
            .unwrap();

        let variant = variant_with(&[("stream0.ts", Some("http://gw/ipfs/aaa")), ("stream1.ts", None)]);

        let rewritten = NullStorage
            .generate_remote_playlist(&playlist, &variant)
            .await
            .unwrap();

        assert!(rewritten.contains("http://gw/ipfs/aaa"));
        assert!(!rewritten.contains("stream1.ts"));
    }
}
