//! HLS data model and output-tree path conventions.
//!
//! The transcoder lays its output out as
//! `<privateRoot>/<publishName>/<tierIndex>/<file>`, with one sub-playlist
//! per tier and a master playlist directly under the publish directory.
//! Everything in this module is pure data; publishing state lives with the
//! watcher that owns it.

use std::path::{Path, PathBuf};

/// One time-bounded media chunk belonging to a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsSegment {
    /// Name of the owning live session
    pub publish_name: String,
    /// Bitrate/resolution tier this segment belongs to
    pub variant_index: usize,
    /// Absolute path of the segment file on local disk
    pub local_path: PathBuf,
    /// Backend-assigned identifier, set once the segment is published.
    ///
    /// The local file may only be superseded after this is set and the
    /// rewritten playlist referencing it has been committed.
    pub remote_id: Option<String>,
}

impl HlsSegment {
    /// Filename component of the local path
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.local_path.file_name().and_then(|n| n.to_str())
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.remote_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// One bitrate/resolution rendition: an ordered, append-only segment list.
#[derive(Debug, Clone, Default)]
pub struct HlsVariant {
    pub variant_index: usize,
    /// Segments in creation order. The live window is bounded by the
    /// encoder's own sliding-window deletion, not by us.
    pub segments: Vec<HlsSegment>,
}

impl HlsVariant {
    #[must_use]
    pub fn new(variant_index: usize) -> Self {
        Self {
            variant_index,
            segments: Vec::new(),
        }
    }

    /// Look a segment up by its local filename.
    #[must_use]
    pub fn segment_by_filename(&self, file_name: &str) -> Option<&HlsSegment> {
        self.segments
            .iter()
            .find(|s| s.file_name() == Some(file_name))
    }

    #[must_use]
    pub fn has_segment(&self, file_name: &str) -> bool {
        self.segment_by_filename(file_name).is_some()
    }
}

/// One live session: its renditions and, once available, the
/// content-addressed identifier of its publish folder.
#[derive(Debug, Clone)]
pub struct HlsStream {
    pub publish_name: String,
    pub variants: Vec<HlsVariant>,
    pub root_remote_id: Option<String>,
}

impl HlsStream {
    /// Create a stream with one empty variant per configured quality tier.
    #[must_use]
    pub fn new(publish_name: impl Into<String>, tier_count: usize) -> Self {
        Self {
            publish_name: publish_name.into(),
            variants: (0..tier_count).map(HlsVariant::new).collect(),
            root_remote_id: None,
        }
    }

    #[must_use]
    pub fn variant(&self, index: usize) -> Option<&HlsVariant> {
        self.variants.get(index)
    }

    pub fn variant_mut(&mut self, index: usize) -> Option<&mut HlsVariant> {
        self.variants.get_mut(index)
    }
}

/// Kind of artifact a path under the private root represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsFileKind {
    /// Master playlist listing all tiers
    Master,
    /// Per-tier sub-playlist
    Variant,
    /// Media segment
    Segment,
}

/// Classify a file beneath the private HLS root.
///
/// A playlist whose parent directory is a tier index is a variant playlist;
/// any other playlist is the master. `.ts` files are segments. Everything
/// else is not ours.
#[must_use]
pub fn classify(path: &Path) -> Option<HlsFileKind> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => {
            let parent_is_tier = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.parse::<usize>().is_ok());
            if parent_is_tier {
                Some(HlsFileKind::Variant)
            } else {
                Some(HlsFileKind::Master)
            }
        }
        Some("ts") => Some(HlsFileKind::Segment),
        _ => None,
    }
}

/// Components extracted from a tier-level path
/// (`.../<publishName>/<tierIndex>/<fileName>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub publish_name: String,
    pub variant_index: usize,
    pub file_name: String,
}

/// Extract publish name, tier index and filename from a tier-level path.
///
/// Must not be used for the master playlist, which sits one level higher.
#[must_use]
pub fn path_info(path: &Path) -> Option<PathInfo> {
    let file_name = path.file_name()?.to_str()?.to_string();
    let tier_dir = path.parent()?;
    let variant_index = tier_dir.file_name()?.to_str()?.parse::<usize>().ok()?;
    let publish_name = tier_dir.parent()?.file_name()?.to_str()?.to_string();
    Some(PathInfo {
        publish_name,
        variant_index,
        file_name,
    })
}

/// Build an unpublished [`HlsSegment`] from its on-disk path.
#[must_use]
pub fn segment_from_path(path: &Path) -> Option<HlsSegment> {
    let info = path_info(path)?;
    Some(HlsSegment {
        publish_name: info.publish_name,
        variant_index: info.variant_index,
        local_path: path.to_path_buf(),
        remote_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_master_variant_and_segment() {
        assert_eq!(
            classify(Path::new("/hls/private/alice/index.m3u8")),
            Some(HlsFileKind::Master)
        );
        assert_eq!(
            classify(Path::new("/hls/private/alice/0/stream.m3u8")),
            Some(HlsFileKind::Variant)
        );
        assert_eq!(
            classify(Path::new("/hls/private/alice/1/stream3.ts")),
            Some(HlsFileKind::Segment)
        );
        assert_eq!(classify(Path::new("/hls/private/alice/0/stream.tmp")), None);
    }

    #[test]
    fn extracts_path_info_from_segment_path() {
        let info = path_info(Path::new("/hls/private/alice/1/stream7.ts")).unwrap();
        assert_eq!(info.publish_name, "alice");
        assert_eq!(info.variant_index, 1);
        assert_eq!(info.file_name, "stream7.ts");
    }

    #[test]
    fn rejects_non_numeric_tier_directory() {
        assert!(path_info(Path::new("/hls/private/alice/tier/stream7.ts")).is_none());
    }

    #[test]
    fn segment_from_path_starts_unpublished() {
        let segment = segment_from_path(Path::new("/hls/private/alice/0/stream0.ts")).unwrap();
        assert!(!segment.is_published());
        assert_eq!(segment.file_name(), Some("stream0.ts"));
    }

    #[test]
    fn variant_lookup_by_filename() {
        let mut variant = HlsVariant::new(0);
        variant.segments.push(HlsSegment {
            publish_name: "alice".to_string(),
            variant_index: 0,
            local_path: PathBuf::from("/hls/private/alice/0/stream0.ts"),
            remote_id: Some("abc123".to_string()),
        });

        assert!(variant.segment_by_filename("stream0.ts").is_some());
        assert!(variant.segment_by_filename("stream1.ts").is_none());
    }

    #[test]
    fn new_stream_has_one_variant_per_tier() {
        let stream = HlsStream::new("alice", 3);
        assert_eq!(stream.variants.len(), 3);
        assert!(stream.variants.iter().all(|v| v.segments.is_empty()));
        assert_eq!(stream.variants[2].variant_index, 2);
    }
}
