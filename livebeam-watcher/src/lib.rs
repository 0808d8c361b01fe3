// Segment watcher: bridges the transcoder's local filesystem output to the
// storage backend.
//
// One watcher instance supervises every concurrent stream directory under
// the private HLS root. Artifacts move through Created -> Stable ->
// Published -> Referenced; a playlist is only rewritten once every segment
// it lists has been published. Publish failures are retried, never
// propagated: the monitor logs and keeps running.

pub mod fs_events;
pub mod monitor;

pub use fs_events::{ChannelSource, FsEvent, FsEventKind, FsEventSource, PollSource};
pub use monitor::HlsMonitor;
