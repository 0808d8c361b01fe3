pub mod bootstrap;
pub mod config;
pub mod hls;
pub mod logging;

pub use config::Config;
pub use hls::{HlsFileKind, HlsSegment, HlsStream, HlsVariant};
