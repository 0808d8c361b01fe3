use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
///
/// Constructed once at startup and passed by reference into each component.
/// There is deliberately no global configuration singleton.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hls: HlsPathConfig,
    pub logging: LoggingConfig,
    pub ffmpeg: FfmpegConfig,
    pub storage: StorageConfig,
    pub balancer: BalancerConfig,
    pub ingest: IngestConfig,
}

/// Local HLS directory layout
///
/// The transcoder writes beneath `private_path/<publishName>/<tierIndex>/`;
/// rewritten playlists are committed beneath `public_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsPathConfig {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
}

impl Default for HlsPathConfig {
    fn default() -> Self {
        Self {
            private_path: PathBuf::from("./hls/private"),
            public_path: PathBuf::from("./hls/public"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Encoder invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,
    /// Filename of the generated master playlist
    pub master_file_name: String,
    /// Segment duration in seconds (also the key-frame interval)
    pub hls_time: u32,
    /// Encoder quality factor
    pub crf: u32,
    /// Encoder preset
    pub preset: String,
    /// Segments kept in each live playlist
    pub hls_list_size: u32,
    /// Segments kept on disk before the encoder deletes them
    pub hls_max_size: u32,
    /// Ordered quality tiers, lowest index first
    pub qualities: Vec<QualityTier>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            master_file_name: "index.m3u8".to_string(),
            hls_time: 4,
            crf: 26,
            preset: "veryfast".to_string(),
            hls_list_size: 6,
            hls_max_size: 10,
            qualities: vec![
                QualityTier {
                    resolution: "1280x720".to_string(),
                    max_bitrate: "3000k".to_string(),
                    fps: 30,
                    buf_size: "6000k".to_string(),
                },
                QualityTier {
                    resolution: "854x480".to_string(),
                    max_bitrate: "1500k".to_string(),
                    fps: 30,
                    buf_size: "3000k".to_string(),
                },
            ],
        }
    }
}

/// One bitrate/resolution rendition the encoder produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityTier {
    pub resolution: String,
    pub max_bitrate: String,
    pub fps: u32,
    pub buf_size: String,
}

/// Storage backend selection and settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// Gateway base URL used to compose public content URLs
    pub gateway: String,
    /// Multiaddress of the bootstrap peer (required in `ipfs` mode)
    pub bootstrap_addr: Option<String>,
    /// Listen multiaddress of the local content node
    pub listen_addr: String,
    pub oss: OssConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Ipfs,
            gateway: "http://localhost:5002".to_string(),
            bootstrap_addr: None,
            listen_addr: "/ip4/0.0.0.0/tcp/4002".to_string(),
            oss: OssConfig::default(),
        }
    }
}

/// Storage backend mode switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Peer-to-peer content-addressed node
    Ipfs,
    /// S3-compatible object storage
    Oss,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Ipfs
    }
}

/// S3-compatible object storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OssConfig {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: Option<String>,
    /// Key prefix inside the bucket (e.g. "hls/")
    pub base_path: String,
    /// Public URL prefix for serving uploaded objects
    pub public_url_prefix: String,
}

/// Load balancer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub tcp: Option<LbTargets>,
    pub http: Option<LbTargets>,
}

/// One listen address fronting a set of backend addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbTargets {
    pub from: String,
    pub to: Vec<String>,
}

/// Ingest handoff settings
///
/// The wire-level ingestion protocol server is an external collaborator; it
/// hands each accepted publish session to the pipeline over this address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub listen_addr: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9500".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, with `LIVEBEAM_` environment
    /// variable overrides layered on top.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = ConfigBuilder::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("LIVEBEAM").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = ConfigBuilder::builder()
            .add_source(Environment::with_prefix("LIVEBEAM").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// Configuration errors are fatal at startup: a missing encoder binary or
    /// a missing bootstrap address would leave the pipeline unable to do its
    /// one job, so the process must not proceed with them.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ffmpeg.ffmpeg_path.trim().is_empty() {
            errors.push("ffmpeg.ffmpeg_path must not be empty".to_string());
        }
        if self.ffmpeg.master_file_name.trim().is_empty() {
            errors.push("ffmpeg.master_file_name must not be empty".to_string());
        }
        if self.ffmpeg.hls_time == 0 {
            errors.push("ffmpeg.hls_time must be at least 1 second".to_string());
        }
        if self.ffmpeg.qualities.is_empty() {
            errors.push("ffmpeg.qualities must list at least one tier".to_string());
        }
        if self.ffmpeg.hls_max_size <= self.ffmpeg.hls_list_size {
            errors.push("ffmpeg.hls_max_size must exceed ffmpeg.hls_list_size".to_string());
        }

        if self.storage.mode == StorageMode::Ipfs {
            match &self.storage.bootstrap_addr {
                Some(addr) if !addr.trim().is_empty() => {}
                _ => errors.push(
                    "storage.bootstrap_addr is required in ipfs mode".to_string(),
                ),
            }
        }
        if self.storage.mode == StorageMode::Oss && self.storage.oss.bucket.trim().is_empty() {
            errors.push("storage.oss.bucket is required in oss mode".to_string());
        }

        if let Some(tcp) = &self.balancer.tcp {
            if tcp.to.is_empty() {
                errors.push("balancer.tcp.to must list at least one backend".to_string());
            }
        }
        if let Some(http) = &self.balancer.http {
            if http.to.is_empty() {
                errors.push("balancer.http.to must list at least one backend".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Private HLS root a given publish session writes beneath
    #[must_use]
    pub fn stream_output_dir(&self, publish_name: &str) -> PathBuf {
        self.hls.private_path.join(publish_name)
    }

    /// Public HLS root rewritten playlists are committed beneath
    #[must_use]
    pub fn public_stream_dir(&self, publish_name: &str) -> PathBuf {
        self.hls.public_path.join(publish_name)
    }
}
