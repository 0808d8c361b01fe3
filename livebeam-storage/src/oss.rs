// Object-storage backend
//
// S3-compatible upload via OpenDAL. The remote identifier is the object's
// public URL under the configured prefix.

use async_trait::async_trait;
use opendal::{services::S3, Operator};
use std::path::Path;
use tracing::info;

use livebeam_core::config::OssConfig;

use crate::error::{Result, StorageError};
use crate::HlsStorage;

pub struct OssStorage {
    config: OssConfig,
    operator: Operator,
}

impl OssStorage {
    pub fn new(config: OssConfig) -> Result<Self> {
        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint,
            "initializing object storage backend"
        );

        let mut builder = S3::default()
            .endpoint(&config.endpoint)
            .access_key_id(&config.access_key_id)
            .secret_access_key(&config.secret_access_key)
            .bucket(&config.bucket);

        if let Some(region) = &config.region {
            builder = builder.region(region);
        }

        let operator = Operator::new(builder)
            .map_err(|e| StorageError::Backend(format!("operator setup failed: {e}")))?
            .finish();

        Ok(Self { config, operator })
    }

    fn object_key(&self, name: &str) -> String {
        if self.config.base_path.is_empty() {
            name.to_string()
        } else {
            format!("{}{}", self.config.base_path, name)
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}{}", self.config.public_url_prefix, key)
    }
}

/// Key fragment for one published file: its trailing
/// `<publishName>/<tierIndex>/<fileName>` components. The encoder emits the
/// same filenames in every tier of every session, so a bare-filename key
/// would silently overwrite across tiers and streams.
fn segment_key(file_path: &Path) -> Result<String> {
    let components: Vec<&str> = file_path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .collect();
    if components.is_empty() {
        return Err(StorageError::InvalidAddress(
            file_path.display().to_string(),
        ));
    }
    let tail = components.len().saturating_sub(3);
    Ok(components[tail..].join("/"))
}

#[async_trait]
impl HlsStorage for OssStorage {
    async fn save_into_hls_directory(&self, file_path: &Path) -> Result<String> {
        let data = tokio::fs::read(file_path).await?;
        let key = self.object_key(&segment_key(file_path)?);

        self.operator
            .write(&key, data)
            .await
            .map_err(|e| StorageError::Backend(format!("object write failed: {e}")))?;

        Ok(self.public_url(&key))
    }

    async fn add_directory(&self, dir_path: &Path) -> Result<String> {
        let dir_name = dir_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidAddress(dir_path.display().to_string()))?;

        let mut pending = vec![dir_path.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(dir_path)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                let key = self.object_key(&format!("{dir_name}/{relative}"));
                let data = tokio::fs::read(&path).await?;
                self.operator
                    .write(&key, data)
                    .await
                    .map_err(|e| StorageError::Backend(format!("object write failed: {e}")))?;
            }
        }

        let root_key = self.object_key(&format!("{dir_name}/"));
        Ok(self.public_url(&root_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> OssStorage {
        OssStorage::new(OssConfig {
            endpoint: "http://minio.local:9000".to_string(),
            access_key_id: "test".to_string(),
            secret_access_key: "test".to_string(),
            bucket: "segments".to_string(),
            region: Some("us-east-1".to_string()),
            base_path: "hls/".to_string(),
            public_url_prefix: "https://cdn.example.com/".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn object_keys_carry_the_base_path() {
        let storage = test_storage();
        assert_eq!(storage.object_key("stream0.ts"), "hls/stream0.ts");
        assert_eq!(
            storage.public_url(&storage.object_key("stream0.ts")),
            "https://cdn.example.com/hls/stream0.ts"
        );
    }

    #[test]
    fn segment_keys_are_distinct_across_tiers_and_sessions() {
        let alice_t0 = segment_key(Path::new("/hls/private/alice/0/stream0.ts")).unwrap();
        let alice_t1 = segment_key(Path::new("/hls/private/alice/1/stream0.ts")).unwrap();
        let bob_t0 = segment_key(Path::new("/hls/private/bob/0/stream0.ts")).unwrap();

        assert_eq!(alice_t0, "alice/0/stream0.ts");
        assert_eq!(alice_t1, "alice/1/stream0.ts");
        assert_eq!(bob_t0, "bob/0/stream0.ts");
    }

    #[test]
    fn short_paths_still_yield_a_key() {
        assert_eq!(segment_key(Path::new("stream0.ts")).unwrap(), "stream0.ts");
        assert!(segment_key(Path::new("/")).is_err());
    }
}
