//! JSON file provider.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use pipeline::{DataProvider, ProviderError, SourceKey};

/// Reads `<dir>/<key>.json`. A missing file means the key is not available.
#[derive(Debug, Clone)]
pub struct JsonDirectoryProvider {
    dir: PathBuf,
}

impl JsonDirectoryProvider {
    /// Creates a provider over `dir`. The directory is not checked until the
    /// first fetch.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory files are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SourceKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DataProvider for JsonDirectoryProvider {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch(&self, key: &SourceKey) -> Result<Option<Value>, ProviderError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "source file absent");
                return Ok(None);
            }
            Err(e) => {
                return Err(ProviderError::Transport(format!("{}: {e}", path.display())));
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ProviderError::Decode {
                key: key.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cadence-sources-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn reads_present_key_and_skips_absent_one() {
        let dir = scratch_dir().await;
        tokio::fs::write(dir.join("strategy.json"), br#"{"business_goals": ["Grow"]}"#)
            .await
            .unwrap();
        let provider = JsonDirectoryProvider::new(&dir);

        let strategy = provider.fetch(&SourceKey::from_static("strategy")).await.unwrap();
        assert_eq!(strategy, Some(json!({ "business_goals": ["Grow"] })));

        let keywords = provider.fetch(&SourceKey::from_static("keywords")).await.unwrap();
        assert_eq!(keywords, None);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_file_is_a_decode_error() {
        let dir = scratch_dir().await;
        tokio::fs::write(dir.join("keywords.json"), b"not json").await.unwrap();
        let provider = JsonDirectoryProvider::new(&dir);

        let err = provider.fetch(&SourceKey::from_static("keywords")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode { ref key, .. } if key.as_str() == "keywords"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
