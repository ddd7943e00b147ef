//! Cadence upstream data providers.
//!
//! Implements the [`pipeline::DataProvider`] trait for the two places upstream
//! subsystems publish their output: a directory of JSON files and an HTTP
//! endpoint. Both are read-only.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File and network I/O live here. The [`pipeline`] crate
//! sees only [`pipeline::DataProvider`] and the [`pipeline::SourceCatalog`]
//! built from it.
//!
//! ## Configuration
//!
//! The `[sources]` table of the run file selects providers:
//!
//! ```toml
//! [sources]
//! dir = "./upstream"                       # reads ./upstream/<key>.json
//! http_base = "https://data.internal/v1"   # GETs <base>/<key>
//! keys = ["strategy", "keywords"]          # defaults to every upstream key
//! ```
//!
//! When both are set the directory is consulted first.

pub mod directory;
pub mod http;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use pipeline::{DataProvider, SourceKey};

pub use directory::JsonDirectoryProvider;
pub use http::{HttpSourceProvider, SourcesError};

/// The `[sources]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directory holding `<key>.json` files.
    pub dir: Option<PathBuf>,
    /// Base URL of an HTTP source service.
    pub http_base: Option<String>,
    /// HTTP timeout in seconds.
    pub http_timeout_secs: Option<u64>,
    /// Keys to fetch. Empty means [`SourceKey::UPSTREAM`].
    pub keys: Vec<SourceKey>,
}

impl SourcesConfig {
    /// The keys to gather.
    pub fn keys(&self) -> Vec<SourceKey> {
        if self.keys.is_empty() {
            SourceKey::UPSTREAM
                .iter()
                .map(|k| SourceKey::from_static(k))
                .collect()
        } else {
            self.keys.clone()
        }
    }

    /// Builds the configured providers in lookup order.
    ///
    /// # Errors
    ///
    /// [`SourcesError`] if the HTTP client cannot be built.
    pub fn providers(&self) -> Result<Vec<Arc<dyn DataProvider>>, SourcesError> {
        let mut providers: Vec<Arc<dyn DataProvider>> = Vec::new();
        if let Some(dir) = &self.dir {
            providers.push(Arc::new(JsonDirectoryProvider::new(dir.clone())));
        }
        if let Some(base) = &self.http_base {
            providers.push(Arc::new(HttpSourceProvider::new(
                base.clone(),
                self.http_timeout_secs.unwrap_or(30),
            )?));
        }
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_list_means_every_upstream_key() {
        let keys = SourcesConfig::default().keys();
        assert_eq!(keys.len(), SourceKey::UPSTREAM.len());
        assert_eq!(keys[0].as_str(), SourceKey::STRATEGY);
    }

    #[test]
    fn directory_is_consulted_before_http() {
        let config: SourcesConfig = serde_json::from_value(serde_json::json!({
            "dir": "/tmp/upstream",
            "http_base": "http://localhost:9000",
            "keys": ["strategy"]
        }))
        .unwrap();
        let providers = config.providers().unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["directory", "http"]);
        assert_eq!(config.keys(), vec![SourceKey::from_static("strategy")]);
    }
}
