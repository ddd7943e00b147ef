//! HTTP provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use pipeline::{DataProvider, ProviderError, SourceKey};

/// Errors raised while building a provider.
#[derive(Debug, Error)]
pub enum SourcesError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// GETs `<base>/<key>`. A 404 means the key is not available.
#[derive(Debug, Clone)]
pub struct HttpSourceProvider {
    client: Client,
    base: String,
}

impl HttpSourceProvider {
    /// # Errors
    ///
    /// [`SourcesError::Client`] if the TLS backend fails to initialise.
    pub fn new(base: impl Into<String>, timeout_secs: u64) -> Result<Self, SourcesError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, key: &SourceKey) -> String {
        format!("{}/{key}", self.base)
    }
}

#[async_trait]
impl DataProvider for HttpSourceProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, key: &SourceKey) -> Result<Option<Value>, ProviderError> {
        let url = self.url_for(key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(%url, "source not published");
                Ok(None)
            }
            status if status.is_success() => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ProviderError::Transport(e.to_string()))?;
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| ProviderError::Decode {
                        key: key.clone(),
                        message: e.to_string(),
                    })
            }
            status => {
                warn!(%url, %status, "source fetch failed");
                Err(ProviderError::Transport(format!("GET {url} returned {status}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_key() {
        let provider = HttpSourceProvider::new("http://localhost:9000/v1/", 5).unwrap();
        assert_eq!(
            provider.url_for(&SourceKey::from_static("gap_analysis")),
            "http://localhost:9000/v1/gap_analysis"
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let provider = HttpSourceProvider::new("http://127.0.0.1:9", 5).unwrap();
        let err = provider.fetch(&SourceKey::from_static("strategy")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
