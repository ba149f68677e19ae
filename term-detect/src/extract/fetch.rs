//! Default media fetcher for local paths, `file://` and `http(s)://` URLs.

use super::{FetchOptions, MediaFetcher};
use crate::error::{Result, TermError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetches local files with `tokio::fs` and remote ones with `reqwest`.
#[derive(Debug, Clone)]
pub struct StdFetcher {
    client: reqwest::Client,
}

impl Default for StdFetcher {
    fn default() -> Self {
        Self::new(FetchOptions::default().timeout)
    }
}

impl StdFetcher {
    /// Creates a fetcher whose remote requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to configure HTTP client, using defaults");
                reqwest::Client::new()
            }
        };
        Self { client }
    }

    fn is_remote(location: &str) -> bool {
        let lower = location.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

#[async_trait]
impl MediaFetcher for StdFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let location = location.trim();
        if location.is_empty() {
            return Err(TermError::fetch(location, "empty location"));
        }

        if Self::is_remote(location) {
            debug!(url = %location, "Downloading media");
            let response = self
                .client
                .get(location)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| TermError::fetch(location, e))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| TermError::fetch(location, e))?;
            return Ok(body.to_vec());
        }

        let path = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::read(path)
            .await
            .map_err(|e| TermError::fetch(location, e))
    }
}
