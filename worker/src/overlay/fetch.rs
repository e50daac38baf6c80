//! Process-wide fetch configuration
//!
//! Set by `init` requests and read by the mask decoder for the lifetime of
//! the worker. Re-initialization is last-write-wins: each process request
//! takes a snapshot when it starts, so a later `init` only affects requests
//! that begin after it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use super::types::DecodeError;

/// Where encoded masks are fetched from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchConfig {
    /// Server origin; masks are read from the local filesystem when unset
    pub origin: Option<String>,
    /// Headers sent with every mask fetch
    pub headers: BTreeMap<String, String>,
    /// URL path prefix between the origin and `/media`
    pub path_prefix: String,
}

impl FetchConfig {
    /// URL serving the mask at `path`, or `None` when masks are read from disk
    pub fn media_url(&self, path: &str) -> Result<Option<reqwest::Url>, DecodeError> {
        let Some(origin) = self.origin.as_deref() else {
            return Ok(None);
        };

        let prefix = self.path_prefix.trim_end_matches('/');
        let base = format!("{}{}/media", origin.trim_end_matches('/'), prefix);
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| DecodeError::InvalidUrl(format!("{}: {}", base, e)))?;
        url.query_pairs_mut().append_pair("filepath", path);

        Ok(Some(url))
    }
}

/// Shared holder of the current [`FetchConfig`]
#[derive(Debug, Default)]
pub struct FetchConfigStore {
    current: RwLock<Arc<FetchConfig>>,
    generation: AtomicU64,
}

impl FetchConfigStore {
    pub fn new(initial: FetchConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            generation: AtomicU64::new(0),
        }
    }

    /// Configuration in effect right now
    pub async fn snapshot(&self) -> Arc<FetchConfig> {
        self.current.read().await.clone()
    }

    /// Replace the configuration, returning the new generation
    pub async fn replace(&self, config: FetchConfig) -> u64 {
        let mut current = self.current.write().await;
        *current = Arc::new(config);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Fetch configuration updated (generation {}): origin={:?}, prefix={:?}",
            generation, current.origin, current.path_prefix
        );
        generation
    }

    /// Number of replacements since start-up
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
