//! HTTP adapters for the backing services.
//!
//! Each adapter implements one `ember_core` client trait plus `Probe`. The
//! response-to-snippet conversions are plain functions so they can be tested
//! without a server.

pub mod cache;
pub mod graph;
pub mod ollama;
pub mod vector;

pub use cache::HttpCache;
pub use graph::{EnvironmentSource, GraphSource, MaterialSource, ProcedureSource};
pub use ollama::OllamaGenerator;
pub use vector::VectorSource;

use ember_core::{EmberError, Result};
use serde::Deserialize;
use std::time::Duration;

/// `{success, data, message}` wrapper used by the knowledge-graph and cache
/// services.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// The payload, or an error carrying the service's message.
    pub fn into_data(self, dependency: &str) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(EmberError::dependency(
                dependency,
                self.message.unwrap_or_else(|| "request unsuccessful".into()),
            ))
        }
    }
}

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("ember/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// `base` with `segments` appended as percent-encoded path segments.
pub(crate) fn segment_url(base: &str, segments: &[&str]) -> std::result::Result<reqwest::Url, String> {
    let mut url = reqwest::Url::parse(base).map_err(|e| format!("invalid url '{}': {}", base, e))?;
    url.path_segments_mut()
        .map_err(|_| format!("url '{}' cannot take a path", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a transport error onto the core taxonomy.
pub(crate) fn classify(dependency: &str, timeout: Duration, err: reqwest::Error) -> EmberError {
    if err.is_timeout() {
        EmberError::timeout(dependency, timeout)
    } else {
        EmberError::dependency(dependency, err)
    }
}

/// `GET {url}` succeeding with a 2xx.
pub(crate) async fn probe_get(
    client: &reqwest::Client,
    dependency: &str,
    url: &str,
    timeout: Duration,
) -> Result<()> {
    client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map(|_| ())
        .map_err(|e| classify(dependency, timeout, e))
}

/// Decaying relevance for sources that return ranked but unscored results.
pub(crate) fn rank_relevance(base: f32, position: usize) -> f32 {
    (base - position as f32 * 0.05).max(0.05)
}
