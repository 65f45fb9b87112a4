use super::{classify, http_client, probe_get, trim_base, Envelope};
use async_trait::async_trait;
use ember_core::{EmberError, PlanCache, Probe, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SetRequest<'a> {
    key: &'a str,
    value: &'a str,
    ttl: u64,
}

/// Raw bytes held in a cache response. Plans are stored as JSON text; a
/// service that hands the value back already decoded gets re-encoded.
pub(crate) fn value_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.into_bytes()),
        other => Some(other.to_string().into_bytes()),
    }
}

/// Client for the key/value cache service.
pub struct HttpCache {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCache {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: trim_base(url),
            client: http_client()?,
        })
    }
}

const NAME: &str = ember_core::CACHE_DEPENDENCY;

#[async_trait]
impl PlanCache for HttpCache {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(format!("{}/get/{}", self.base_url, key))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(NAME, timeout, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: Envelope<Value> = response
            .error_for_status()
            .map_err(|e| classify(NAME, timeout, e))?
            .json()
            .await
            .map_err(|e| classify(NAME, timeout, e))?;
        // A miss comes back as success=false or data=null.
        if !envelope.success {
            return Ok(None);
        }
        Ok(envelope.data.and_then(value_bytes))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, timeout: Duration) -> Result<()> {
        let value = String::from_utf8(value)
            .map_err(|e| EmberError::Internal(format!("cache value is not UTF-8: {}", e)))?;
        let envelope: Envelope<Value> = self
            .client
            .post(format!("{}/set", self.base_url))
            .json(&SetRequest {
                key,
                value: &value,
                ttl: ttl.as_secs().max(1),
            })
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| classify(NAME, timeout, e))?
            .json()
            .await
            .map_err(|e| classify(NAME, timeout, e))?;
        envelope.into_data(NAME).map(|_| ())
    }
}

#[async_trait]
impl Probe for HttpCache {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(&self.client, NAME, &format!("{}/health", self.base_url), timeout).await
    }
}
