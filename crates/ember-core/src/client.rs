//! Collaborator interfaces. Each backing service is reached through one of
//! these traits; every call carries its own timeout.

use crate::aggregator::KnowledgeSnippet;
use crate::error::{EmberError, Result};
use crate::health::{HealthRegistry, Probe};
use crate::request::KnowledgeQuery;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Sampling parameters forwarded to the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenParams {
    /// Overrides the backend's configured model when set.
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
        }
    }
}

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>>;
}

#[async_trait]
pub trait PlanCache: Send + Sync {
    /// `Ok(None)` is a miss.
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, timeout: Duration) -> Result<()>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenParams, timeout: Duration) -> Result<String>;
}

#[async_trait]
impl<T: KnowledgeSource + ?Sized> KnowledgeSource for Arc<T> {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        (**self).fetch(query, timeout).await
    }
}

#[async_trait]
impl<T: PlanCache + ?Sized> PlanCache for Arc<T> {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).get(key, timeout).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, timeout: Duration) -> Result<()> {
        (**self).set(key, value, ttl, timeout).await
    }
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate(&self, prompt: &str, params: &GenParams, timeout: Duration) -> Result<String> {
        (**self).generate(prompt, params, timeout).await
    }
}

/// Wraps a client so that every call is bounded by the timeout it was given
/// and its outcome lands in the health registry under `name`.
pub struct Monitored<C> {
    name: String,
    inner: C,
    registry: Arc<HealthRegistry>,
}

impl<C> Monitored<C> {
    pub fn new(name: impl Into<String>, inner: C, registry: Arc<HealthRegistry>) -> Self {
        let name = name.into();
        registry.register(&name);
        Self {
            name,
            inner,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn observe<T, F>(&self, timeout: Duration, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EmberError::timeout(&self.name, timeout)),
        };
        match &outcome {
            Ok(_) => self.registry.record_success(&self.name),
            Err(e) => {
                self.registry.record_failure(&self.name, &e.to_string());
            }
        }
        outcome
    }
}

#[async_trait]
impl<C: KnowledgeSource> KnowledgeSource for Monitored<C> {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        self.observe(timeout, self.inner.fetch(query, timeout)).await
    }
}

#[async_trait]
impl<C: PlanCache> PlanCache for Monitored<C> {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.observe(timeout, self.inner.get(key, timeout)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, timeout: Duration) -> Result<()> {
        self.observe(timeout, self.inner.set(key, value, ttl, timeout))
            .await
    }
}

#[async_trait]
impl<C: Generator> Generator for Monitored<C> {
    async fn generate(&self, prompt: &str, params: &GenParams, timeout: Duration) -> Result<String> {
        self.observe(timeout, self.inner.generate(prompt, params, timeout))
            .await
    }
}

/// Probes report through the prober, not through `observe`, so a probe
/// result is never counted twice.
#[async_trait]
impl<C: Probe> Probe for Monitored<C> {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        self.inner.probe(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::DependencyState;
    use crate::testing::{FailingSource, SlowSource, StaticSource};

    #[tokio::test]
    async fn success_marks_dependency_healthy() {
        let registry = Arc::new(HealthRegistry::default());
        let source = Monitored::new("graph", StaticSource::new(vec![]), registry.clone());
        source.fetch(&KnowledgeQuery::text("fire"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(registry.get("graph").state, DependencyState::Healthy);
        assert!(registry.get("graph").last_checked.is_some());
    }

    #[tokio::test]
    async fn failures_accumulate_to_unreachable() {
        let registry = Arc::new(HealthRegistry::new(3));
        let source = Monitored::new("graph", FailingSource::new("boom"), registry.clone());
        for expected in [DependencyState::Degraded, DependencyState::Degraded, DependencyState::Unreachable] {
            assert!(source.fetch(&KnowledgeQuery::text("fire"), Duration::from_secs(1)).await.is_err());
            assert_eq!(registry.get("graph").state, expected);
        }
        assert_eq!(registry.get("graph").consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_is_cut_off_at_timeout() {
        let registry = Arc::new(HealthRegistry::default());
        let source = Monitored::new("vector", SlowSource::new(Duration::from_secs(30)), registry.clone());
        let err = source
            .fetch(&KnowledgeQuery::text("fire"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {}", err);
        assert_eq!(registry.get("vector").state, DependencyState::Degraded);
    }
}
