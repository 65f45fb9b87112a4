use super::{DependencyStatus, HealthRegistry};
use crate::error::{EmberError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Cheap liveness check against a dependency.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, timeout: Duration) -> Result<()>;
}

#[async_trait]
impl<T: Probe + ?Sized> Probe for Arc<T> {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        (**self).probe(timeout).await
    }
}

/// Runs every registered probe concurrently and records the outcomes.
pub struct HealthProber {
    registry: Arc<HealthRegistry>,
    targets: Vec<(String, Arc<dyn Probe>)>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(registry: Arc<HealthRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            targets: Vec::new(),
            timeout,
        }
    }

    pub fn with_target(mut self, name: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        let name = name.into();
        self.registry.register(&name);
        self.targets.push((name, probe));
        self
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// One round of probes. Returns the registry snapshot afterwards.
    pub async fn run_once(&self) -> Vec<DependencyStatus> {
        let timeout = self.timeout;
        let checks = self.targets.iter().map(|(name, probe)| async move {
            let outcome = match tokio::time::timeout(timeout, probe.probe(timeout)).await {
                Ok(result) => result,
                Err(_) => Err(EmberError::timeout(name.as_str(), timeout)),
            };
            (name, outcome)
        });

        for (name, outcome) in join_all(checks).await {
            match outcome {
                Ok(()) => self.registry.record_success(name),
                Err(e) => {
                    self.registry.record_failure(name, &e.to_string());
                }
            }
        }
        self.registry.snapshot()
    }
}
