use crate::aggregator::{AggregatedContext, Aggregator, SourceFailure};
use crate::cache::CacheEntry;
use crate::client::{GenParams, Generator, PlanCache};
use crate::error::{EmberError, Result};
use crate::fallback::FallbackCatalog;
use crate::health::{HealthRegistry, CACHE_DEPENDENCY, GENERATION_DEPENDENCY};
use crate::parse::parse_plan;
use crate::plan::Plan;
use crate::prompt::build_prompt;
use crate::request::Request;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub generation_timeout: Duration,
    /// Slack on top of a client timeout before the coordinator gives up on
    /// a call that does not honour it.
    pub deadline_grace: Duration,
    pub generation: GenParams,
    pub generation_dependency: String,
    pub cache_dependency: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            cache_timeout: Duration::from_secs(5),
            generation_timeout: Duration::from_secs(120),
            deadline_grace: Duration::from_secs(1),
            generation: GenParams::default(),
            generation_dependency: GENERATION_DEPENDENCY.to_string(),
            cache_dependency: CACHE_DEPENDENCY.to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_deadline_grace(mut self, grace: Duration) -> Self {
        self.deadline_grace = grace;
        self
    }

    pub fn with_generation_params(mut self, params: GenParams) -> Self {
        self.generation = params;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl.is_zero() {
            return Err(EmberError::Validation("cache_ttl must be positive".into()));
        }
        if self.generation_timeout.is_zero() {
            return Err(EmberError::Validation("generation_timeout must be positive".into()));
        }
        if self.cache_timeout.is_zero() {
            return Err(EmberError::Validation("cache_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Why a request was answered from the fallback catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    GenerationUnavailable,
    GenerationTimeout,
    GenerationFailed(String),
    UnusableOutput(String),
    Internal(String),
}

impl FallbackReason {
    fn from_error(err: &EmberError) -> Self {
        match err {
            EmberError::DependencyUnavailable(_) => Self::GenerationUnavailable,
            EmberError::DependencyTimeout { .. } => Self::GenerationTimeout,
            EmberError::Dependency { message, .. } => Self::GenerationFailed(message.clone()),
            EmberError::Internal(message) => Self::UnusableOutput(message.clone()),
            other => Self::Internal(other.to_string()),
        }
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::GenerationUnavailable => "generation_unavailable",
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationFailed(_) => "generation_failed",
            Self::UnusableOutput(_) => "unusable_output",
            Self::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerationUnavailable => write!(f, "generation backend unavailable"),
            Self::GenerationTimeout => write!(f, "generation timed out"),
            Self::GenerationFailed(m) => write!(f, "generation failed: {}", m),
            Self::UnusableOutput(m) => write!(f, "unusable generation output: {}", m),
            Self::Internal(m) => write!(f, "internal error: {}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Cache,
    Generated,
    Fallback(FallbackReason),
}

impl PlanSource {
    pub fn label(&self) -> &'static str {
        match self {
            PlanSource::Cache => "cache",
            PlanSource::Generated => "generated",
            PlanSource::Fallback(_) => "fallback",
        }
    }
}

/// A plan together with how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub plan: Plan,
    pub source: PlanSource,
    pub failures: Vec<SourceFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

/// Runs one coordination cycle per request: cache lookup, knowledge fan-out,
/// health gate, generation, cache write, and fallback.
///
/// Holds only configuration and shared handles; any number of requests may
/// be coordinated concurrently through `&self`.
pub struct Coordinator {
    aggregator: Aggregator,
    generator: Arc<dyn Generator>,
    cache: Arc<dyn PlanCache>,
    registry: Arc<HealthRegistry>,
    fallback: FallbackCatalog,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        aggregator: Aggregator,
        generator: Arc<dyn Generator>,
        cache: Arc<dyn PlanCache>,
        registry: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            aggregator,
            generator,
            cache,
            registry,
            fallback: FallbackCatalog::builtin(),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackCatalog) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Produce a plan for `request`. Only validation errors are returned;
    /// every dependency problem ends in a degraded fallback plan.
    pub async fn handle_request(&self, request: &Request) -> Result<Plan> {
        self.coordinate(request).await.map(|r| r.plan)
    }

    pub async fn coordinate(&self, request: &Request) -> Result<Resolution> {
        request.validate()?;

        let cache_key = match request.cache_key() {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("cache key unavailable, bypassing cache: {}", e);
                None
            }
        };

        if let Some(key) = cache_key.as_deref() {
            if let Some(plan) = self.lookup(key).await {
                log::info!("plan served from cache ({})", key);
                return Ok(Resolution {
                    plan,
                    source: PlanSource::Cache,
                    failures: Vec::new(),
                    cache_key,
                });
            }
        }

        let (failures, outcome) = match AssertUnwindSafe(self.aggregator.collect(request))
            .catch_unwind()
            .await
        {
            Ok(context) => {
                if !context.failures.is_empty() {
                    log::warn!(
                        "knowledge sources failed: {}",
                        context.failed_sources().join(", ")
                    );
                }
                let attempt = AssertUnwindSafe(self.generate_plan(request, &context))
                    .catch_unwind()
                    .await;
                let outcome = match attempt {
                    Ok(outcome) => outcome.map_err(|e| FallbackReason::from_error(&e)),
                    Err(payload) => Err(FallbackReason::Internal(panic_message(payload.as_ref()))),
                };
                (context.failures, outcome)
            }
            Err(payload) => (
                Vec::new(),
                Err(FallbackReason::Internal(panic_message(payload.as_ref()))),
            ),
        };

        match outcome {
            Ok(plan) => {
                if let Some(key) = cache_key.as_deref() {
                    self.store(key, &plan).await;
                }
                log::info!(
                    "plan generated with {} steps ({} source failures)",
                    plan.steps().len(),
                    failures.len()
                );
                Ok(Resolution {
                    plan,
                    source: PlanSource::Generated,
                    failures,
                    cache_key,
                })
            }
            Err(reason) => {
                log::warn!("serving fallback plan: {}", reason);
                let plan = self.fallback.render(request);
                Ok(Resolution {
                    plan,
                    source: PlanSource::Fallback(reason),
                    failures,
                    cache_key,
                })
            }
        }
    }

    /// Health gate, generation and parsing over an already collected context.
    async fn generate_plan(&self, request: &Request, context: &AggregatedContext) -> Result<Plan> {
        let dependency = &self.config.generation_dependency;
        if self.registry.is_unreachable(dependency) {
            return Err(EmberError::DependencyUnavailable(dependency.clone()));
        }

        let prompt = build_prompt(request, context);
        let timeout = self.config.generation_timeout;
        let call = self.generator.generate(&prompt, &self.config.generation, timeout);
        match tokio::time::timeout(timeout + self.config.deadline_grace, call).await {
            Ok(Ok(text)) => parse_plan(&text, request),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EmberError::timeout(dependency.as_str(), timeout)),
        }
    }

    /// A cached plan, if one exists and passes validation.
    async fn lookup(&self, key: &str) -> Option<Plan> {
        if self.registry.is_unreachable(&self.config.cache_dependency) {
            log::debug!("cache unreachable, skipping lookup");
            return None;
        }

        let timeout = self.config.cache_timeout;
        let call = self.cache.get(key, timeout);
        let bytes = match tokio::time::timeout(timeout + self.config.deadline_grace, call).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                log::warn!("cache read failed, treating as miss: {}", e);
                return None;
            }
            Err(_) => {
                log::warn!("cache read timed out, treating as miss");
                return None;
            }
        };

        let plan: Plan = match serde_json::from_slice(&bytes) {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("cached plan under {} is unreadable: {}", key, e);
                return None;
            }
        };
        if plan.is_degraded() {
            log::warn!("ignoring degraded plan found in cache under {}", key);
            return None;
        }
        if let Err(e) = plan.validate() {
            log::warn!("cached plan under {} failed validation: {}", key, e);
            return None;
        }
        Some(plan)
    }

    /// Best-effort write. Degraded plans are never stored.
    async fn store(&self, key: &str, plan: &Plan) {
        if plan.is_degraded() || self.registry.is_unreachable(&self.config.cache_dependency) {
            return;
        }
        let entry = match CacheEntry::for_plan(key, plan, self.config.cache_ttl) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("failed to serialize plan for cache: {}", e);
                return;
            }
        };
        let timeout = self.config.cache_timeout;
        let call = self.cache.set(&entry.key, entry.value, entry.ttl, timeout);
        match tokio::time::timeout(timeout + self.config.deadline_grace, call).await {
            Ok(Ok(())) => log::debug!("cached plan under {}", key),
            Ok(Err(e)) => log::warn!("cache write failed: {}", e),
            Err(_) => log::warn!("cache write timed out"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests;
