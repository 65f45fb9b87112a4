mod merge;

use crate::client::KnowledgeSource;
use crate::error::EmberError;
use crate::health::HealthRegistry;
use crate::request::Request;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A unit of retrieved knowledge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeSnippet {
    pub source: String,
    pub text: String,
    /// Always within `[0.0, 1.0]`.
    pub relevance: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl KnowledgeSnippet {
    pub fn new(source: impl Into<String>, text: impl Into<String>, relevance: f32) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            relevance: clamp_relevance(relevance),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

pub(crate) fn clamp_relevance(relevance: f32) -> f32 {
    if relevance.is_nan() {
        0.0
    } else {
        relevance.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Timeout,
    Error,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub kind: FailureKind,
    pub message: String,
}

impl SourceFailure {
    pub fn from_error(source: &str, err: &EmberError) -> Self {
        let kind = match err {
            EmberError::DependencyTimeout { .. } => FailureKind::Timeout,
            EmberError::DependencyUnavailable(_) => FailureKind::Unavailable,
            _ => FailureKind::Error,
        };
        Self {
            source: source.to_string(),
            kind,
            message: err.to_string(),
        }
    }
}

/// Result of one fan-out: ranked snippets plus a record of who failed.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AggregatedContext {
    pub snippets: Vec<KnowledgeSnippet>,
    pub failures: Vec<SourceFailure>,
    /// Snippets dropped to respect the size cap.
    pub dropped: usize,
}

impl AggregatedContext {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.snippets.iter().map(KnowledgeSnippet::char_len).sum()
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.source.as_str()).collect()
    }
}

/// A configured knowledge source. Declaration order is tie-break priority.
pub struct SourceSpec {
    name: String,
    client: Arc<dyn KnowledgeSource>,
    timeout: Option<Duration>,
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, client: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            name: name.into(),
            client,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Used for sources without their own timeout.
    pub source_timeout: Duration,
    /// Added to the largest source timeout to form the fan-out deadline.
    pub deadline_grace: Duration,
    /// Cap on total snippet text, in characters.
    pub max_context_chars: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(15),
            deadline_grace: Duration::from_secs(1),
            max_context_chars: 4000,
        }
    }
}

impl AggregatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_deadline_grace(mut self, grace: Duration) -> Self {
        self.deadline_grace = grace;
        self
    }

    pub fn with_max_context_chars(mut self, chars: usize) -> Self {
        self.max_context_chars = chars;
        self
    }
}

/// Concurrent fan-out over the configured knowledge sources.
pub struct Aggregator {
    sources: Vec<SourceSpec>,
    registry: Option<Arc<HealthRegistry>>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(sources: Vec<SourceSpec>, config: AggregatorConfig) -> Self {
        Self {
            sources,
            registry: None,
            config,
        }
    }

    /// Sources the registry marks unreachable are skipped without a call.
    pub fn with_registry(mut self, registry: Arc<HealthRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn timeout_for(&self, spec: &SourceSpec) -> Duration {
        spec.timeout.unwrap_or(self.config.source_timeout)
    }

    /// Largest per-source timeout plus the grace period.
    pub fn fanout_deadline(&self) -> Duration {
        let longest = self
            .sources
            .iter()
            .map(|s| self.timeout_for(s))
            .max()
            .unwrap_or(Duration::ZERO);
        longest + self.config.deadline_grace
    }

    /// Query every source concurrently and merge what comes back before the
    /// deadline. Never fails; failures are reported in the context.
    pub async fn collect(&self, request: &Request) -> AggregatedContext {
        let query = request.knowledge_query();
        let mut failures: Vec<(usize, SourceFailure)> = Vec::new();
        let mut launched = vec![false; self.sources.len()];
        let mut pending = FuturesUnordered::new();

        for (priority, spec) in self.sources.iter().enumerate() {
            let unreachable = self
                .registry
                .as_ref()
                .is_some_and(|r| r.is_unreachable(&spec.name));
            if unreachable {
                log::debug!("skipping unreachable source '{}'", spec.name);
                failures.push((
                    priority,
                    SourceFailure::from_error(
                        &spec.name,
                        &EmberError::DependencyUnavailable(spec.name.clone()),
                    ),
                ));
                continue;
            }
            launched[priority] = true;
            let timeout = self.timeout_for(spec);
            let query = &query;
            pending.push(async move { (priority, spec.client.fetch(query, timeout).await) });
        }

        let deadline_after = self.fanout_deadline();
        let deadline = tokio::time::Instant::now() + deadline_after;
        let mut batches: Vec<(usize, Vec<KnowledgeSnippet>)> = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((priority, result))) => {
                    launched[priority] = false;
                    let name = &self.sources[priority].name;
                    match result {
                        Ok(mut snippets) => {
                            for snippet in &mut snippets {
                                snippet.source = name.clone();
                                snippet.relevance = clamp_relevance(snippet.relevance);
                            }
                            log::debug!("source '{}' returned {} snippets", name, snippets.len());
                            batches.push((priority, snippets));
                        }
                        Err(e) => {
                            log::warn!("source '{}' failed: {}", name, e);
                            failures.push((priority, SourceFailure::from_error(name, &e)));
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!("knowledge fan-out deadline of {:?} elapsed", deadline_after);
                    break;
                }
            }
        }
        // Cancels whatever is still in flight.
        drop(pending);

        for (priority, still_pending) in launched.iter().enumerate() {
            if *still_pending {
                let name = &self.sources[priority].name;
                failures.push((
                    priority,
                    SourceFailure::from_error(name, &EmberError::timeout(name.as_str(), deadline_after)),
                ));
            }
        }
        failures.sort_by_key(|(priority, _)| *priority);

        let ranked = merge::rank(batches);
        let (snippets, dropped) = merge::truncate(ranked, self.config.max_context_chars);
        if dropped > 0 {
            log::debug!(
                "dropped {} snippets to stay within {} chars",
                dropped,
                self.config.max_context_chars
            );
        }

        AggregatedContext {
            snippets,
            failures: failures.into_iter().map(|(_, f)| f).collect(),
            dropped,
        }
    }
}
