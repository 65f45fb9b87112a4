use ember_core::{AggregatorConfig, CoordinatorConfig, FallbackCatalog, GenParams};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Top-level `ember.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    pub server: ServerConfig,
    pub sources: Vec<SourceConfig>,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub aggregation: AggregationConfig,
    pub health: HealthConfig,
    pub fallback: FallbackCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    /// Coordination cycles allowed in flight at once.
    pub max_concurrent_requests: usize,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_concurrent_requests: 64,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Knowledge-graph node search.
    Graph,
    /// Procedure list served by the knowledge-graph service.
    Procedures,
    /// Material records, one lookup per request term.
    Materials,
    /// The record for the incident location.
    Environment,
    /// Semantic document search.
    Vector,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Result limit for vector search.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Relevance given to the first result of unscored sources.
    #[serde(default = "default_base_relevance")]
    pub base_relevance: f32,
}

fn default_limit() -> usize {
    3
}

fn default_base_relevance() -> f32 {
    0.8
}

impl SourceConfig {
    pub fn new(name: &str, kind: SourceKind, url: &str, timeout_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            url: url.to_string(),
            timeout_secs: Some(timeout_secs),
            limit: default_limit(),
            base_relevance: default_base_relevance(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("graph", SourceKind::Graph, "http://localhost:8001", 10),
        SourceConfig::new("materials", SourceKind::Materials, "http://localhost:8001", 10),
        SourceConfig::new("environment", SourceKind::Environment, "http://localhost:8001", 10),
        SourceConfig::new("procedures", SourceKind::Procedures, "http://localhost:8001", 10),
        SourceConfig::new("vector", SourceKind::Vector, "http://localhost:8008", 15),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".into(),
            model: "qwen2.5:7b".into(),
            timeout_secs: 120,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
        }
    }
}

impl GenerationConfig {
    pub fn params(&self) -> GenParams {
        GenParams {
            model: Some(self.model.clone()),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process TTL map.
    Memory,
    /// External cache service over HTTP.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Required for the `http` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub ttl_secs: u64,
    pub timeout_secs: u64,
    /// Entry limit for the `memory` backend.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            url: None,
            ttl_secs: 3600,
            timeout_secs: 5,
            max_entries: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Timeout for sources that do not set their own.
    pub source_timeout_secs: u64,
    pub deadline_grace_ms: u64,
    pub max_context_chars: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            source_timeout_secs: 15,
            deadline_grace_ms: 1000,
            max_context_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub unreachable_after: u32,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unreachable_after: 3,
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

impl EmberConfig {
    /// Parse a config file. Missing sections take their defaults; a file with
    /// no `[[sources]]` gets the three default sources.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let mut config: EmberConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        if config.sources.is_empty() {
            config.sources = default_sources();
        }
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults. Parse errors are logged
    /// and also fall back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::with_default_sources();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::with_default_sources()
            }
        }
    }

    pub fn with_default_sources() -> Self {
        Self {
            sources: default_sources(),
            ..Self::default()
        }
    }

    /// Environment overrides for deployment without editing the file.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("EMBER_GENERATION_URL") {
            self.generation.url = url;
        }
        if let Ok(model) = std::env::var("EMBER_GENERATION_MODEL") {
            self.generation.model = model;
        }
        if let Ok(url) = std::env::var("EMBER_CACHE_URL") {
            self.cache.backend = CacheBackend::Http;
            self.cache.url = Some(url);
        }
    }

    /// Every problem found, empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.max_concurrent_requests == 0 {
            errors.push("[server] max_concurrent_requests must be at least 1".to_string());
        }
        for origin in &self.server.cors_origins {
            if !is_http_url(origin) {
                errors.push(format!("[server] cors origin '{}' must start with http:// or https://", origin));
            }
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                errors.push("[[sources]] name must not be blank".to_string());
            } else if !names.insert(source.name.as_str()) {
                errors.push(format!("[[sources]] duplicate name '{}'", source.name));
            }
            if !is_http_url(&source.url) {
                errors.push(format!("[[sources]] '{}': url must start with http:// or https://", source.name));
            }
            if source.timeout_secs == Some(0) {
                errors.push(format!("[[sources]] '{}': timeout_secs must be positive", source.name));
            }
            if !(0.0..=1.0).contains(&source.base_relevance) {
                errors.push(format!("[[sources]] '{}': base_relevance must be within 0.0..=1.0", source.name));
            }
            if source.kind == SourceKind::Vector && source.limit == 0 {
                errors.push(format!("[[sources]] '{}': limit must be at least 1", source.name));
            }
            if source.name == ember_core::GENERATION_DEPENDENCY || source.name == ember_core::CACHE_DEPENDENCY {
                errors.push(format!("[[sources]] '{}' is a reserved dependency name", source.name));
            }
        }

        if !is_http_url(&self.generation.url) {
            errors.push("[generation] url must start with http:// or https://".to_string());
        }
        if self.generation.model.trim().is_empty() {
            errors.push("[generation] model must not be empty".to_string());
        }
        if self.generation.timeout_secs == 0 {
            errors.push("[generation] timeout_secs must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            errors.push("[generation] temperature must be within 0.0..=2.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.generation.top_p) {
            errors.push("[generation] top_p must be within 0.0..=1.0".to_string());
        }

        match (self.cache.backend, self.cache.url.as_deref()) {
            (CacheBackend::Http, None) => {
                errors.push("[cache] url is required for the http backend".to_string())
            }
            (CacheBackend::Http, Some(url)) if !is_http_url(url) => {
                errors.push("[cache] url must start with http:// or https://".to_string())
            }
            _ => {}
        }
        if self.cache.ttl_secs == 0 {
            errors.push("[cache] ttl_secs must be positive".to_string());
        }
        if self.cache.timeout_secs == 0 {
            errors.push("[cache] timeout_secs must be positive".to_string());
        }

        if self.aggregation.source_timeout_secs == 0 {
            errors.push("[aggregation] source_timeout_secs must be positive".to_string());
        }
        if self.aggregation.max_context_chars == 0 {
            errors.push("[aggregation] max_context_chars must be positive".to_string());
        }

        if self.health.unreachable_after == 0 {
            errors.push("[health] unreachable_after must be at least 1".to_string());
        }
        if self.health.probe_interval_secs == 0 {
            errors.push("[health] probe_interval_secs must be positive".to_string());
        }

        errors.extend(self.fallback.validate().into_iter().map(|e| format!("[fallback] {}", e)));
        errors
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig::new()
            .with_source_timeout(Duration::from_secs(self.aggregation.source_timeout_secs))
            .with_deadline_grace(Duration::from_millis(self.aggregation.deadline_grace_ms))
            .with_max_context_chars(self.aggregation.max_context_chars)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new()
            .with_cache_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_cache_timeout(Duration::from_secs(self.cache.timeout_secs))
            .with_generation_timeout(Duration::from_secs(self.generation.timeout_secs))
            .with_deadline_grace(Duration::from_millis(self.aggregation.deadline_grace_ms))
            .with_generation_params(self.generation.params())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
