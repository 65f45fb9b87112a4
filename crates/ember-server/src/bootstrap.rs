use crate::adapters::{
    EnvironmentSource, GraphSource, HttpCache, MaterialSource, OllamaGenerator, ProcedureSource,
    VectorSource,
};
use crate::config::{CacheBackend, EmberConfig, SourceKind};
use ember_core::{
    Aggregator, Coordinator, Generator, HealthProber, HealthRegistry, KnowledgeSource, MemoryCache,
    Monitored, PlanCache, Probe, SourceSpec, CACHE_DEPENDENCY, GENERATION_DEPENDENCY,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a running instance shares between the HTTP layer, the probe
/// loop and the CLI.
pub struct Runtime {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<HealthRegistry>,
    pub prober: Arc<HealthProber>,
}

fn monitored_source<S>(
    name: &str,
    adapter: S,
    registry: &Arc<HealthRegistry>,
) -> (Arc<dyn KnowledgeSource>, Arc<dyn Probe>)
where
    S: KnowledgeSource + Probe + 'static,
{
    let adapter = Arc::new(adapter);
    let client: Arc<dyn KnowledgeSource> =
        Arc::new(Monitored::new(name, adapter.clone(), registry.clone()));
    let probe: Arc<dyn Probe> = adapter;
    (client, probe)
}

/// Assemble adapters, registry, aggregator and coordinator from config.
pub fn build(config: &EmberConfig) -> anyhow::Result<Runtime> {
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }

    let registry = Arc::new(HealthRegistry::new(config.health.unreachable_after));
    let mut prober = HealthProber::new(
        registry.clone(),
        Duration::from_secs(config.health.probe_timeout_secs),
    );

    // Knowledge sources, in priority order
    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let (client, probe) = match source.kind {
            SourceKind::Graph => monitored_source(
                &source.name,
                GraphSource::new(&source.name, &source.url, source.base_relevance)?,
                &registry,
            ),
            SourceKind::Materials => monitored_source(
                &source.name,
                MaterialSource::new(&source.name, &source.url, source.base_relevance)?,
                &registry,
            ),
            SourceKind::Environment => monitored_source(
                &source.name,
                EnvironmentSource::new(&source.name, &source.url, source.base_relevance)?,
                &registry,
            ),
            SourceKind::Procedures => monitored_source(
                &source.name,
                ProcedureSource::new(&source.name, &source.url, source.base_relevance)?,
                &registry,
            ),
            SourceKind::Vector => monitored_source(
                &source.name,
                VectorSource::new(&source.name, &source.url, source.limit)?,
                &registry,
            ),
        };
        prober = prober.with_target(source.name.as_str(), probe);
        let mut spec = SourceSpec::new(source.name.as_str(), client);
        if let Some(timeout) = source.timeout() {
            spec = spec.with_timeout(timeout);
        }
        info!("Knowledge source '{}' ({:?}) at {}", source.name, source.kind, source.url);
        sources.push(spec);
    }

    // Generation backend
    let ollama = Arc::new(OllamaGenerator::new(&config.generation.url, &config.generation.model)?);
    let generator: Arc<dyn Generator> = Arc::new(Monitored::new(
        GENERATION_DEPENDENCY,
        ollama.clone(),
        registry.clone(),
    ));
    prober = prober.with_target(GENERATION_DEPENDENCY, ollama.clone());
    info!("Generation: {} (model {})", config.generation.url, ollama.model());

    // Plan cache
    let cache: Arc<dyn PlanCache> = match (config.cache.backend, config.cache.url.as_deref()) {
        (CacheBackend::Http, Some(url)) => {
            let http = Arc::new(HttpCache::new(url)?);
            prober = prober.with_target(CACHE_DEPENDENCY, http.clone());
            info!("Cache: {}", url);
            Arc::new(Monitored::new(CACHE_DEPENDENCY, http, registry.clone()))
        }
        _ => {
            info!("Cache: in-memory ({} entries max)", config.cache.max_entries);
            Arc::new(Monitored::new(
                CACHE_DEPENDENCY,
                MemoryCache::with_capacity(config.cache.max_entries),
                registry.clone(),
            ))
        }
    };

    let aggregator = Aggregator::new(sources, config.aggregator_config()).with_registry(registry.clone());
    let coordinator = Coordinator::new(aggregator, generator, cache, registry.clone())
        .with_fallback(config.fallback.clone())
        .with_config(config.coordinator_config());

    Ok(Runtime {
        coordinator: Arc::new(coordinator),
        registry,
        prober: Arc::new(prober),
    })
}
