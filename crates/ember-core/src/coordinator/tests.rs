use super::*;
use crate::aggregator::{AggregatorConfig, FailureKind, KnowledgeSnippet, SourceSpec};
use crate::client::{KnowledgeSource, Monitored};
use crate::health::DependencyState;
use crate::plan::{PlanDraft, Priority, Step};
use crate::request::{RequestContext, RequestEntry};
use crate::testing::{
    generated_plan_text, sample_request, CountingCache, FailingSource, GenBehavior, MockGenerator,
    PendingSource, StaticSource,
};

struct Harness {
    graph: Arc<StaticSource>,
    vector: Arc<StaticSource>,
    generator: Arc<MockGenerator>,
    cache: Arc<CountingCache>,
    registry: Arc<HealthRegistry>,
    coordinator: Coordinator,
}

fn harness_with(generator: MockGenerator, cache: CountingCache) -> Harness {
    let registry = Arc::new(HealthRegistry::default());
    let graph = Arc::new(StaticSource::new(vec![KnowledgeSnippet::new(
        "graph",
        "Unplug electric heaters before fighting the fire",
        0.9,
    )]));
    let vector = Arc::new(StaticSource::new(vec![KnowledgeSnippet::new(
        "vector",
        "Wood fires are class A",
        0.7,
    )]));
    let generator = Arc::new(generator);
    let cache = Arc::new(cache);

    let aggregator = Aggregator::new(
        vec![
            SourceSpec::new("graph", graph.clone()),
            SourceSpec::new("vector", vector.clone()),
        ],
        AggregatorConfig::default(),
    )
    .with_registry(registry.clone());
    let coordinator = Coordinator::new(aggregator, generator.clone(), cache.clone(), registry.clone());

    Harness {
        graph,
        vector,
        generator,
        cache,
        registry,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(
        MockGenerator::replying(&generated_plan_text()),
        CountingCache::new(),
    )
}

// Test 1: a second identical request is served from cache
#[tokio::test]
async fn identical_request_hits_cache() {
    let h = harness();
    let req = sample_request();

    let first = h.coordinator.coordinate(&req).await.unwrap();
    let second = h.coordinator.coordinate(&req).await.unwrap();

    assert_eq!(first.source, PlanSource::Generated);
    assert_eq!(second.source, PlanSource::Cache);
    assert_eq!(first.plan, second.plan, "cached plan should be identical");
    assert_eq!(h.generator.calls(), 1, "no second generation call");
    assert_eq!(h.graph.calls(), 1, "no second fan-out");
    assert_eq!(h.cache.sets(), 1);
}

// Test 2: equivalent requests share a cache entry
#[tokio::test]
async fn equivalent_request_hits_cache() {
    let h = harness();
    let req = sample_request();
    let mut reordered = sample_request();
    reordered.entries.reverse();
    reordered.entries[0].name = " ELECTRIC HEATER ".into();

    h.coordinator.handle_request(&req).await.unwrap();
    let resolution = h.coordinator.coordinate(&reordered).await.unwrap();
    assert_eq!(resolution.source, PlanSource::Cache);
    assert_eq!(h.generator.calls(), 1);
}

// Test 3: a failing source does not stop generation
#[tokio::test]
async fn partial_failure_is_tolerated() {
    let registry = Arc::new(HealthRegistry::default());
    let good = Arc::new(StaticSource::new(vec![KnowledgeSnippet::new("g", "Cut the power first", 0.8)]));
    let aggregator = Aggregator::new(
        vec![
            SourceSpec::new("graph", good),
            SourceSpec::new("vector", Arc::new(FailingSource::new("index offline"))),
        ],
        AggregatorConfig::default(),
    );
    let generator = Arc::new(MockGenerator::replying(&generated_plan_text()));
    let coordinator = Coordinator::new(aggregator, generator.clone(), Arc::new(CountingCache::new()), registry);

    let resolution = coordinator.coordinate(&sample_request()).await.unwrap();
    assert!(!resolution.plan.is_degraded());
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].source, "vector");
    let prompt = generator.last_prompt().unwrap();
    assert!(prompt.contains("Cut the power first"));
}

// Test 4: all knowledge sources failing still attempts generation
#[tokio::test]
async fn total_knowledge_failure_still_generates() {
    let registry = Arc::new(HealthRegistry::default());
    let aggregator = Aggregator::new(
        vec![
            SourceSpec::new("graph", Arc::new(FailingSource::new("down"))),
            SourceSpec::new("vector", Arc::new(FailingSource::new("down"))),
        ],
        AggregatorConfig::default(),
    );
    let generator = Arc::new(MockGenerator::replying(&generated_plan_text()));
    let coordinator = Coordinator::new(aggregator, generator.clone(), Arc::new(CountingCache::new()), registry);

    let resolution = coordinator.coordinate(&sample_request()).await.unwrap();
    assert_eq!(resolution.source, PlanSource::Generated);
    assert_eq!(resolution.failures.len(), 2);
    assert_eq!(generator.calls(), 1);
    assert!(generator.last_prompt().unwrap().contains("no knowledge retrieved"));
}

// Test 5: an unreachable generation backend means fallback and zero calls
#[tokio::test]
async fn unreachable_generation_falls_back_without_calling() {
    let h = harness();
    h.registry.report(
        GENERATION_DEPENDENCY,
        crate::health::DependencyStatus::unreachable(GENERATION_DEPENDENCY, "connection refused"),
    );

    let resolution = h.coordinator.coordinate(&sample_request()).await.unwrap();
    assert_eq!(h.generator.calls(), 0);
    assert!(resolution.plan.is_degraded());
    assert_eq!(
        resolution.source,
        PlanSource::Fallback(FallbackReason::GenerationUnavailable)
    );
    assert_eq!(h.cache.sets(), 0, "fallback plans are never cached");
}

// Test 6: validation failures touch no client
#[tokio::test]
async fn invalid_request_makes_no_calls() {
    let h = harness();
    let empty = Request::new(vec![], RequestContext::new().with("location", "kitchen"));
    let no_context = Request::new(vec![RequestEntry::new("Sofa", "furniture")], RequestContext::new());

    for req in [empty, no_context] {
        let err = h.coordinator.handle_request(&req).await.unwrap_err();
        assert!(err.is_validation(), "expected validation error, got {}", err);
    }
    assert_eq!(h.cache.gets(), 0);
    assert_eq!(h.graph.calls(), 0);
    assert_eq!(h.vector.calls(), 0);
    assert_eq!(h.generator.calls(), 0);
}

// Test 7: a failed generation is not cached, the next request retries
#[tokio::test]
async fn failed_generation_does_not_poison_cache() {
    let h = harness_with(
        MockGenerator::new(GenBehavior::Fail("model not loaded".into())),
        CountingCache::new(),
    );
    let req = sample_request();

    let first = h.coordinator.coordinate(&req).await.unwrap();
    assert!(first.plan.is_degraded());
    assert!(matches!(
        first.source,
        PlanSource::Fallback(FallbackReason::GenerationFailed(_))
    ));
    assert_eq!(h.cache.len(), 0);

    let second = h.coordinator.coordinate(&req).await.unwrap();
    assert!(matches!(second.source, PlanSource::Fallback(_)));
    assert_eq!(h.generator.calls(), 2, "a miss must retry generation");
}

// Test 8: a generator that never answers is cut off and falls back
#[tokio::test(start_paused = true)]
async fn hanging_generation_times_out() {
    let h = harness_with(MockGenerator::new(GenBehavior::Hang), CountingCache::new());
    let config = CoordinatorConfig::default()
        .with_generation_timeout(Duration::from_secs(30))
        .with_deadline_grace(Duration::from_secs(1));
    let coordinator = h.coordinator.with_config(config);

    let started = tokio::time::Instant::now();
    let resolution = coordinator.coordinate(&sample_request()).await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(32));
    assert_eq!(
        resolution.source,
        PlanSource::Fallback(FallbackReason::GenerationTimeout)
    );
}

// Test 9: unparseable output falls back
#[tokio::test]
async fn unusable_output_falls_back() {
    let h = harness_with(
        MockGenerator::replying("Sorry, I can't help with that."),
        CountingCache::new(),
    );
    let resolution = h.coordinator.coordinate(&sample_request()).await.unwrap();
    assert!(matches!(
        resolution.source,
        PlanSource::Fallback(FallbackReason::UnusableOutput(_))
    ));
    assert_eq!(h.cache.sets(), 0);
}

// Test 10: a panic in the generation path becomes a fallback plan
#[tokio::test]
async fn panic_in_generation_falls_back() {
    let h = harness_with(MockGenerator::new(GenBehavior::Panic), CountingCache::new());
    let resolution = h.coordinator.coordinate(&sample_request()).await.unwrap();
    match resolution.source {
        PlanSource::Fallback(FallbackReason::Internal(message)) => {
            assert!(message.contains("generator exploded"), "got: {}", message)
        }
        other => panic!("expected internal fallback, got {:?}", other),
    }
    assert!(resolution.plan.is_degraded());
}

// Test 11: cache errors are treated as a miss
#[tokio::test]
async fn cache_errors_are_misses() {
    let h = harness_with(
        MockGenerator::replying(&generated_plan_text()),
        CountingCache::failing(),
    );
    let resolution = h.coordinator.coordinate(&sample_request()).await.unwrap();
    assert_eq!(resolution.source, PlanSource::Generated);
    assert_eq!(h.cache.gets(), 1);
    assert_eq!(h.cache.sets(), 1);
}

// Test 12: an unreachable cache is bypassed entirely
#[tokio::test]
async fn unreachable_cache_is_skipped() {
    let h = harness();
    h.registry.report(
        CACHE_DEPENDENCY,
        crate::health::DependencyStatus::unreachable(CACHE_DEPENDENCY, "refused"),
    );
    let resolution = h.coordinator.coordinate(&sample_request()).await.unwrap();
    assert_eq!(resolution.source, PlanSource::Generated);
    assert_eq!(h.cache.gets(), 0);
    assert_eq!(h.cache.sets(), 0);
}

// Test 13: an invalid plan in the cache is ignored
#[tokio::test]
async fn invalid_cached_plan_is_a_miss() {
    let h = harness();
    let req = sample_request();
    let key = req.cache_key().unwrap();

    let plan = PlanDraft::new("Stale", Priority::Low)
        .step(Step::new("Do something", 5))
        .build()
        .unwrap();
    let mut value = serde_json::to_value(&plan).unwrap();
    value["total_minutes"] = serde_json::json!(500);
    h.cache.put_raw(&key, serde_json::to_vec(&value).unwrap()).await;

    let resolution = h.coordinator.coordinate(&req).await.unwrap();
    assert_eq!(resolution.source, PlanSource::Generated);
    assert_eq!(h.generator.calls(), 1);

    h.cache.put_raw(&key, b"not json".to_vec()).await;
    let resolution = h.coordinator.coordinate(&req).await.unwrap();
    assert_eq!(resolution.source, PlanSource::Generated);
}

// Test 14: merge ordering is deterministic across runs
#[tokio::test]
async fn prompt_is_deterministic() {
    let h = harness();
    let coordinator = h.coordinator.with_config(CoordinatorConfig::default());
    let a = sample_request().with_notes("run a");
    let b = sample_request().with_notes("run b");

    coordinator.handle_request(&a).await.unwrap();
    let first = h.generator.last_prompt().unwrap().replace("run a", "");
    coordinator.handle_request(&b).await.unwrap();
    let second = h.generator.last_prompt().unwrap().replace("run b", "");
    assert_eq!(first, second);
    assert!(first.find("Unplug electric heaters").unwrap() < first.find("class A").unwrap());
}

// Test 15: monitored clients drive the registry that gates generation
#[tokio::test]
async fn repeated_generation_failures_open_the_gate() {
    let registry = Arc::new(HealthRegistry::new(2));
    let generator = Arc::new(MockGenerator::new(GenBehavior::Fail("oom".into())));
    let monitored = Monitored::new(GENERATION_DEPENDENCY, generator.clone(), registry.clone());
    let aggregator = Aggregator::new(Vec::new(), AggregatorConfig::default());
    let coordinator = Coordinator::new(
        aggregator,
        Arc::new(monitored),
        Arc::new(CountingCache::new()),
        registry.clone(),
    );

    for _ in 0..2 {
        coordinator.handle_request(&sample_request()).await.unwrap();
    }
    assert_eq!(registry.get(GENERATION_DEPENDENCY).state, DependencyState::Unreachable);

    let resolution = coordinator.coordinate(&sample_request()).await.unwrap();
    assert_eq!(generator.calls(), 2, "gate stops the third call");
    assert_eq!(
        resolution.source,
        PlanSource::Fallback(FallbackReason::GenerationUnavailable)
    );
}

// Test 16: monitored knowledge sources that go unreachable are skipped
#[tokio::test]
async fn unreachable_source_recorded_as_unavailable() {
    let registry = Arc::new(HealthRegistry::new(1));
    let flaky = Arc::new(FailingSource::new("refused"));
    let source: Arc<dyn KnowledgeSource> =
        Arc::new(Monitored::new("procedures", flaky.clone(), registry.clone()));
    let aggregator = Aggregator::new(vec![SourceSpec::new("procedures", source)], AggregatorConfig::default())
        .with_registry(registry.clone());
    let coordinator = Coordinator::new(
        aggregator,
        Arc::new(MockGenerator::replying(&generated_plan_text())),
        Arc::new(CountingCache::new()),
        registry,
    );

    let first = coordinator.coordinate(&sample_request()).await.unwrap();
    assert_eq!(first.failures[0].kind, FailureKind::Error);
    let second = coordinator
        .coordinate(&sample_request().with_notes("again"))
        .await
        .unwrap();
    assert_eq!(second.failures[0].kind, FailureKind::Unavailable);
    assert_eq!(flaky.calls(), 1);
}

// Test 17: source failures collected before a generation panic are kept
#[tokio::test]
async fn panic_keeps_source_failures() {
    let aggregator = Aggregator::new(
        vec![
            SourceSpec::new("graph", Arc::new(StaticSource::new(Vec::new()))),
            SourceSpec::new("vector", Arc::new(FailingSource::new("index offline"))),
        ],
        AggregatorConfig::default(),
    );
    let coordinator = Coordinator::new(
        aggregator,
        Arc::new(MockGenerator::new(GenBehavior::Panic)),
        Arc::new(CountingCache::new()),
        Arc::new(HealthRegistry::default()),
    );

    let resolution = coordinator.coordinate(&sample_request()).await.unwrap();
    assert!(matches!(
        resolution.source,
        PlanSource::Fallback(FallbackReason::Internal(_))
    ));
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].source, "vector");
}

// Test 18: dropping the request future cancels the generation call
#[tokio::test(start_paused = true)]
async fn dropped_request_cancels_generation() {
    let h = harness_with(MockGenerator::new(GenBehavior::Hang), CountingCache::new());
    let req = sample_request();

    let cut = tokio::time::timeout(Duration::from_millis(50), h.coordinator.coordinate(&req)).await;
    assert!(cut.is_err());
    assert_eq!(h.generator.calls(), 1);
    assert!(h.generator.abandoned());
    assert_eq!(h.cache.sets(), 0);
}

// Test 19: dropping the request future cancels in-flight source calls
#[tokio::test(start_paused = true)]
async fn dropped_request_cancels_fanout() {
    let pending = Arc::new(PendingSource::new());
    let aggregator = Aggregator::new(
        vec![SourceSpec::new("graph", pending.clone())],
        AggregatorConfig::default(),
    );
    let generator = Arc::new(MockGenerator::replying(&generated_plan_text()));
    let coordinator = Coordinator::new(
        aggregator,
        generator.clone(),
        Arc::new(CountingCache::new()),
        Arc::new(HealthRegistry::default()),
    );

    let req = sample_request();
    let cut = tokio::time::timeout(Duration::from_millis(50), coordinator.coordinate(&req)).await;
    assert!(cut.is_err());
    assert!(pending.abandoned());
    assert_eq!(generator.calls(), 0);
}
