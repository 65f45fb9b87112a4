pub mod error;
pub mod request;
pub mod plan;
pub mod client;
pub mod health;
pub mod aggregator;
pub mod prompt;
pub mod parse;
pub mod fallback;
pub mod cache;
pub mod coordinator;

pub use error::{EmberError, Result};
pub use request::{
    KnowledgeQuery, Request, RequestContext, RequestEntry, Urgency, CACHE_KEY_PREFIX, MAX_ENTRIES,
};
pub use plan::{Plan, PlanDraft, Priority, Step};
pub use client::{GenParams, Generator, KnowledgeSource, Monitored, PlanCache};
pub use health::{
    DependencyState, DependencyStatus, HealthProber, HealthRegistry, HealthReport, OverallState,
    Probe, CACHE_DEPENDENCY, GENERATION_DEPENDENCY,
};
pub use aggregator::{
    AggregatedContext, Aggregator, AggregatorConfig, FailureKind, KnowledgeSnippet, SourceFailure,
    SourceSpec,
};
pub use prompt::build_prompt;
pub use parse::{parse_plan, DEFAULT_TOTAL_MINUTES};
pub use fallback::{FallbackCatalog, FallbackTemplate, TemplateStep};
pub use cache::{CacheEntry, MemoryCache};
pub use coordinator::{Coordinator, CoordinatorConfig, FallbackReason, PlanSource, Resolution};

#[cfg(test)]
pub(crate) mod testing;
