use ember_core::{DependencyState, FailureKind, HealthRegistry, PlanSource, Resolution};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::time::Duration;

// ── Label types ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabel {
    pub source: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabel {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabel {
    pub source: String,
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DependencyLabel {
    pub dependency: String,
}

/// Lowers the in-flight gauge on drop, including when the request is abandoned.
pub struct InFlightGuard(Gauge);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

// ── Metrics registry ───────────────────────────────────────────────────────────

pub struct EmberMetrics {
    pub registry: Registry,

    // Outcomes of coordination cycles
    pub plans: Family<SourceLabel, Counter>,
    pub fallbacks: Family<ReasonLabel, Counter>,
    pub source_failures: Family<FailureLabel, Counter>,
    pub validation_errors: Counter,
    pub plan_duration: Family<SourceLabel, Histogram>,
    pub in_flight: Gauge,

    // Dependency state, refreshed at scrape time (1 = healthy)
    pub dependency_up: Family<DependencyLabel, Gauge>,
    pub dependency_failures: Family<DependencyLabel, Gauge>,

    pub uptime_seconds: Gauge,
}

impl Default for EmberMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EmberMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let plans: Family<SourceLabel, Counter> = Family::default();
        registry.register(
            "ember_plans",
            "Plans returned, by where they came from (cache, generated, fallback)",
            plans.clone(),
        );

        let fallbacks: Family<ReasonLabel, Counter> = Family::default();
        registry.register(
            "ember_fallbacks",
            "Fallback plans served, by reason",
            fallbacks.clone(),
        );

        let source_failures: Family<FailureLabel, Counter> = Family::default();
        registry.register(
            "ember_source_failures",
            "Knowledge source failures during fan-out, by source and kind",
            source_failures.clone(),
        );

        let validation_errors: Counter = Counter::default();
        registry.register(
            "ember_validation_errors",
            "Requests rejected by validation",
            validation_errors.clone(),
        );

        let plan_duration: Family<SourceLabel, Histogram> = Family::new_with_constructor(|| {
            Histogram::new([0.01_f64, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 120.0].into_iter())
        });
        registry.register(
            "ember_plan_duration_seconds",
            "Coordination cycle duration in seconds",
            plan_duration.clone(),
        );

        let in_flight: Gauge = Gauge::default();
        registry.register(
            "ember_requests_in_flight",
            "Coordination cycles currently running",
            in_flight.clone(),
        );

        let dependency_up: Family<DependencyLabel, Gauge> = Family::default();
        registry.register(
            "ember_dependency_up",
            "1 when the dependency is healthy, 0 otherwise",
            dependency_up.clone(),
        );

        let dependency_failures: Family<DependencyLabel, Gauge> = Family::default();
        registry.register(
            "ember_dependency_consecutive_failures",
            "Consecutive failures recorded for the dependency",
            dependency_failures.clone(),
        );

        let uptime_seconds: Gauge = Gauge::default();
        registry.register(
            "ember_uptime_seconds",
            "Server uptime in seconds",
            uptime_seconds.clone(),
        );

        Self {
            registry,
            plans,
            fallbacks,
            source_failures,
            validation_errors,
            plan_duration,
            in_flight,
            dependency_up,
            dependency_failures,
            uptime_seconds,
        }
    }

    /// Raise `in_flight` until the returned guard is dropped.
    pub fn track_in_flight(&self) -> InFlightGuard {
        self.in_flight.inc();
        InFlightGuard(self.in_flight.clone())
    }

    pub fn record_resolution(&self, resolution: &Resolution, elapsed: Duration) {
        let source = SourceLabel {
            source: resolution.source.label().to_string(),
        };
        self.plans.get_or_create(&source).inc();
        self.plan_duration
            .get_or_create(&source)
            .observe(elapsed.as_secs_f64());
        if let PlanSource::Fallback(reason) = &resolution.source {
            self.fallbacks
                .get_or_create(&ReasonLabel {
                    reason: reason.label().to_string(),
                })
                .inc();
        }
        for failure in &resolution.failures {
            let kind = match failure.kind {
                FailureKind::Timeout => "timeout",
                FailureKind::Error => "error",
                FailureKind::Unavailable => "unavailable",
            };
            self.source_failures
                .get_or_create(&FailureLabel {
                    source: failure.source.clone(),
                    kind: kind.to_string(),
                })
                .inc();
        }
    }

    /// Copy registry state into the dependency gauges.
    pub fn refresh(&self, registry: &HealthRegistry, uptime: Duration) {
        for status in registry.snapshot() {
            let label = DependencyLabel {
                dependency: status.name.clone(),
            };
            let up = i64::from(status.state == DependencyState::Healthy);
            self.dependency_up.get_or_create(&label).set(up);
            self.dependency_failures
                .get_or_create(&label)
                .set(i64::from(status.consecutive_failures));
        }
        self.uptime_seconds.set(uptime.as_secs() as i64);
    }

    /// Prometheus text exposition.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry)?;
        Ok(out)
    }
}
