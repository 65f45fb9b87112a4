mod probe;

pub use probe::{HealthProber, Probe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Registry name of the generation backend.
pub const GENERATION_DEPENDENCY: &str = "generation";
/// Registry name of the plan cache.
pub const CACHE_DEPENDENCY: &str = "cache";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    Healthy,
    Degraded,
    Unreachable,
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyState::Healthy => write!(f, "healthy"),
            DependencyState::Degraded => write!(f, "degraded"),
            DependencyState::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyStatus {
    pub name: String,
    pub state: DependencyState,
    /// `None` until the first call or probe.
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl DependencyStatus {
    /// Never observed. Reads as healthy.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DependencyState::Healthy,
            last_checked: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            last_checked: Some(Utc::now()),
            ..Self::unknown(name)
        }
    }

    pub fn unreachable(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DependencyState::Unreachable,
            last_checked: Some(Utc::now()),
            last_error: Some(error.into()),
            consecutive_failures: 1,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state == DependencyState::Healthy
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallState {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub overall: OverallState,
    pub healthy: usize,
    pub total: usize,
    pub dependencies: Vec<DependencyStatus>,
}

/// Last-known status of every dependency.
///
/// Written by client wrappers and the background prober, read by the
/// coordinator. Entries are replaced wholesale under a write lock so a reader
/// never sees a half-updated status.
pub struct HealthRegistry {
    statuses: RwLock<HashMap<String, DependencyStatus>>,
    required: HashSet<String>,
    unreachable_after: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(3)
    }
}

impl HealthRegistry {
    /// `unreachable_after` consecutive failures flip a dependency to
    /// unreachable. Generation and cache are required.
    pub fn new(unreachable_after: u32) -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            required: [GENERATION_DEPENDENCY, CACHE_DEPENDENCY]
                .into_iter()
                .map(String::from)
                .collect(),
            unreachable_after: unreachable_after.max(1),
        }
    }

    /// Replace the set of required dependencies.
    pub fn with_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn unreachable_after(&self) -> u32 {
        self.unreachable_after
    }

    /// Make `name` show up in snapshots before it has been observed.
    pub fn register(&self, name: &str) {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        statuses
            .entry(name.to_string())
            .or_insert_with(|| DependencyStatus::unknown(name));
    }

    pub fn report(&self, source: &str, status: DependencyStatus) {
        let status = DependencyStatus {
            name: source.to_string(),
            ..status
        };
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        statuses.insert(source.to_string(), status);
    }

    pub fn get(&self, name: &str) -> DependencyStatus {
        let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
        statuses
            .get(name)
            .cloned()
            .unwrap_or_else(|| DependencyStatus::unknown(name))
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    pub fn is_unreachable(&self, name: &str) -> bool {
        self.get(name).state == DependencyState::Unreachable
    }

    pub fn record_success(&self, name: &str) {
        let previous = {
            let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
            statuses
                .insert(name.to_string(), DependencyStatus::healthy(name))
                .map(|s| s.state)
        };
        if matches!(previous, Some(state) if state != DependencyState::Healthy) {
            log::info!("dependency '{}' recovered", name);
        }
    }

    /// Returns the state after counting this failure.
    pub fn record_failure(&self, name: &str, error: &str) -> DependencyState {
        let (state, failures) = {
            let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
            let entry = statuses
                .entry(name.to_string())
                .or_insert_with(|| DependencyStatus::unknown(name));
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.state = if entry.consecutive_failures >= self.unreachable_after {
                DependencyState::Unreachable
            } else {
                DependencyState::Degraded
            };
            entry.last_checked = Some(Utc::now());
            entry.last_error = Some(error.to_string());
            (entry.state, entry.consecutive_failures)
        };
        if state == DependencyState::Unreachable && failures == self.unreachable_after {
            log::warn!(
                "dependency '{}' unreachable after {} consecutive failures: {}",
                name,
                failures,
                error
            );
        } else {
            log::debug!("dependency '{}' failure #{}: {}", name, failures, error);
        }
        state
    }

    /// All known statuses, sorted by name. Required dependencies that were
    /// never registered are included as unknown.
    pub fn snapshot(&self) -> Vec<DependencyStatus> {
        let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<DependencyStatus> = statuses.values().cloned().collect();
        for name in &self.required {
            if !statuses.contains_key(name) {
                out.push(DependencyStatus::unknown(name.as_str()));
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Healthy when every required dependency is healthy.
    pub fn overall(&self) -> HealthReport {
        let dependencies = self.snapshot();
        let required_ok = dependencies
            .iter()
            .filter(|d| self.is_required(&d.name))
            .all(DependencyStatus::is_healthy);
        HealthReport {
            overall: if required_ok {
                OverallState::Healthy
            } else {
                OverallState::Degraded
            },
            healthy: dependencies.iter().filter(|d| d.is_healthy()).count(),
            total: dependencies.len(),
            dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dependency_reads_healthy() {
        let registry = HealthRegistry::default();
        let status = registry.get("never-seen");
        assert_eq!(status.state, DependencyState::Healthy);
        assert!(status.last_checked.is_none());
    }

    #[test]
    fn consecutive_failures_then_recovery() {
        let registry = HealthRegistry::new(2);
        assert_eq!(registry.record_failure("cache", "refused"), DependencyState::Degraded);
        assert_eq!(registry.record_failure("cache", "refused"), DependencyState::Unreachable);
        assert!(registry.is_unreachable("cache"));
        assert_eq!(registry.get("cache").last_error.as_deref(), Some("refused"));

        registry.record_success("cache");
        let status = registry.get("cache");
        assert_eq!(status.state, DependencyState::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn report_overwrites_under_source_name() {
        let registry = HealthRegistry::default();
        registry.report("generation", DependencyStatus::unreachable("whatever", "down"));
        let status = registry.get("generation");
        assert_eq!(status.name, "generation");
        assert_eq!(status.state, DependencyState::Unreachable);
    }

    #[test]
    fn required_set_defaults_to_generation_and_cache() {
        let registry = HealthRegistry::default();
        assert!(registry.is_required(GENERATION_DEPENDENCY));
        assert!(registry.is_required(CACHE_DEPENDENCY));
        assert!(!registry.is_required("graph"));
    }

    #[test]
    fn overall_ignores_optional_dependencies() {
        let registry = HealthRegistry::new(1);
        registry.register("graph");
        registry.record_failure("graph", "timeout");
        let report = registry.overall();
        assert_eq!(report.overall, OverallState::Healthy);
        assert_eq!(report.total, 3);
        assert_eq!(report.healthy, 2);

        registry.record_failure(GENERATION_DEPENDENCY, "connection refused");
        assert_eq!(registry.overall().overall, OverallState::Degraded);
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = HealthRegistry::default().with_required(Vec::<String>::new());
        registry.register("vector");
        registry.register("graph");
        let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["graph", "vector"]);
    }
}
