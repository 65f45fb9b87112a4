use ember_core::{DependencyState, HealthProber};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Background task: probes every dependency on a fixed interval so an
/// unreachable one can recover without user traffic.
pub struct ProbeLoop {
    prober: Arc<HealthProber>,
    interval: Duration,
}

impl ProbeLoop {
    pub fn new(prober: Arc<HealthProber>, interval: Duration) -> Self {
        Self { prober, interval }
    }

    /// Run the probe loop. Call via `tokio::spawn`.
    pub async fn run(self) {
        info!(
            "Health prober started for {:?} every {:?}",
            self.prober.target_names(),
            self.interval
        );
        loop {
            let statuses = self.prober.run_once().await;
            for status in statuses.iter().filter(|s| s.state != DependencyState::Healthy) {
                warn!(
                    "Dependency '{}' is {} ({} consecutive failures): {}",
                    status.name,
                    status.state,
                    status.consecutive_failures,
                    status.last_error.as_deref().unwrap_or("-")
                );
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
