use crate::bootstrap;
use crate::config::EmberConfig;
use crate::health::ProbeLoop;
use axum::http::HeaderValue;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub async fn run(config: EmberConfig) -> anyhow::Result<()> {
    info!("Starting Ember server v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP: {}", config.server.http_addr);

    let runtime = bootstrap::build(&config)?;
    info!(
        "Coordinator ready: {} knowledge sources, fan-out deadline {:?}",
        runtime.coordinator.aggregator().source_names().len(),
        runtime.coordinator.aggregator().fanout_deadline()
    );

    // Start health prober
    let probe_task = {
        let prober = runtime.prober.clone();
        let interval = Duration::from_secs(config.health.probe_interval_secs);
        tokio::spawn(async move {
            ProbeLoop::new(prober, interval).run().await;
        })
    };

    // Start HTTP server
    let http_task = {
        let app_state = crate::http::AppState::new(
            runtime.coordinator.clone(),
            runtime.registry.clone(),
            config.server.max_concurrent_requests,
        );
        let app = crate::http::create_router(app_state)
            .layer(cors_layer(&config.server.cors_origins)?)
            .layer(TraceLayer::new_for_http());
        let addr = config.server.http_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP server on {}: {}", addr, e))?;

        tokio::spawn(async move {
            info!("Starting HTTP server on {}", addr);
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server failed: {}", e);
            }
        })
    };

    info!("Ember is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    probe_task.abort();
    http_task.abort();

    Ok(())
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|o| o.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}
