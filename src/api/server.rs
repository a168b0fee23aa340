use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::routes;
use crate::registry::lifecycle::Lifecycle;

/// Shared state for the dashboard API.
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub started_at: Instant,
}

/// Run the dashboard API and the background expiry sweeper until shutdown.
pub async fn run(lifecycle: Arc<Lifecycle>, bind: &str, sweep_interval_secs: u64) -> Result<()> {
    let state = Arc::new(AppState {
        lifecycle: Arc::clone(&lifecycle),
        started_at: Instant::now(),
    });

    // Periodic sweep: expired instances get stopped even if nobody is
    // looking at the dashboard.
    let sweeper = Arc::clone(&lifecycle);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let report = sweeper.sweep(Utc::now()).await;
            if !report.stopped.is_empty() || !report.failed.is_empty() || !report.lost.is_empty() {
                tracing::info!(
                    "Sweep: {} stopped, {} failed, {} lost",
                    report.stopped.len(),
                    report.failed.len(),
                    report.lost.len()
                );
            }
        }
    });

    let app = Router::new()
        .route("/healthz", get(routes::health))
        .route(
            "/containers",
            get(routes::list_containers).post(routes::start_container),
        )
        .route("/containers/renew", post(routes::renew_container))
        .route("/containers/:id", delete(routes::kill_container))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    tracing::info!("Dashboard API listening on {}", bind);

    axum::serve(listener, app)
        .await
        .context("Dashboard API server failed")?;

    Ok(())
}
