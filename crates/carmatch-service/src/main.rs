//! CarMatch Service - HTTP API for listing publication and credits
//!
//! This is the main entry point for the carmatch service.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carmatch_core::PublicationPolicy;
use carmatch_service::{create_router, run_renewal_sweep, AppState, ServiceConfig};
use carmatch_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,carmatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CarMatch Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        stripe_configured = %config.stripe_api_key.is_some(),
        webhook_secret_configured = %config.stripe_webhook_secret.is_some(),
        sweep_interval_seconds = ?config.sweep_interval_seconds,
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let store = PgStore::connect(url, config.database_max_connections).await?;
        store.migrate().await?;
        Arc::new(store)
    } else {
        tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
        Arc::new(MemoryStore::new())
    };

    if let Some(secs) = config.sweep_interval_seconds {
        spawn_sweeper(Arc::clone(&store), config.policy.clone(), Duration::from_secs(secs));
    }

    // Build app state
    let state = AppState::new(store, config.clone());

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the renewal sweep on a fixed interval.
fn spawn_sweeper(store: Arc<dyn Store>, policy: PublicationPolicy, period: Duration) {
    tracing::info!(period_seconds = period.as_secs(), "Starting in-process renewal sweeper");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = run_renewal_sweep(store.as_ref(), &policy, chrono::Utc::now()).await {
                tracing::error!(error = %e, "Renewal sweep failed");
            }
        }
    });
}
