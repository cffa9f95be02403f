use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, RunMode};
use services::{
    gateway::GenerationGateway, ledger_service::LedgerService, quota_service::QuotaService, store,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting engagement-hub with config: {:?}", cfg);

    // --- Open the store and bring the schema up to date ---
    let store = store::connect(&cfg.database_url, cfg.max_connections).await?;
    let applied = store.migrate().await?;
    tracing::info!(backend = store.backend(), statements = applied, "Database migration complete.");

    if mode == RunMode::Migrate {
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let gateway = GenerationGateway::from_config(&cfg.gateway)?;
    for (provider, configured) in gateway.provider_status() {
        if !configured {
            tracing::warn!(%provider, "no API key configured, generations will be degraded");
        }
    }
    let quota = QuotaService::new(store.clone(), cfg.quota_policy());
    let rules = cfg.rule_book();
    tracing::info!(terms = rules.term_count(), "Loaded rule book");
    let ledger = LedgerService::new(store, rules, gateway.clone());

    // --- Drop quota rows past retention ---
    match quota.prune(cfg.quota_retention_days).await {
        Ok(removed) => tracing::info!(removed, retention_days = cfg.quota_retention_days, "Pruned usage quotas"),
        Err(err) if mode == RunMode::PruneQuotas => return Err(err.into()),
        Err(err) => tracing::warn!(error = %err, "quota pruning failed, continuing"),
    }
    if mode == RunMode::PruneQuotas {
        return Ok(());
    }

    let state = AppState {
        ledger,
        quota,
        gateway,
        trust_forwarded_for: cfg.trust_forwarded_for,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
