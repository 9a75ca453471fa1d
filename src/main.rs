//! Gabagool Accumulator
//!
//! Automated market-maker/arbitrage engine for binary-outcome
//! prediction markets: accumulates YES/NO pairs below a target cost,
//! rebalances delta, and halts or liquidates on risk breaches.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gabagool_accumulator::api::{router, AppState};
use gabagool_accumulator::config::AppConfig;
use gabagool_accumulator::orchestrator::Orchestrator;
use gabagool_accumulator::store::StateStore;
use gabagool_accumulator::venue::PolymarketVenueClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("load configuration")?;
    init_tracing(&config.log_level);
    config.validate().context("invalid configuration")?;

    info!("gabagool accumulator starting");

    let store = Arc::new(StateStore::new(&config.database_path).context("open state store")?);
    let venue: Arc<dyn gabagool_accumulator::venue::VenueClient> = Arc::new(
        PolymarketVenueClient::new(
            config.polymarket_api_url.clone(),
            config.polymarket_api_key.clone(),
        )
        .context("build venue client")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(store, venue, config.clone()));

    if config.log_level.eq_ignore_ascii_case("debug") {
        info!("log level is DEBUG, auto-starting trading service");
        if let Err(e) = orchestrator.start().await {
            tracing::error!(error = %e, "failed to auto-start trading service");
        }
    }

    let app_state = AppState { orchestrator };
    let app = router(app_state);

    let addr = format!("0.0.0.0:{}", config.dashboard_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "dashboard API listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = format!("gabagool_accumulator={},tower_http=info", log_level.to_lowercase());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
