//! entitlement-rs: HTTP entitlement service
//!
//! Usage: `entitlement-rs [config.toml]`. Every setting can also be given
//! as `ENTITLEMENT__SECTION__KEY`.

use entitlement_rs::api::{ApiServer, AppState};
use entitlement_rs::clock::SystemClock;
use entitlement_rs::config::{Config, LoggingConfig};
use entitlement_rs::db;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("entitlement_rs={},tower_http={}", logging.level, logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    init_logging(&config.logging);

    info!("Starting entitlement-rs v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No config file specified, using defaults and environment"),
    }
    info!("  Listening on: {}", config.server.listen_addr);
    info!("  Database: {}", config.storage.database_url);
    info!(
        "  Default limits: {} chapters, {} questions/day, {} AI queries/day",
        config.quota.defaults.chapters,
        config.quota.defaults.questions_per_day,
        config.quota.defaults.ai_queries_per_day
    );

    let pool = db::connect(&config.storage).await?;
    db::init_schema(&pool).await?;

    let state = Arc::new(AppState::new(pool, &config, Arc::new(SystemClock)));
    let server = ApiServer::new(state, config.server.listen_addr.clone());
    server.run().await?;

    Ok(())
}
