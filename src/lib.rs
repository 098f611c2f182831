pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod dispatch;
pub mod error;
mod services;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use commands::GateState;
use config::GateConfig;
use services::BackgroundServices;

/// Start the admission server: open storage, start background services,
/// and run until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in trackgate: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackgate=info".into()),
        )
        .init();

    let config = GateConfig::load()?;

    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let database = Arc::new(
        db::Database::open(&config.database_path).context("Failed to open SQLite database")?,
    );
    tracing::info!("Database opened at {}", config.database_path.display());

    let state = GateState::new(database, &config)?;
    let services = BackgroundServices::start(state.cache(), Duration::from_secs(config.flush_interval_secs))?;

    if config.dispatch.port == 0 {
        tracing::info!("Command dispatch disabled (no port configured)");
    } else {
        tracing::info!(
            "Command dispatch via {}:{} (timeout {}ms)",
            config.dispatch.host,
            config.dispatch.port,
            config.dispatch.timeout_ms
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    tracing::info!("trackgate running, press Ctrl-C to stop");
    runtime.block_on(tokio::signal::ctrl_c())?;

    tracing::info!("Shutting down");
    services.shutdown();
    let saved = commands::flush_profiles(&state);
    tracing::info!("Final flush saved {saved} transport profiles");
    Ok(())
}
