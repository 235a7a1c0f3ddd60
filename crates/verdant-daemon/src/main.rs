use std::sync::Arc;

use clap::Parser;
use tracing::info;
use verdant_core::VerdantConfig;
use verdant_scheduler::{CarbonAwareEngine, SqliteJobStore};

/// Carbon-aware scheduler for deferred background jobs.
#[derive(Parser, Debug)]
#[command(name = "verdant-daemon", version, about)]
struct Cli {
    /// Path to verdant.toml (defaults to ~/.verdant/verdant.toml).
    #[arg(long, env = "VERDANT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "verdant_daemon=info,verdant_scheduler=info,verdant_forecast=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config / VERDANT_CONFIG > ~/.verdant/verdant.toml
    let config = VerdantConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        VerdantConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(SqliteJobStore::new(db)?);

    let engine = CarbonAwareEngine::start(&config, store).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping");
    engine.shutdown().await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
