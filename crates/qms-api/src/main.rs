//! qms-api server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! live SQLite database, starts the maintenance scheduler, and serves the
//! backup API over HTTP.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use qms_api::{AppState, ServerConfig, SharedStore};
use qms_backup::{Scheduler, jobs::register_standard_jobs};
use qms_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "QMS backup service")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("QMS"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in paths.
  let db_path = expand_tilde(&server_cfg.db_path);
  let backup_dir = expand_tilde(&server_cfg.backup_dir);

  // Open the live database.
  let store = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open database at {db_path:?}"))?;

  let backup_cfg = qms_backup::BackupConfig::new(db_path, backup_dir);
  let state = AppState::new(store, backup_cfg.clone());

  // Start the maintenance scheduler. The handle aborts the jobs on drop,
  // so it is held for the lifetime of the server.
  let mut scheduler = Scheduler::new();
  register_standard_jobs(
    &mut scheduler,
    &backup_cfg,
    SharedStore::new(state.store.clone()),
  );
  let _scheduler = scheduler.start();

  let app = axum::Router::new()
    .nest("/api", qms_api::api_router(state))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
