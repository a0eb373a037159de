// draftroom server entry point.
//
// Startup sequence:
// 1. Load config (copying defaults on first run)
// 2. Initialize tracing (log to file)
// 3. Open database
// 4. Build the draft engine
// 5. Bind and run the WebSocket server until Ctrl+C
// 6. Stop draft actors, draining queued writes

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use draftroom_core::config::{self, Config};
use draftroom_core::db::Database;
use draftroom_core::persistence::SqliteGateway;
use draftroom_core::ws_server;
use draftroom_core::{DraftEngine, EngineSettings};
use tracing::{error, info, warn};

/// How long draft actors get to drain queued writes on Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;

    init_tracing(&config)?;
    info!("draftroom starting up");

    let db = Database::open(&config.database.path).context("failed to open database")?;
    info!("Database opened at {}", config.database.path);

    let gateway = Arc::new(SqliteGateway::new(Arc::new(db)));
    let engine = DraftEngine::new(gateway, EngineSettings::from_config(&config));

    let addr = config.listen_addr();
    let listener = ws_server::bind(&addr).await?;
    let ws_engine = engine.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_engine).await {
            error!("WebSocket server error: {e:#}");
        }
    });
    info!("draftroom ready on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");

    ws_handle.abort();
    if engine.shutdown_within(SHUTDOWN_GRACE).await {
        info!("draftroom shut down cleanly");
    } else {
        warn!(
            "Draft actors did not stop within {SHUTDOWN_GRACE:?}; queued changes may not be persisted for {:?}",
            engine.resident_drafts()
        );
    }
    Ok(())
}

/// Initialize tracing to log to `<logging.directory>/draftroom.log`.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join(&config.logging.directory);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_file = std::fs::File::create(log_dir.join("draftroom.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
