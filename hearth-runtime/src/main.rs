use anyhow::Context;
use hearth_db::Database;
use hearth_runtime::config::Config;
use hearth_runtime::{AppState, Outbound, RecordCache, Server, create_app};
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting hearth runtime...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: db_path={}, tick_rate={}, playtime_flush={}s, cache_sweep={}s, welcome_lines={}, status_port={}",
        config.database_path,
        config.tick_rate,
        config.playtime_flush.as_secs(),
        config.cache_sweep.as_secs(),
        config.welcome_messages.len(),
        config.status_port
    );

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let cache = Arc::new(RecordCache::new(Arc::new(db)));

    // No network layer is attached; outbound effects go to the log
    let (egress_tx, mut egress_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(outbound) = egress_rx.recv().await {
            match outbound {
                Outbound::Message { to, text } => tracing::info!(player = %to, "-> {}", text),
                Outbound::Sound { to, sound, .. } => tracing::debug!(player = %to, ?sound, "sound"),
                Outbound::Broadcast { text } => tracing::info!("broadcast: {}", text),
                Outbound::Console { text } => tracing::info!("console: {}", text),
            }
        }
    });

    let (server, handle) = Server::new(&config, Arc::clone(&cache), egress_tx);
    let runtime = tokio::runtime::Handle::current();
    let main_loop = thread::Builder::new()
        .name("hearth-main".to_string())
        .spawn(move || server.run(runtime))
        .context("failed to spawn main loop thread")?;

    let app = create_app(
        AppState {
            stats: handle.stats(),
            cache,
        },
        config.request_timeout,
    );
    let addr = format!("0.0.0.0:{}", config.status_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Status endpoint listening on {}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("Axum server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    handle.shutdown();
    tokio::task::spawn_blocking(move || main_loop.join())
        .await
        .context("main loop join task failed")?
        .map_err(|_| anyhow::anyhow!("main loop thread panicked"))?;
    Ok(())
}
