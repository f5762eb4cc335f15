use anyhow::{Context, Result};
use clap::Parser;
use convo_assist::{
    create_router, AppState, Config, Gateway, GenerationFactory, PeriodicCleanup,
    PersistenceStore, SessionStore, TranscriptionFactory,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "convo-assist", version, about = "Live conversation assistant backend")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/convo-assist")]
    config: String,

    /// Override the HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = cli.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let sessions = Arc::new(SessionStore::new());
    let transcriber = TranscriptionFactory::create(&cfg.transcription)?;
    let generator = GenerationFactory::create(&cfg.generation)?;

    let mut gateway = Gateway::new(
        cfg.gateway.clone(),
        sessions,
        transcriber,
        generator,
        cfg.transcription.max_buffer_bytes,
    );

    let mut cleanup = None;
    if cfg.persistence.enabled {
        let store = Arc::new(
            PersistenceStore::open(
                cfg.persistence.resolved_directory(),
                cfg.persistence.max_age(),
            )
            .await?,
        );
        match store.cleanup_expired().await {
            Ok(removed) => info!("Startup snapshot cleanup removed {} files", removed),
            Err(e) => warn!("Startup snapshot cleanup failed: {:#}", e),
        }

        let mut task = PeriodicCleanup::new(store.clone(), cfg.persistence.cleanup_interval());
        task.start();
        cleanup = Some(task);
        gateway = gateway.with_persistence(store);
    } else {
        info!("Session persistence disabled");
    }

    let gateway = Arc::new(gateway);
    let shutdown = CancellationToken::new();
    let heartbeat = gateway.spawn_heartbeat(shutdown.clone());
    let pruner = gateway.coordinator().spawn_pruner(
        cfg.requests.prune_interval(),
        cfg.requests.retention(),
        shutdown.clone(),
    );

    let app = create_router(AppState::new(gateway.clone(), cfg.service.name.clone()));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{} (WebSocket at /conversation)", addr);

    let signal = shutdown.clone();
    let closing = gateway.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            signal.cancel();
            // Open sockets would otherwise keep the server alive
            closing.shutdown().await;
        })
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    if let Some(mut task) = cleanup {
        task.stop().await;
    }
    let _ = heartbeat.await;
    let _ = pruner.await;

    info!("Stopped");
    Ok(())
}
