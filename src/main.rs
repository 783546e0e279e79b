use std::env;
use std::path::Path;

use rstore::Error;
use rstore::Registration;
use rstore::Registry;
use rstore::ResourceType;
use rstore::Result;
use rstore::ServerBuilder;
use rstore::Settings;
use rstore::SystemError;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let mut settings = Settings::new()?;
    if let Some(path) = env::args().nth(1) {
        settings = settings.with_override_config(&path)?;
    }
    settings.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.server.log_dir)?;

    // Initializing Shutdown Signal
    let shutdown = CancellationToken::new();

    let server = ServerBuilder::init(settings, shutdown.clone())
        .registry(builtin_registry()?)
        .build()
        .start_metrics_server()
        .ready()?;

    info!("Application started. Waiting for CTRL+C signal...");
    // Listen on Shutdown Signal
    tokio::spawn(async move {
        if let Err(e) = graceful_shutdown(shutdown).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = server.run().await {
        error!("server stops: {:?}", e);
    }

    info!("Exiting program.");
    Ok(())
}

/// Types known to a stock process; embedders register their own through
/// [`ServerBuilder::registry`].
fn builtin_registry() -> Result<std::sync::Arc<Registry>> {
    let registry = Registry::new();
    registry.register(Registration::new(ResourceType::new("demo", "v2", "Artist")))?;
    registry.register(Registration::new(ResourceType::new("demo", "v2", "Album")))?;
    Ok(std::sync::Arc::new(registry))
}

async fn graceful_shutdown(shutdown: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    if shutdown.is_cancelled() {
        return Err(Error::System(SystemError::SignalSendFailed(
            "shutdown already in progress".to_string(),
        )));
    }
    shutdown.cancel();

    info!("Shutdown signal sent");
    Ok(())
}

fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::never(log_dir, "resource-store.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
