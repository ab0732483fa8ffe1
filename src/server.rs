use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use downloader::api::{self, AppState};
use downloader::config::Config;
use downloader::notifier::Notifier;
use downloader::observability::Metrics;
use downloader::processor::Processor;
use downloader::storage::StorageClient;
use downloader::store::{FjallJobStore, JobStore};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Run the API, the download processor and the callback notifier until a
/// shutdown signal arrives
pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let address = address.unwrap_or(config.server.bind_addr);

    info!(path = %config.server.fjall_path.display(), "Opening job store");
    let store = Arc::new(
        FjallJobStore::open(&config.server.fjall_path)
            .map_err(|e| format!("Failed to open job store: {e}"))?,
    );
    let storage = StorageClient::from_config(&config.storage)
        .map_err(|e| format!("Failed to initialise storage: {e}"))?;
    let metrics = Arc::new(Metrics::new());

    let shared: Arc<dyn JobStore> = store.clone();
    let processor = Arc::new(Processor::new(
        shared.clone(),
        storage.clone(),
        &config.processor,
        metrics.clone(),
    )?);
    let notifier = Arc::new(Notifier::new(shared, &config.notifier, metrics.clone())?);

    let shutdown = CancellationToken::new();
    let processor_task = tokio::spawn(processor.run(shutdown.child_token()));
    let notifier_task = tokio::spawn(notifier.run(shutdown.child_token()));

    let state = AppState::new(Arc::new(config), store.clone(), storage, metrics);
    let listener = TcpListener::bind(address).await?;

    let api_shutdown = shutdown.clone();
    let served = api::serve(listener, state, async move {
        tokio::select! {
            _ = shutdown_signal() => {},
            _ = api_shutdown.cancelled() => {},
        }
    })
    .await;

    // Stop the pipeline whichever way the API exited
    shutdown.cancel();
    for (name, task) in [("processor", processor_task), ("notifier", notifier_task)] {
        if let Err(e) = task.await {
            error!(component = name, error = %e, "Task ended abnormally");
        }
    }

    store.persist()?;
    info!("Shutdown complete");

    served.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
