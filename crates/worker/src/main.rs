use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imagegen_events::EventBus;
use imagegen_pipeline::blobs::LocalReferenceStore;
use imagegen_pipeline::dispatcher::BatchDispatcher;
use imagegen_pipeline::ingest::FileSystemIngestor;
use imagegen_pipeline::store::PgStore;
use imagegen_pipeline::{GenerationConfig, GenerationOrchestrator, GenerationStore, ReferenceImageCache};
use imagegen_replicate::{ReplicateApi, ReplicateConfig};
use imagegen_worker::config::{LogFormat, WorkerConfig};
use imagegen_worker::event_log;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());
    let config = config.context("Invalid worker configuration")?;
    let generation = GenerationConfig::from_env().context("Invalid generation configuration")?;
    let replicate_config = ReplicateConfig::from_env().context("Invalid provider configuration")?;
    tracing::info!(
        model = %replicate_config.model,
        poll_interval_ms = generation.poll_interval.as_millis() as u64,
        max_wait_secs = generation.max_wait.as_secs(),
        max_outputs = generation.max_outputs,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = imagegen_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    imagegen_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    imagegen_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Provider ---
    let replicate = Arc::new(
        ReplicateApi::new(replicate_config)
            .context("Failed to build provider client")?
            .with_upload_policy(generation.upload_policy),
    );

    // --- Event bus ---
    let events = Arc::new(EventBus::default());
    let event_log_handle = tokio::spawn(event_log::run(events.subscribe()));

    // --- Engine ---
    let store: Arc<dyn GenerationStore> = Arc::new(PgStore::new(pool.clone()));
    let cache = Arc::new(ReferenceImageCache::new(
        Arc::clone(&store),
        Arc::new(LocalReferenceStore::new(config.reference_dir.clone())),
        replicate.clone(),
        Arc::clone(&events),
        generation.upload_policy,
    ));
    let orchestrator = GenerationOrchestrator::new(
        Arc::clone(&store),
        replicate,
        Arc::new(FileSystemIngestor::new(reqwest::Client::new(), config.output_dir.clone())),
        Arc::clone(&events),
        generation,
    );

    let dispatcher = BatchDispatcher::new(store, cache, orchestrator.clone(), config.dispatch_interval);
    let cancel = CancellationToken::new();
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });
    tracing::info!(
        output_dir = %config.output_dir.display(),
        reference_dir = %config.reference_dir.display(),
        "Worker started",
    );

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    tracing::info!("Dispatcher stopped");

    orchestrator.shutdown().await;
    drop(orchestrator);

    // Dropping the last bus handle closes the event log.
    drop(events);
    let _ = tokio::time::timeout(Duration::from_secs(5), event_log_handle).await;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "imagegen_worker=debug,imagegen_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
