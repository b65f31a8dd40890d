//! Startup wiring: config in, running pipeline out.

use crate::config::{Config, ConfigError};
use crate::error::Result;
use crate::pipeline::{Pipeline, PoolConfig, RetryPolicy, ScanSummary};
use crate::scanner::DirectoryScanner;
use crate::upload;
use crate::watcher::DirectoryWatcher;
use crate::webhook::{NoopNotifier, Notifier, WebhookNotifier};
use archivist_db::StatusDb;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Everything a pipeline run needs, built once from config.
pub struct Components {
    pub db: StatusDb,
    pub pipeline: Arc<Pipeline>,
}

impl Components {
    /// Open the store, build the backend and select its target.
    ///
    /// Any failure here is a startup error.
    pub async fn connect(config: &Config) -> Result<Self> {
        let db = StatusDb::open(&config.database.path, config.database.max_connections).await?;
        info!(path = %config.database.path.display(), "Status store ready");

        let backend = upload::from_config(&config.upload)?;
        backend.select_target(&config.upload.target).await?;

        let notifier: Arc<dyn Notifier> = match &config.webhook {
            Some(webhook) => Arc::new(
                WebhookNotifier::new(webhook)
                    .map_err(|e| ConfigError::Invalid(format!("webhook client: {}", e)))?,
            ),
            None => Arc::new(NoopNotifier),
        };

        let pipeline = Pipeline::new(
            Arc::new(db.clone()),
            backend,
            notifier,
            config.extension_filter(),
        )
        .with_retry(RetryPolicy::from(&config.upload))
        .with_settle(config.pipeline.settle());

        Ok(Self {
            db,
            pipeline: Arc::new(pipeline),
        })
    }
}

/// Single pass over the root, then return.
///
/// Stuck uploads are only reported here; a concurrently running service
/// may legitimately own them.
pub async fn scan_once(config: &Config) -> Result<ScanSummary> {
    let Components { db, pipeline } = Components::connect(config).await?;
    pipeline.reconcile_stuck(false).await?;

    let scanner = DirectoryScanner::new(&config.folder.root, config.extension_filter());
    let summary = pipeline.run_scan(&scanner).await;
    db.close().await;
    summary
}

/// Scan, then watch until `shutdown` flips to true.
///
/// The watch subscription is taken before the scan so files arriving during
/// the scan are not missed; paths seen by both are de-duplicated by the
/// status store.
pub async fn run(config: &Config, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let Components { db, pipeline } = Components::connect(config).await?;
    pipeline
        .reconcile_stuck(config.pipeline.reconcile_stuck_uploads)
        .await?;

    let (watcher, stream) = DirectoryWatcher::subscribe(&config.folder.root)?;

    let scanner = DirectoryScanner::new(&config.folder.root, config.extension_filter());
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => {
            info!("Shutdown requested during scan");
            let unsubscribed = watcher.unsubscribe();
            db.close().await;
            unsubscribed?;
            return Ok(());
        }
        summary = pipeline.run_scan(&scanner) => { summary?; }
    }

    let pool = PoolConfig {
        workers: config.pipeline.workers,
        queue_capacity: config.pipeline.queue_capacity,
    };
    let result = pipeline.run_watch(stream, pool, shutdown).await;
    let unsubscribed = watcher.unsubscribe();
    db.close().await;

    result?;
    unsubscribed?;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
