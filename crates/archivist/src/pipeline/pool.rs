//! Bounded concurrency for watch-triggered work.

use super::{Outcome, Pipeline, Trigger};
use crate::error::{IngestError, Result};
use crate::watcher::{WatchError, WatchStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long queued work may keep running after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Fixed set of workers fed from one bounded queue.
pub struct WorkerPool {
    tx: mpsc::Sender<PathBuf>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(pipeline: Arc<Pipeline>, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.workers.max(1))
            .map(|id| tokio::spawn(worker_loop(id, pipeline.clone(), rx.clone())))
            .collect();
        Self { tx, workers }
    }

    /// Queue a path, waiting while the queue is full.
    pub async fn submit(&self, path: PathBuf) -> Result<()> {
        self.tx
            .send(path)
            .await
            .map_err(|_| IngestError::Task("worker pool closed".to_string()))
    }

    /// Close the queue and wait up to `grace` for workers to drain it.
    /// Workers still busy after that are aborted.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.tx);
        let deadline = Instant::now() + grace;
        for mut handle in self.workers {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("Worker did not finish before shutdown deadline, aborting");
                handle.abort();
            }
        }
    }
}

async fn worker_loop(id: usize, pipeline: Arc<Pipeline>, rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>) {
    debug!(worker = id, "Worker started");
    loop {
        let next = rx.lock().await.recv().await;
        let Some(path) = next else { break };

        // Each file runs in its own task so a panic only loses that file
        let pipeline = pipeline.clone();
        let task = tokio::spawn(async move {
            let result = pipeline.process(&path, Trigger::Watch).await;
            (path, result)
        });
        match task.await {
            Ok((_, Ok(Outcome::Archived { .. }))) => {}
            Ok((path, Ok(Outcome::Skipped(reason)))) => {
                debug!(worker = id, path = %path.display(), ?reason, "Skipped");
            }
            Ok((path, Err(e))) => log_failure(&path, &e),
            Err(e) => error!(worker = id, error = %e, "Ingest task panicked"),
        }
    }
    debug!(worker = id, "Worker stopped");
}

fn log_failure(path: &Path, err: &IngestError) {
    error!(path = %path.display(), source = %Trigger::Watch, error = %err, "Ingest failed");
}

impl Pipeline {
    /// Feed watch events to a worker pool until `shutdown` flips to true.
    ///
    /// Per-file failures never end the loop. A failing or closed event
    /// stream does, since missed events mean missed files.
    pub async fn run_watch(
        self: Arc<Self>,
        mut stream: WatchStream,
        config: PoolConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let pool = WorkerPool::spawn(self.clone(), config);
        info!(workers = config.workers, queue = config.queue_capacity, "Processing live events");

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                item = stream.recv() => match item {
                    Some(Ok(event)) => {
                        debug!(path = %event.path.display(), kind = ?event.kind, "Event");
                        // A full queue must not hold off shutdown
                        tokio::select! {
                            biased;
                            _ = shutdown.wait_for(|stop| *stop) => {
                                debug!(path = %event.path.display(), "Dropped at shutdown");
                                break Ok(());
                            }
                            sent = pool.submit(event.path.clone()) => {
                                if let Err(e) = sent {
                                    break Err(e);
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Watch subscription failed");
                        break Err(e.into());
                    }
                    None => break Err(WatchError::Closed.into()),
                },
            }
        };

        pool.shutdown(SHUTDOWN_GRACE).await;
        info!("Live processing stopped");
        result
    }
}
