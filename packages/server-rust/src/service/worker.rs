//! Bounded worker pool for inbound requests.
//!
//! Jobs are queued on a bounded mpsc channel. A dispatcher task takes one
//! semaphore permit per job and runs the job on its own tokio task, so at most
//! `concurrency` jobs run at once and at most `queue_capacity` wait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::debug;

use super::config::WorkerPoolConfig;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Errors from submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker queue is full")]
    Full,
    #[error("worker pool is not running")]
    Stopped,
}

/// Fixed-size pool executing submitted futures.
pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    concurrency: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .field("running", &self.tx.is_some())
            .finish()
    }
}

impl WorkerPool {
    /// Starts the dispatcher task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(config: &WorkerPoolConfig) -> Self {
        let concurrency = config.concurrency();
        let (tx, mut rx) = mpsc::channel::<Job>(config.queue_capacity());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let permits = Arc::new(Semaphore::new(concurrency));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = rx.recv() => {
                        let Some(job) = job else { break };
                        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                            break;
                        };
                        tokio::spawn(async move {
                            job.await;
                            drop(permit);
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("worker pool dispatcher stopped");
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            concurrency,
        }
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queues a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Full` if the queue is at capacity and
    /// `PoolError::Stopped` if the pool has been stopped.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return Err(PoolError::Stopped);
        };
        tx.try_send(Box::pin(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Full,
            mpsc::error::TrySendError::Closed(_) => PoolError::Stopped,
        })
    }

    /// Stops accepting jobs and waits for the dispatcher to exit.
    ///
    /// Jobs already running are not cancelled.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
