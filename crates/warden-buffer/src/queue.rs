//! Background work that outlives the request that started it

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use warden_common::AtomicCounter;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Task queue drained independently of request completion
pub struct BackgroundQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<u64>>>,
    submitted: AtomicCounter,
}

impl BackgroundQueue {
    /// Start the queue worker; must be called inside a runtime
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(rx));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            submitted: AtomicCounter::new(0),
        }
    }

    /// Queue a task; dropped with a warning after [`Self::drain`]
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) if tx.send(Box::pin(task)).is_ok() => {
                self.submitted.inc();
            }
            _ => warn!("Background queue closed, dropping task"),
        }
    }

    /// Tasks accepted so far
    pub fn submitted(&self) -> u64 {
        self.submitted.get()
    }

    /// Stop accepting work and wait for queued tasks, up to `timeout`.
    ///
    /// Returns the number of tasks that ran to completion.
    pub async fn drain(&self, timeout: Duration) -> u64 {
        self.tx.lock().take();
        let Some(worker) = self.worker.lock().take() else {
            return 0;
        };

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(completed)) => {
                debug!(completed, "Background queue drained");
                completed
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Background queue worker failed");
                0
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Background queue drain timed out");
                0
            }
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Job>) -> u64 {
    let mut tasks = JoinSet::new();
    let mut completed = 0u64;

    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => {
                    tasks.spawn(job);
                }
                None => break,
            },
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                completed += record(result);
            }
        }
    }

    while let Some(result) = tasks.join_next().await {
        completed += record(result);
    }
    completed
}

fn record(result: Result<(), tokio::task::JoinError>) -> u64 {
    match result {
        Ok(()) => 1,
        Err(e) => {
            warn!(error = %e, "Background task failed");
            0
        }
    }
}
