//! Background monitor that polls in-flight jobs.
//!
//! One task for the whole manager. Each tick it polls every in-flight job,
//! at most `max_concurrent_polls` at a time, then sleeps `poll_interval`.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use hpcrag_core::Result;

use crate::events::JobEvent;
use crate::manager::JobManager;

/// Handle for controlling a running monitor.
pub struct MonitorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the monitor task to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| hpcrag_core::Error::Internal(format!("Monitor task failed: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Polls every in-flight job of a [`JobManager`] on a fixed interval.
pub struct JobMonitor {
    manager: JobManager,
}

impl JobMonitor {
    pub fn new(manager: JobManager) -> Self {
        Self { manager }
    }

    /// Start the monitor and return a handle for control.
    pub fn start(self) -> MonitorHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            self.run(token).await;
        });
        MonitorHandle { shutdown, task }
    }

    #[instrument(skip(self, shutdown), fields(subsystem = "jobs", component = "monitor"))]
    async fn run(self, shutdown: CancellationToken) {
        let config = self.manager.config().clone();
        let poll_interval = config.poll_interval();
        let permits = Arc::new(Semaphore::new(config.max_concurrent_polls.max(1)));

        info!(
            poll_interval_ms = config.poll_interval_ms,
            max_concurrent = config.max_concurrent_polls,
            "Job monitor started"
        );
        self.manager.emit(JobEvent::MonitorStarted);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = self.manager.in_flight_jobs().await;
            if !jobs.is_empty() {
                debug!(jobs = jobs.len(), "Polling in-flight jobs");
            }

            let mut tasks = JoinSet::new();
            for job_id in jobs {
                let manager = self.manager.clone();
                let permits = permits.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    if let Err(e) = manager.poll(job_id).await {
                        debug!(%job_id, error = %e, "Poll skipped");
                    }
                });
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = ?e, "Poll task panicked");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
        }

        self.manager.emit(JobEvent::MonitorStopped);
        info!("Job monitor stopped");
    }
}
