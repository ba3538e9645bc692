//! Background liveness jobs
//!
//! Two job groups exist per plugin, keyed by plugin id: a one-shot
//! `startup` verification fired immediately at process start for plugins
//! that survived a restart, and a recurring `periodic` liveness job whose
//! first fire is delayed by the ping period and which then repeats at
//! that fixed interval forever.
//!
//! Jobs run on tokio worker tasks, independent of the request path. The
//! scheduler knows nothing about plugins beyond the id: the actual
//! ping/refresh/prune logic lives behind [`JobRunner`]. A job that
//! returns an error is finished - it is never retried; the runner's
//! failure path is responsible for pruning, and pruning cancels job
//! entries before any record is deleted so no job can fire against
//! half-deleted state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::callback::CallbackError;
use crate::error::DiscoveryError;

/// Job group, the first half of a job key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobGroup {
    /// One-shot post-restart verification
    Startup,
    /// Recurring liveness check
    Periodic,
}

/// Payload handed to the runner on every fire
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// The plugin this job belongs to
    pub plugin_id: String,
    /// `true` asks the plugin to re-publish its subtree, `false` is a
    /// bare liveness probe
    pub refresh: bool,
}

/// Why a job execution failed
#[derive(Error, Debug)]
pub enum JobError {
    /// The plugin record is gone; the job must not be retried
    #[error("plugin {0} is no longer registered")]
    PluginGone(String),
    /// The callback invocation failed
    #[error(transparent)]
    Callback(#[from] CallbackError),
}

/// Executes a job's payload
///
/// Implemented by the registration protocol handler; the scheduler only
/// observes success or failure.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one job firing
    async fn execute(&self, job: &JobSpec) -> Result<(), JobError>;
}

type JobKey = (JobGroup, String);
type JobMap = Arc<Mutex<HashMap<JobKey, JoinHandle<()>>>>;

/// Process-wide job scheduler
pub struct JobScheduler {
    jobs: JobMap,
    shut_down: AtomicBool,
}

impl JobScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Schedule the one-shot startup verification for a plugin
    ///
    /// Fires immediately, once. Replaces any previous startup entry for
    /// the same id.
    pub fn schedule_startup(
        &self,
        plugin_id: &str,
        runner: Arc<dyn JobRunner>,
    ) -> Result<(), DiscoveryError> {
        self.check_running(plugin_id)?;

        let key = (JobGroup::Startup, plugin_id.to_string());
        let job = JobSpec {
            plugin_id: plugin_id.to_string(),
            refresh: true,
        };
        let jobs = Arc::clone(&self.jobs);
        let task_key = key.clone();

        let mut map = self.jobs.lock();
        if let Some(previous) = map.remove(&key) {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            match runner.execute(&job).await {
                Ok(()) => debug!(plugin_id = %job.plugin_id, "Startup verification completed"),
                Err(e) => {
                    warn!(plugin_id = %job.plugin_id, error = %e, "Startup verification failed")
                }
            }
            // One-shot: the entry is gone either way, never rescheduled
            jobs.lock().remove(&task_key);
        });
        map.insert(key, handle);
        Ok(())
    }

    /// Schedule the recurring periodic liveness job for a plugin
    ///
    /// First fire after `period`, then every `period` forever, until the
    /// job fails or is cancelled. Replaces any previous periodic entry
    /// for the same id.
    pub fn schedule_periodic(
        &self,
        plugin_id: &str,
        period: Duration,
        runner: Arc<dyn JobRunner>,
    ) -> Result<(), DiscoveryError> {
        self.check_running(plugin_id)?;

        let key = (JobGroup::Periodic, plugin_id.to_string());
        // The recurring check is a lightweight ping; the full subtree
        // re-pull is reserved for the one-shot startup verification.
        let job = JobSpec {
            plugin_id: plugin_id.to_string(),
            refresh: false,
        };
        let jobs = Arc::clone(&self.jobs);
        let task_key = key.clone();

        let mut map = self.jobs.lock();
        if let Some(previous) = map.remove(&key) {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            loop {
                timer.tick().await;
                match runner.execute(&job).await {
                    Ok(()) => {
                        debug!(plugin_id = %job.plugin_id, "Periodic liveness check completed")
                    }
                    Err(e) => {
                        // The runner's failure path prunes; our entry may
                        // already be cancelled. Either way this job is done.
                        warn!(plugin_id = %job.plugin_id, error = %e, "Periodic liveness check failed");
                        jobs.lock().remove(&task_key);
                        break;
                    }
                }
            }
        });
        map.insert(key, handle);
        Ok(())
    }

    /// Cancel every job entry for a plugin id, across both groups
    ///
    /// Safe to call from within a running job of the same plugin: the
    /// abort lands at the task's next yield, after the current
    /// synchronous prune steps have finished.
    pub fn cancel_all(&self, plugin_id: &str) {
        let mut jobs = self.jobs.lock();
        for group in [JobGroup::Startup, JobGroup::Periodic] {
            if let Some(handle) = jobs.remove(&(group, plugin_id.to_string())) {
                debug!(plugin_id, ?group, "Cancelled job");
                handle.abort();
            }
        }
    }

    /// Whether a job entry currently exists
    pub fn has_job(&self, group: JobGroup, plugin_id: &str) -> bool {
        self.jobs
            .lock()
            .contains_key(&(group, plugin_id.to_string()))
    }

    /// Number of live job entries
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Cancel all jobs and refuse any further scheduling
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let mut jobs = self.jobs.lock();
        let count = jobs.len();
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        info!(cancelled = count, "Scheduler shut down");
    }

    fn check_running(&self, plugin_id: &str) -> Result<(), DiscoveryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Scheduling(format!(
                "scheduler is shut down; cannot schedule jobs for plugin {plugin_id}"
            )));
        }
        Ok(())
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
