// crates/server-jobs/src/controller.rs
//! Drives each job from submission to a terminal status.
//!
//! Every terminal transition goes through [`JobRegistry::update`], so the
//! first of "process finished" and "cancel requested" to take the job's lock
//! wins; the loser's transition is dropped without an event.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::classifier::ProgressClassifier;
use crate::error::JobError;
use crate::hub::{NotificationHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::log_file::JobLogFile;
use crate::pipeline::PipelineInvocation;
use crate::process::{CommandSpec, ExitOutcome, ProcessHandle, RunningProcess};
use crate::registry::JobRegistry;
use crate::types::{CancelOutcome, Job, JobEvent, JobId, JobOutcome, JobParams, JobStatus};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunables for [`JobController`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Where `job_<id>.log` mirrors are written.
    pub logs_dir: PathBuf,
    /// Parent of every job's output directory; also the area scanned for artifacts.
    pub output_root: PathBuf,
    /// Progress a job reports as soon as it starts processing.
    pub initial_progress: u8,
    /// Lines of output kept in memory per job.
    pub log_capacity: usize,
    /// Lines of output included in a status response.
    pub status_log_tail: usize,
    /// Events buffered per subscriber before it counts as lagging.
    pub subscriber_capacity: usize,
}

impl ControllerConfig {
    pub fn new(output_root: impl Into<PathBuf>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            output_root: output_root.into(),
            initial_progress: 10,
            log_capacity: 1000,
            status_log_tail: 20,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

#[derive(Clone)]
pub struct JobController {
    registry: Arc<JobRegistry>,
    hub: NotificationHub,
    pipeline: Arc<dyn PipelineInvocation>,
    classifier: Arc<ProgressClassifier>,
    config: Arc<ControllerConfig>,
}

impl JobController {
    pub fn new(config: ControllerConfig, pipeline: Arc<dyn PipelineInvocation>) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            hub: NotificationHub::with_capacity(config.subscriber_capacity),
            pipeline,
            classifier: Arc::new(ProgressClassifier::default()),
            config: Arc::new(config),
        }
    }

    pub fn with_classifier(mut self, classifier: ProgressClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_hub(mut self, hub: NotificationHub) -> Self {
        self.hub = hub;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Validate `params`, register a `pending` job and start it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, params: JobParams) -> Result<JobId, JobError> {
        let id = Uuid::new_v4().to_string();
        let output_dir = self.config.output_root.join(&id);
        let command = self.pipeline.build_command(&params, &output_dir)?;

        let mode = params.mode.clone();
        let job = Job::new(id.clone(), params, output_dir, self.config.log_capacity);
        if let Err(e) = self.registry.create(job) {
            tracing::error!(job_id = %id, error = %e, "Job id collision");
            return Err(e);
        }

        metrics::counter!("reelrun_jobs_submitted_total", "mode" => mode.clone()).increment(1);
        tracing::info!(job_id = %id, mode = %mode, "Job submitted");

        let controller = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move { controller.execute(job_id, command).await });
        Ok(id)
    }

    /// Snapshot of one job.
    pub fn status(&self, id: &str) -> Result<Job, JobError> {
        self.registry.get(id)
    }

    /// The most recent `limit` jobs, most recent last.
    pub fn list(&self, limit: usize) -> Vec<Job> {
        self.registry.list(limit)
    }

    /// Total number of jobs known to this process.
    pub fn total(&self) -> usize {
        self.registry.len()
    }

    /// Jobs not yet in a terminal status.
    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe(self.registry.active_count())
    }

    /// Cancel a `processing` job and kill its process tree.
    ///
    /// Any other status yields `CancelOutcome { cancelled: false, .. }` and
    /// leaves the job untouched.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, JobError> {
        if !self.finish(id, JobOutcome::Cancelled)? {
            return Ok(CancelOutcome::not_running());
        }
        if let Some(handle) = self.registry.detach_process(id) {
            terminate(id, handle).await;
        }
        tracing::info!(job_id = id, "Job cancelled");
        Ok(CancelOutcome::cancelled())
    }

    /// Cancel every running job. Used on server shutdown.
    pub async fn shutdown(&self) {
        let running = self.registry.running_ids();
        if running.is_empty() {
            return;
        }
        tracing::info!(count = running.len(), "Terminating running jobs");
        for id in running {
            if let Err(e) = self.cancel(&id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to cancel job on shutdown");
            }
        }
    }

    async fn execute(self, id: JobId, command: CommandSpec) {
        let initial = self.config.initial_progress;
        let started = self.registry.update(&id, |job| {
            job.start(initial)?;
            self.hub.publish(&JobEvent::JobStarted {
                job_id: job.id.clone(),
                mode: job.mode.clone(),
                theme: job.theme.clone(),
            });
            Ok::<_, JobError>(())
        });
        if let Err(e) = started.and_then(|inner| inner) {
            tracing::error!(job_id = %id, error = %e, "Job could not start");
            return;
        }
        metrics::gauge!("reelrun_jobs_running").increment(1.0);

        let supervisor = tokio::spawn(self.clone().supervise(id.clone(), command));
        let outcome = match supervisor.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(job_id = %id, error = %e, "Job failed");
                JobOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                let e = JobError::Supervisor(e.to_string());
                tracing::error!(job_id = %id, error = %e, "Job supervisor aborted");
                JobOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        // Still attached only if the supervisor bailed out with the child alive.
        if let Some(handle) = self.registry.detach_process(&id) {
            terminate(&id, handle).await;
        }

        if let Err(e) = self.finish(&id, outcome) {
            tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
        }
    }

    async fn supervise(self, id: JobId, command: CommandSpec) -> Result<JobOutcome, JobError> {
        let output_dir = self.registry.get(&id)?.output_path;
        tokio::fs::create_dir_all(&output_dir).await?;
        let mut log = JobLogFile::create(&self.config.logs_dir, &id).await?;

        tracing::info!(job_id = %id, command = %command, "Executing command");
        let mut process = RunningProcess::spawn(&command)?;
        let handle = process.handle();
        if let Err(e) = self.registry.attach_process(&id, handle) {
            terminate(&id, handle).await;
            return Err(e);
        }
        // A cancel that landed before the attach found no process to kill.
        if self.registry.get(&id)?.status != JobStatus::Processing {
            if let Some(handle) = self.registry.detach_process(&id) {
                terminate(&id, handle).await;
            }
        }

        while let Some(line) = process.next_line().await? {
            log.write_line(&line).await?;
            let update = self.classifier.classify(&line);
            let recorded = self.registry.update(&id, |job| {
                let progress = job.record_line(line.clone(), update)?;
                self.hub.publish(&JobEvent::JobProgress {
                    job_id: job.id.clone(),
                    progress,
                    log: line,
                });
                Some(progress)
            })?;
            if recorded.is_none() {
                break;
            }
        }
        log.flush().await?;

        // Take the pid back before reaping it, so a late cancel never signals
        // a reaped (and possibly reused) pid.
        let exit = match self.registry.detach_process(&id) {
            Some(owned) => self.wait_or_terminate(&id, &mut process, owned).await?,
            None => process.wait().await?,
        };
        tracing::debug!(job_id = %id, pid = handle.pid(), ?exit, "Process exited");

        let outcome = match exit {
            ExitOutcome::Exited(0) => {
                let pipeline = Arc::clone(&self.pipeline);
                let area = self.config.output_root.clone();
                let videos_generated =
                    tokio::task::spawn_blocking(move || pipeline.count_produced_artifacts(&area))
                        .await
                        .map_err(|e| JobError::Supervisor(format!("artifact count failed: {e}")))?;
                JobOutcome::Completed { videos_generated }
            }
            ExitOutcome::Exited(code) => JobOutcome::Failed {
                error: JobError::ProcessExit { code }.to_string(),
            },
            signaled @ ExitOutcome::Signaled(_) => JobOutcome::Failed {
                error: signaled.to_string(),
            },
        };
        Ok(outcome)
    }

    /// Wait for a child whose output has closed. A cancel arriving now finds
    /// no attached process, so the job status is polled and the tree is
    /// killed here, before the child is reaped.
    async fn wait_or_terminate(
        &self,
        id: &str,
        process: &mut RunningProcess,
        handle: ProcessHandle,
    ) -> Result<ExitOutcome, JobError> {
        let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);
        loop {
            tokio::select! {
                exit = process.wait() => return exit,
                _ = ticker.tick() => {
                    let status = self.registry.update(id, |job| job.status)?;
                    if status != JobStatus::Processing {
                        terminate(id, handle).await;
                        return process.wait().await;
                    }
                }
            }
        }
    }

    /// Apply a terminal outcome and publish `job_completed` if it won.
    fn finish(&self, id: &str, outcome: JobOutcome) -> Result<bool, JobError> {
        let applied = self.registry.update(id, |job| {
            if !job.finish(outcome) {
                return None;
            }
            self.hub.publish(&job.completed_event());
            let elapsed = job
                .completed_at
                .map(|done| (done - job.started_at).num_milliseconds() as f64 / 1000.0);
            Some((job.status, job.error.clone(), elapsed))
        })?;

        let Some((status, error, elapsed)) = applied else {
            tracing::debug!(job_id = id, "Terminal transition lost the race, dropped");
            return Ok(false);
        };

        match status {
            JobStatus::Completed => tracing::info!(job_id = id, "Job completed successfully"),
            JobStatus::Failed => {
                tracing::warn!(job_id = id, error = error.as_deref().unwrap_or(""), "Job failed")
            }
            _ => {}
        }
        metrics::gauge!("reelrun_jobs_running").decrement(1.0);
        metrics::counter!("reelrun_jobs_finished_total", "status" => status.as_str()).increment(1);
        if let Some(secs) = elapsed {
            metrics::histogram!("reelrun_job_duration_seconds").record(secs);
        }
        Ok(true)
    }
}

async fn terminate(id: &str, handle: ProcessHandle) {
    let pid = handle.pid();
    match tokio::task::spawn_blocking(move || handle.terminate_tree()).await {
        Ok(report) => tracing::info!(
            job_id = id,
            pid,
            killed = report.killed.len(),
            failed = report.failed.len(),
            "Process tree terminated"
        ),
        Err(e) => tracing::error!(job_id = id, pid, "Process tree termination panicked: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ScriptPipeline;

    fn controller() -> JobController {
        JobController::new(
            ControllerConfig::new("/tmp/reelrun-unit/videos", "/tmp/reelrun-unit/logs"),
            Arc::new(ScriptPipeline::new("python", "pipeline.py")),
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = ControllerConfig::new("videos", "logs");
        assert_eq!(config.initial_progress, 10);
        assert_eq!(config.log_capacity, 1000);
        assert_eq!(config.status_log_tail, 20);
        assert_eq!(config.subscriber_capacity, DEFAULT_SUBSCRIBER_CAPACITY);
    }

    #[tokio::test]
    async fn test_subscriber_capacity_reaches_the_hub() {
        let mut config = ControllerConfig::new("/tmp/reelrun-unit/videos", "/tmp/reelrun-unit/logs");
        config.subscriber_capacity = 2;
        let controller =
            JobController::new(config, Arc::new(ScriptPipeline::new("python", "pipeline.py")));

        let _sub = controller.subscribe();
        let event = JobEvent::JobStarted {
            job_id: "j".into(),
            mode: "test".into(),
            theme: None,
        };
        assert_eq!(controller.hub().publish(&event), 1);
        // `connected` plus one event fill a two-slot channel.
        assert_eq!(controller.hub().publish(&event), 0);
        assert_eq!(controller.hub().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_mode_registers_nothing() {
        let controller = controller();
        let err = controller
            .submit(JobParams {
                mode: "turbo".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidParameter(_)));
        assert_eq!(controller.total(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let controller = controller();
        assert!(matches!(controller.status("nope"), Err(JobError::NotFound(_))));
        assert!(matches!(
            controller.cancel("nope").await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_reports_active_jobs() {
        let controller = controller();
        let mut sub = controller.subscribe();
        assert_eq!(sub.recv().await, Some(JobEvent::Connected { active_jobs: 0 }));
    }
}
