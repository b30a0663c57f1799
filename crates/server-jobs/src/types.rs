// crates/server-jobs/src/types.rs
//! Types for the job core: job records, lifecycle status, and events.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a job (UUIDv4, generated at submission).
pub type JobId = String;

/// Lifecycle status of a job.
///
/// Status only moves forward: `pending -> processing -> {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a submission, passed through to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    /// `test`, `single` or `batch`.
    pub mode: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Bounded, append-only line history. Oldest lines are dropped first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines evicted because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

/// How a processing job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { videos_generated: usize },
    Failed { error: String },
    Cancelled,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// One tracked invocation of the pipeline.
///
/// Fields are public for reading snapshots; lifecycle changes go through
/// [`Job::start`], [`Job::record_line`] and [`Job::finish`], which enforce the
/// status machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub mode: String,
    pub theme: Option<String>,
    pub count: Option<u32>,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: PathBuf,
    pub logs: LogBuffer,
    pub videos_generated: usize,
    pub error: Option<String>,
}

impl Job {
    /// A fresh `pending` job.
    pub fn new(id: JobId, params: JobParams, output_path: PathBuf, log_capacity: usize) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            mode: params.mode,
            theme: params.theme,
            count: params.count,
            user_id: params.user_id,
            started_at: Utc::now(),
            completed_at: None,
            output_path,
            logs: LogBuffer::with_capacity(log_capacity),
            videos_generated: 0,
            error: None,
        }
    }

    /// Move to `processing` and raise progress to at least `floor`.
    pub fn start(&mut self, floor: u8) -> Result<(), crate::JobError> {
        if !self.status.can_transition_to(JobStatus::Processing) {
            return Err(crate::JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.status = JobStatus::Processing;
        self.progress = self.progress.max(floor.min(100));
        Ok(())
    }

    /// Append an output line and apply a classified progress value.
    ///
    /// Returns the resulting progress, or `None` if the job is no longer
    /// processing (the line is discarded).
    pub fn record_line(&mut self, line: String, update: Option<u8>) -> Option<u8> {
        if self.status != JobStatus::Processing {
            return None;
        }
        self.logs.push(line);
        if let Some(value) = update {
            self.progress = self.progress.max(value.min(100));
        }
        Some(self.progress)
    }

    /// Apply a terminal outcome. Returns `false` (and changes nothing) if the
    /// job is not in a state that may take this transition.
    pub fn finish(&mut self, outcome: JobOutcome) -> bool {
        let target = outcome.status();
        if !self.status.can_transition_to(target) {
            return false;
        }
        self.status = target;
        match outcome {
            JobOutcome::Completed { videos_generated } => {
                self.progress = 100;
                self.videos_generated = videos_generated;
            }
            JobOutcome::Failed { error } => self.error = Some(error),
            JobOutcome::Cancelled => {}
        }
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn completed_event(&self) -> JobEvent {
        JobEvent::JobCompleted {
            job_id: self.id.clone(),
            status: self.status,
            videos_generated: self.videos_generated,
            error: self.error.clone(),
        }
    }
}

/// Event delivered to subscribers, serialized as JSON tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Connected {
        active_jobs: usize,
    },
    JobStarted {
        job_id: JobId,
        mode: String,
        theme: Option<String>,
    },
    JobProgress {
        job_id: JobId,
        progress: u8,
        log: String,
    },
    JobCompleted {
        job_id: JobId,
        status: JobStatus,
        videos_generated: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Connected { .. } => None,
            Self::JobStarted { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. } => Some(job_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::JobStarted { .. } => "job_started",
            Self::JobProgress { .. } => "job_progress",
            Self::JobCompleted { .. } => "job_completed",
        }
    }
}

/// Result of a cancel request on an existing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub message: String,
}

impl CancelOutcome {
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            message: "Job cancelled".into(),
        }
    }

    pub fn not_running() -> Self {
        Self {
            cancelled: false,
            message: "Job not running".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job() -> Job {
        let params = JobParams {
            mode: "test".into(),
            ..Default::default()
        };
        Job::new("job-1".into(), params, PathBuf::from("/tmp/job-1"), 4)
    }

    #[test]
    fn test_legal_transitions_only() {
        use JobStatus::*;
        let all = [Pending, Processing, Completed, Failed, Cancelled];
        for from in all {
            for to in all {
                let legal = matches!(
                    (from, to),
                    (Pending, Processing)
                        | (Processing, Completed)
                        | (Processing, Failed)
                        | (Processing, Cancelled)
                );
                assert_eq!(from.can_transition_to(to), legal, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_start_sets_floor_and_rejects_restart() {
        let mut job = job();
        job.start(10).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 10);
        assert!(matches!(
            job.start(10),
            Err(crate::JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_progress_is_monotone() {
        let mut job = job();
        job.start(10).unwrap();
        assert_eq!(job.record_line("Downloading".into(), Some(50)), Some(50));
        assert_eq!(job.record_line("Processing".into(), Some(30)), Some(50));
        assert_eq!(job.record_line("noise".into(), None), Some(50));
        assert_eq!(job.record_line("weird".into(), Some(250)), Some(100));
    }

    #[test]
    fn test_completion_forces_full_progress() {
        let mut job = job();
        job.start(10).unwrap();
        assert!(job.finish(JobOutcome::Completed { videos_generated: 3 }));
        assert_eq!(job.progress, 100);
        assert_eq!(job.videos_generated, 3);
        assert!(job.completed_at.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_completed_at_set_once() {
        let mut job = job();
        job.start(10).unwrap();
        assert!(job.finish(JobOutcome::Cancelled));
        let first = job.completed_at;
        assert!(!job.finish(JobOutcome::Failed {
            error: "late".into()
        }));
        assert_eq!(job.completed_at, first);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_pending_job_cannot_finish() {
        let mut job = job();
        assert!(!job.finish(JobOutcome::Cancelled));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_logs_frozen_after_terminal() {
        let mut job = job();
        job.start(10).unwrap();
        job.record_line("one".into(), None);
        job.finish(JobOutcome::Failed {
            error: "Process exited with code 2".into(),
        });
        assert_eq!(job.record_line("two".into(), Some(90)), None);
        assert_eq!(job.logs.tail(10), vec!["one".to_string()]);
        assert_eq!(job.progress, 10);
    }

    #[test]
    fn test_log_buffer_evicts_oldest() {
        let mut buf = LogBuffer::with_capacity(3);
        for i in 0..5 {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.dropped(), 2);
        assert_eq!(buf.tail(2), vec!["line 3".to_string(), "line 4".to_string()]);
        assert_eq!(buf.tail(10).len(), 3);
    }

    #[test]
    fn test_event_wire_format() {
        let event = JobEvent::JobProgress {
            job_id: "abc".into(),
            progress: 50,
            log: "Downloading clip 1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "job_progress",
                "job_id": "abc",
                "progress": 50,
                "log": "Downloading clip 1"
            })
        );

        let done = JobEvent::JobCompleted {
            job_id: "abc".into(),
            status: JobStatus::Completed,
            videos_generated: 2,
            error: None,
        };
        let json = serde_json::to_string(&done).unwrap();
        assert!(json.contains("\"status\":\"completed\""));
        assert!(!json.contains("error"));
        assert_eq!(done.kind(), "job_completed");
        assert_eq!(done.job_id(), Some("abc"));
    }

    #[test]
    fn test_params_defaults_from_json() {
        let params: JobParams = serde_json::from_str(r#"{"mode":"batch"}"#).unwrap();
        assert_eq!(params.mode, "batch");
        assert!(params.theme.is_none());
        assert!(params.count.is_none());
    }
}
