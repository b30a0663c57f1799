// crates/server-jobs/src/error.rs
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Errors raised by the job core.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Duplicate job id: {0}")]
    DuplicateId(JobId),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with code {code}")]
    ProcessExit { code: i32 },

    #[error("Job {0} already has a live process attached")]
    ProcessAlreadyAttached(JobId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job supervisor failed: {0}")]
    Supervisor(String),
}

impl JobError {
    /// True for errors caused by the caller's request rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidParameter(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_exit_message() {
        let err = JobError::ProcessExit { code: 2 };
        assert_eq!(err.to_string(), "Process exited with code 2");
    }

    #[test]
    fn test_transition_message_uses_wire_names() {
        let err = JobError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> processing"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(JobError::NotFound("x".into()).is_client_error());
        assert!(JobError::InvalidParameter("Invalid mode".into()).is_client_error());
        assert!(!JobError::Supervisor("boom".into()).is_client_error());
    }
}
