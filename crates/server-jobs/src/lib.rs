// crates/server-jobs/src/lib.rs
//! Job execution and notification core.
//!
//! Provides:
//! - `JobController` - drives a pipeline job from submission to a terminal status
//! - `JobRegistry` - in-memory job records and live process handles
//! - `NotificationHub` - fan-out of `JobEvent`s to live subscribers
//! - `ProgressClassifier` - maps a pipeline output line to a progress percentage
//! - `RunningProcess` / `ProcessHandle` - one supervised external command
//! - `PipelineInvocation` - how a job's parameters become a command line

pub mod classifier;
pub mod controller;
pub mod error;
pub mod hub;
pub mod log_file;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod types;

pub use classifier::{ProgressClassifier, ProgressRule};
pub use controller::{ControllerConfig, JobController};
pub use error::JobError;
pub use hub::{NotificationHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use pipeline::{PipelineInvocation, ScriptPipeline};
pub use process::{CommandSpec, ExitOutcome, ProcessHandle, RunningProcess};
pub use registry::JobRegistry;
pub use types::{CancelOutcome, Job, JobEvent, JobId, JobOutcome, JobParams, JobStatus, LogBuffer};
