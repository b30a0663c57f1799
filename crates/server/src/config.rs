// crates/server/src/config.rs
//! Command-line / environment configuration for the server binary.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reelrun_observability::LogConfig;
use reelrun_server_jobs::{
    ControllerConfig, PipelineInvocation, ScriptPipeline, DEFAULT_SUBSCRIBER_CAPACITY,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "reelrun", version, about = "Runs the video pipeline on request and streams job progress")]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "REELRUN_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Bearer token required by the mutating endpoints.
    #[arg(long, env = "REELRUN_API_SECRET", hide_env_values = true)]
    pub api_secret: String,

    /// Program used to run the pipeline script.
    #[arg(long, env = "REELRUN_INTERPRETER", default_value = "python")]
    pub interpreter: String,

    #[arg(
        long,
        env = "REELRUN_PIPELINE_SCRIPT",
        default_value = "rocky_complete_video_pipeline.py"
    )]
    pub pipeline_script: PathBuf,

    /// Working directory for pipeline runs (defaults to the server's).
    #[arg(long, env = "REELRUN_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Root of the per-job output directories.
    #[arg(long, env = "REELRUN_VIDEOS_DIR", default_value = "data/videos")]
    pub videos_dir: PathBuf,

    /// Server log and per-job log mirrors.
    #[arg(long, env = "REELRUN_LOGS_DIR", default_value = "logs")]
    pub logs_dir: PathBuf,

    /// Output lines kept in memory per job.
    #[arg(long, env = "REELRUN_LOG_CAPACITY", default_value_t = 1000)]
    pub log_capacity: usize,

    /// Job events buffered per WebSocket or SSE client before it is
    /// disconnected as lagging.
    #[arg(long, env = "REELRUN_SUBSCRIBER_CAPACITY", default_value_t = DEFAULT_SUBSCRIBER_CAPACITY)]
    pub subscriber_capacity: usize,

    /// Self-ping interval in seconds; 0 disables.
    #[arg(long, env = "REELRUN_KEEP_ALIVE_SECS", default_value_t = 240)]
    pub keep_alive_secs: u64,

    /// Comma-separated CORS origins. Empty allows any origin.
    #[arg(long, env = "REELRUN_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Log JSON lines on the console.
    #[arg(long, env = "REELRUN_JSON_LOGS")]
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_secret.trim().is_empty() {
            anyhow::bail!("API secret must not be empty");
        }
        if self.log_capacity == 0 {
            anyhow::bail!("--log-capacity must be at least 1");
        }
        if self.subscriber_capacity == 0 {
            anyhow::bail!("--subscriber-capacity must be at least 1");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    pub fn pipeline(&self) -> Arc<dyn PipelineInvocation> {
        let mut pipeline = ScriptPipeline::new(&self.interpreter, &self.pipeline_script);
        if let Some(dir) = &self.work_dir {
            pipeline = pipeline.with_work_dir(dir);
        }
        Arc::new(pipeline)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            log_capacity: self.log_capacity,
            subscriber_capacity: self.subscriber_capacity,
            ..ControllerConfig::new(&self.videos_dir, &self.logs_dir)
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.json_logs,
            ..LogConfig::default().with_log_dir(&self.logs_dir)
        }
    }

    /// Origins with surrounding whitespace and empty entries removed.
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}
