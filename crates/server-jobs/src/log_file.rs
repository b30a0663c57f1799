// crates/server-jobs/src/log_file.rs
//! Per-job on-disk mirror of the pipeline output (`<logs_dir>/job_<id>.log`).

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

pub struct JobLogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JobLogFile {
    pub fn path_for(logs_dir: &Path, job_id: &str) -> PathBuf {
        logs_dir.join(format!("job_{job_id}.log"))
    }

    /// Create (or truncate) the log file for `job_id`.
    pub async fn create(logs_dir: &Path, job_id: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(logs_dir).await?;
        let path = Self::path_for(logs_dir, job_id);
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let mut log = JobLogFile::create(&logs, "abc").await.unwrap();
        log.write_line("Processing").await.unwrap();
        log.write_line("Downloading").await.unwrap();
        log.flush().await.unwrap();

        assert_eq!(log.path(), logs.join("job_abc.log"));
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "Processing\nDownloading\n");
    }
}
