// crates/server-jobs/src/process.rs
//! Supervision of one external command.
//!
//! stdout and stderr share one OS pipe, so the caller sees a single line
//! stream in the exact order the child wrote it, while the child is still
//! running.

use std::fmt;
use std::io;
#[cfg(unix)]
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use reelrun_server_process_tree::{kill_tree, KillReport};
#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
#[cfg(unix)]
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::JobError;

const LINE_CHANNEL_CAPACITY: usize = 256;

/// A concrete command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Cheap, copyable reference to a spawned process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the process and every descendant. Blocking; see
    /// [`reelrun_server_process_tree::kill_tree`].
    pub fn terminate_tree(&self) -> KillReport {
        kill_tree(self.pid)
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Exited(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "Process exited with code {code}"),
            Self::Signaled(signal) => write!(f, "Process terminated by signal {signal}"),
        }
    }
}

/// A spawned child with its merged output stream.
pub struct RunningProcess {
    child: Child,
    handle: ProcessHandle,
    lines: mpsc::Receiver<io::Result<String>>,
}

impl RunningProcess {
    /// Spawn `spec` with stdin closed and both output streams captured on
    /// one pipe.
    ///
    /// On Unix the child leads its own process group so the whole tree can
    /// be swept on termination.
    pub fn spawn(spec: &CommandSpec) -> Result<Self, JobError> {
        let (reader, writer) = io::pipe()?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer.try_clone()?))
            .stderr(Stdio::from(writer))
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let spawned = cmd.spawn();
        // `cmd` owns the parent's copies of the write end; the reader only
        // sees EOF once they are closed.
        drop(cmd);
        let child = spawned.map_err(|source| JobError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child
            .id()
            .ok_or_else(|| JobError::Supervisor("spawned process has no pid".into()))?;

        let (tx, lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        spawn_reader(reader, tx)?;

        tracing::debug!(pid, command = %spec, "Spawned process");
        Ok(Self {
            child,
            handle: ProcessHandle::new(pid),
            lines,
        })
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    /// Next output line, or `None` once every writer has closed the pipe.
    pub async fn next_line(&mut self) -> Result<Option<String>, JobError> {
        match self.lines.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(JobError::Io(e)),
            None => Ok(None),
        }
    }

    /// Wait for the child to exit.
    pub async fn wait(&mut self) -> Result<ExitOutcome, JobError> {
        let status = self.child.wait().await?;
        Ok(ExitOutcome::from_status(status))
    }
}

#[cfg(unix)]
fn spawn_reader(
    reader: io::PipeReader,
    tx: mpsc::Sender<io::Result<String>>,
) -> Result<(), JobError> {
    let output = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    tokio::spawn(pump_lines(output, tx));
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reader(
    reader: io::PipeReader,
    tx: mpsc::Sender<io::Result<String>>,
) -> Result<(), JobError> {
    use std::io::BufRead;

    tokio::task::spawn_blocking(move || {
        let mut reader = std::io::BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                    if tx.blocking_send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    Ok(())
}

#[cfg(unix)]
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                if tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
