// crates/server-process-tree/src/lib.rs
//! Process-tree inspection and termination.
//!
//! A pipeline job spawns helper tools of its own (downloaders, encoders,
//! ffmpeg), so stopping a job means stopping the whole tree rooted at the
//! spawned pid, not only the direct child.
//!
//! These functions make synchronous system calls and should be called from
//! `tokio::task::spawn_blocking` when used inside async code.

use std::collections::{HashMap, HashSet, VecDeque};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Outcome of a best-effort tree kill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    /// Pids that accepted the kill signal, in the order they were signalled.
    pub killed: Vec<u32>,
    /// Pids that were found but refused the signal (e.g. permission denied).
    pub failed: Vec<u32>,
    /// Whether the sweep of the root's process group reached any process.
    pub group_signalled: bool,
}

impl KillReport {
    /// True when every process found in the tree accepted the signal.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

fn snapshot() -> System {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    sys
}

/// Every descendant of `root` present in `sys`, parents before children.
fn collect_descendants(sys: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut seen = HashSet::from([root]);
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        let Some(kids) = children.get(&pid) else {
            continue;
        };
        for kid in kids {
            if seen.insert(*kid) {
                order.push(*kid);
                queue.push_back(*kid);
            }
        }
    }
    order
}

/// List the pids of every live descendant of `pid` (breadth-first).
///
/// Returns an empty list when `pid` does not exist or has no children.
pub fn descendants(pid: u32) -> Vec<u32> {
    let sys = snapshot();
    collect_descendants(&sys, Pid::from_u32(pid))
        .into_iter()
        .map(|p| p.as_u32())
        .collect()
}

/// Check whether `pid` refers to a running (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

/// Kill `pid` and its entire descendant tree.
///
/// Descendants are signalled deepest-first, then the root, then (on Unix) the
/// process group led by the root is swept to catch children that were
/// re-parented away from the tree. A pid that refuses the signal is recorded
/// in [`KillReport::failed`] and the remaining pids are still attempted.
pub fn kill_tree(pid: u32) -> KillReport {
    let sys = snapshot();
    let root = Pid::from_u32(pid);

    let mut targets = collect_descendants(&sys, root);
    targets.reverse();
    targets.push(root);

    let mut report = KillReport::default();
    for target in targets {
        match sys.process(target) {
            Some(process) if process.kill() => report.killed.push(target.as_u32()),
            Some(_) => {
                tracing::warn!(pid = target.as_u32(), root = pid, "Failed to kill process");
                report.failed.push(target.as_u32());
            }
            None => {
                tracing::debug!(pid = target.as_u32(), root = pid, "Process already gone");
            }
        }
    }

    #[cfg(unix)]
    {
        report.group_signalled = kill_group(pid);
    }

    tracing::debug!(
        root = pid,
        killed = report.killed.len(),
        failed = report.failed.len(),
        group_signalled = report.group_signalled,
        "Process tree kill finished"
    );
    report
}

/// SIGKILL the process group whose leader is `pgid`.
///
/// Never signals pid 0/1 or the caller's own group.
#[cfg(unix)]
fn kill_group(pgid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    if pgid <= 1 {
        return false;
    }
    // SAFETY: getpgrp has no preconditions.
    if pgid == unsafe { libc::getpgrp() } {
        return false;
    }
    // SAFETY: plain syscall on an integer id, no memory is shared.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result != 0 {
        let errno = std::io::Error::last_os_error();
        tracing::debug!(pgid, %errno, "Process group sweep reached nothing");
        return false;
    }
    true
}
