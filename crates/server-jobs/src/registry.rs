// crates/server-jobs/src/registry.rs
//! In-memory job registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::error::JobError;
use crate::process::ProcessHandle;
use crate::types::{Job, JobId, JobStatus};

#[derive(Default)]
struct Jobs {
    by_id: HashMap<JobId, Arc<Mutex<Job>>>,
    /// Insertion order, most recent last.
    order: Vec<JobId>,
}

/// Job records plus the live process handle of each running job.
///
/// Each job sits behind its own mutex. The map lock is held only to look up
/// or insert an entry, so work on one job never waits on another.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    processes: RwLock<HashMap<JobId, ProcessHandle>>,
}

fn lock_job(entry: &Mutex<Job>) -> MutexGuard<'_, Job> {
    match entry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Job mutex poisoned, recovering last written state");
            poisoned.into_inner()
        }
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job. Ids must be unique.
    pub fn create(&self, job: Job) -> Result<(), JobError> {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs map: {e}");
                return Err(JobError::Supervisor("job registry unavailable".into()));
            }
        };
        if jobs.by_id.contains_key(&job.id) {
            return Err(JobError::DuplicateId(job.id));
        }
        let id = job.id.clone();
        jobs.by_id.insert(id.clone(), Arc::new(Mutex::new(job)));
        jobs.order.push(id);
        Ok(())
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<Job>>, JobError> {
        match self.jobs.read() {
            Ok(jobs) => jobs
                .by_id
                .get(id)
                .cloned()
                .ok_or_else(|| JobError::NotFound(id.to_string())),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                Err(JobError::Supervisor("job registry unavailable".into()))
            }
        }
    }

    /// Consistent snapshot of one job.
    pub fn get(&self, id: &str) -> Result<Job, JobError> {
        let entry = self.entry(id)?;
        let job = lock_job(&entry).clone();
        Ok(job)
    }

    /// Run `f` with exclusive access to one job.
    ///
    /// `f` must not block; it runs with the job's lock held.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Job) -> R) -> Result<R, JobError> {
        let entry = self.entry(id)?;
        let mut job = lock_job(&entry);
        Ok(f(&mut job))
    }

    /// The most recent `limit` jobs in submission order (most recent last).
    pub fn list(&self, limit: usize) -> Vec<Job> {
        let entries: Vec<Arc<Mutex<Job>>> = match self.jobs.read() {
            Ok(jobs) => {
                let skip = jobs.order.len().saturating_sub(limit);
                jobs.order
                    .iter()
                    .skip(skip)
                    .filter_map(|id| jobs.by_id.get(id).cloned())
                    .collect()
            }
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                Vec::new()
            }
        };
        entries.iter().map(|entry| lock_job(entry).clone()).collect()
    }

    pub fn len(&self) -> usize {
        match self.jobs.read() {
            Ok(jobs) => jobs.order.len(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids_where(&self, pred: impl Fn(JobStatus) -> bool) -> Vec<JobId> {
        let entries: Vec<(JobId, Arc<Mutex<Job>>)> = match self.jobs.read() {
            Ok(jobs) => jobs
                .order
                .iter()
                .filter_map(|id| jobs.by_id.get(id).map(|e| (id.clone(), Arc::clone(e))))
                .collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                Vec::new()
            }
        };
        entries
            .into_iter()
            .filter(|(_, entry)| pred(lock_job(entry).status))
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of jobs not yet in a terminal status.
    pub fn active_count(&self) -> usize {
        self.ids_where(|s| !s.is_terminal()).len()
    }

    /// Ids of jobs currently `processing`.
    pub fn running_ids(&self) -> Vec<JobId> {
        self.ids_where(|s| s == JobStatus::Processing)
    }

    /// Record the live process of a job.
    pub fn attach_process(&self, id: &str, handle: ProcessHandle) -> Result<(), JobError> {
        self.entry(id)?;
        let mut processes = match self.processes.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing process map: {e}");
                return Err(JobError::Supervisor("process table unavailable".into()));
            }
        };
        if processes.contains_key(id) {
            return Err(JobError::ProcessAlreadyAttached(id.to_string()));
        }
        processes.insert(id.to_string(), handle);
        Ok(())
    }

    /// Remove and return the live process of a job, if any.
    pub fn detach_process(&self, id: &str) -> Option<ProcessHandle> {
        match self.processes.write() {
            Ok(mut processes) => processes.remove(id),
            Err(e) => {
                tracing::error!("RwLock poisoned writing process map: {e}");
                None
            }
        }
    }

    pub fn get_process(&self, id: &str) -> Result<ProcessHandle, JobError> {
        match self.processes.read() {
            Ok(processes) => processes
                .get(id)
                .copied()
                .ok_or_else(|| JobError::NotFound(id.to_string())),
            Err(e) => {
                tracing::error!("RwLock poisoned reading process map: {e}");
                Err(JobError::Supervisor("process table unavailable".into()))
            }
        }
    }
}
