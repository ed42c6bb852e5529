//! Storage collaborator for jobs, steps and attempts.
//!
//! The [`Store`] trait decouples the orchestrator from durable storage.
//! Implementations must make each call atomic for a single job; the
//! orchestrator serializes calls per job within a process, and
//! [`Store::lock_job`] extends that across processes sharing the store.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tracing::warn;

use crate::core::types::{Attempt, Job, Step};

/// Exclusive hold on one job for the lifetime of the value.
///
/// Lock-file backed leases remove their file on drop.
#[derive(Debug, Default)]
pub struct JobLease {
    path: Option<PathBuf>,
}

impl JobLease {
    /// A lease with nothing to release.
    pub fn in_process() -> Self {
        Self::default()
    }

    pub fn lock_file(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if let Err(err) = fs::remove_file(&path) {
            warn!(path = %path.display(), err = %err, "failed to release job lock");
        }
    }
}

pub trait Store: Send + Sync {
    /// Insert a new job; fails if the id is taken.
    fn create_job(&self, job: &Job) -> Result<()>;
    fn get_job(&self, job_id: &str) -> Result<Option<Job>>;
    /// Overwrite an existing job.
    fn save_job(&self, job: &Job) -> Result<()>;
    /// All jobs, oldest first.
    fn list_jobs(&self) -> Result<Vec<Job>>;
    /// Steps of the current plan, in plan order.
    fn list_steps(&self, job_id: &str) -> Result<Vec<Step>>;
    /// Make `steps` the job's plan and save `job`, whose `step_order` lists
    /// them, as one unit. Readers see the old plan or the new one, never a mix.
    fn replace_steps(&self, job: &Job, steps: &[Step]) -> Result<()>;
    /// Overwrite one existing step, matched by `step_id`.
    fn update_step(&self, job_id: &str, step: &Step) -> Result<()>;
    fn append_attempt(&self, attempt: &Attempt) -> Result<()>;
    /// Attempts in insertion order, optionally limited to one step.
    fn list_attempts(&self, job_id: &str, step_id: Option<&str>) -> Result<Vec<Attempt>>;

    /// Exclude other processes from mutating the job until the lease drops.
    fn lock_job(&self, _job_id: &str) -> Result<JobLease> {
        Ok(JobLease::in_process())
    }

    fn count_rejected_attempts(&self, job_id: &str, step_id: &str) -> Result<u32> {
        let count = self
            .list_attempts(job_id, Some(step_id))?
            .iter()
            .filter(|a| a.is_rejected())
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: BTreeMap<String, Job>,
    steps: HashMap<String, Vec<Step>>,
    attempts: HashMap<String, Vec<Attempt>>,
}

/// Process-local store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.job_id) {
            return Err(anyhow!("job {} already exists", job.job_id));
        }
        state.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.state.lock().jobs.get(job_id).cloned())
    }

    fn save_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        match state.jobs.get_mut(&job.job_id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(anyhow!("job {} does not exist", job.job_id)),
        }
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.state.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    fn list_steps(&self, job_id: &str) -> Result<Vec<Step>> {
        Ok(self
            .state
            .lock()
            .steps
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_steps(&self, job: &Job, steps: &[Step]) -> Result<()> {
        let mut state = self.state.lock();
        let Some(existing) = state.jobs.get_mut(&job.job_id) else {
            return Err(anyhow!("job {} does not exist", job.job_id));
        };
        *existing = job.clone();
        state.steps.insert(job.job_id.clone(), steps.to_vec());
        Ok(())
    }

    fn update_step(&self, job_id: &str, step: &Step) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .steps
            .get_mut(job_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.step_id == step.step_id))
            .ok_or_else(|| anyhow!("step {} not found in job {job_id}", step.step_id))?;
        *slot = step.clone();
        Ok(())
    }

    fn append_attempt(&self, attempt: &Attempt) -> Result<()> {
        self.state
            .lock()
            .attempts
            .entry(attempt.job_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    fn list_attempts(&self, job_id: &str, step_id: Option<&str>) -> Result<Vec<Attempt>> {
        let state = self.state.lock();
        let attempts = state.attempts.get(job_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(attempts
            .iter()
            .filter(|a| step_id.is_none_or(|id| a.step_id == id))
            .cloned()
            .collect())
    }
}
