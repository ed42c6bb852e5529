//! JSON-file store under `.stepgate/jobs/`.
//!
//! Layout per job:
//!
//! ```text
//! jobs/<job_id>/job.json        # whole job, rewritten atomically
//! jobs/<job_id>/steps.json      # every step the job has had, rewritten atomically
//! jobs/<job_id>/attempts.jsonl  # one attempt per line, append-only
//! jobs/<job_id>/job.lock        # present while a process mutates the job
//! ```
//!
//! `job.json`'s `step_order` selects the current plan out of `steps.json`.
//! A re-plan writes the new steps before the job, so a reader (or a crash)
//! between the two writes still sees the old plan whole.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::core::types::{Attempt, Job, Step};
use crate::io::store::{JobLease, Store};

const JOB_FILE: &str = "job.json";
const STEPS_FILE: &str = "steps.json";
const ATTEMPTS_FILE: &str = "attempts.jsonl";
const LOCK_FILE: &str = "job.lock";

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(120);
const LOCK_POLL: Duration = Duration::from_millis(25);
/// Lock files older than this were left behind by a process that died.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct FileStore {
    jobs_dir: PathBuf,
    lock_wait: Duration,
}

impl FileStore {
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// How long [`Store::lock_job`] waits for another process to let go.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn job_dir(&self, job_id: &str) -> Result<PathBuf> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow!("invalid job id {job_id:?}"));
        }
        Ok(self.jobs_dir.join(job_id))
    }

    /// Current and retired steps, in the order they were stored.
    fn all_steps(&self, job_id: &str) -> Result<Vec<Step>> {
        let path = self.job_dir(job_id)?.join(STEPS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }
}

impl Store for FileStore {
    fn create_job(&self, job: &Job) -> Result<()> {
        let dir = self.job_dir(&job.job_id)?;
        if dir.join(JOB_FILE).exists() {
            return Err(anyhow!("job {} already exists", job.job_id));
        }
        write_json(&dir.join(JOB_FILE), job)?;
        write_json(&dir.join(STEPS_FILE), &Vec::<Step>::new())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let path = self.job_dir(job_id)?.join(JOB_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn save_job(&self, job: &Job) -> Result<()> {
        let path = self.job_dir(&job.job_id)?.join(JOB_FILE);
        if !path.exists() {
            return Err(anyhow!("job {} does not exist", job.job_id));
        }
        write_json(&path, job)
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        if !self.jobs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut jobs = Vec::new();
        let entries = fs::read_dir(&self.jobs_dir)
            .with_context(|| format!("read jobs dir {}", self.jobs_dir.display()))?;
        for entry in entries {
            let entry = entry.context("read jobs dir entry")?;
            let path = entry.path().join(JOB_FILE);
            if !path.is_file() {
                continue;
            }
            match read_json::<Job>(&path) {
                Ok(job) => jobs.push(job),
                Err(err) => warn!(path = %path.display(), err = %err, "skipping unreadable job"),
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    fn list_steps(&self, job_id: &str) -> Result<Vec<Step>> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(Vec::new());
        };
        let mut all = self.all_steps(job_id)?;
        let mut steps = Vec::with_capacity(job.step_order.len());
        for step_id in &job.step_order {
            match all.iter().position(|s| &s.step_id == step_id) {
                Some(idx) => steps.push(all.swap_remove(idx)),
                None => warn!(job_id, step_id = %step_id, "step in step_order missing from steps.json"),
            }
        }
        Ok(steps)
    }

    fn replace_steps(&self, job: &Job, steps: &[Step]) -> Result<()> {
        let dir = self.job_dir(&job.job_id)?;
        if !dir.join(JOB_FILE).exists() {
            return Err(anyhow!("job {} does not exist", job.job_id));
        }
        let incoming: HashSet<&str> = steps.iter().map(|s| s.step_id.as_str()).collect();
        let mut stored = self.all_steps(&job.job_id)?;
        stored.retain(|s| !incoming.contains(s.step_id.as_str()));
        stored.extend_from_slice(steps);
        write_json(&dir.join(STEPS_FILE), &stored)?;
        write_json(&dir.join(JOB_FILE), job)
    }

    fn update_step(&self, job_id: &str, step: &Step) -> Result<()> {
        let mut steps = self.all_steps(job_id)?;
        let slot = steps
            .iter_mut()
            .find(|s| s.step_id == step.step_id)
            .ok_or_else(|| anyhow!("step {} not found in job {job_id}", step.step_id))?;
        *slot = step.clone();
        write_json(&self.job_dir(job_id)?.join(STEPS_FILE), &steps)
    }

    fn lock_job(&self, job_id: &str) -> Result<JobLease> {
        let path = self.job_dir(job_id)?.join(LOCK_FILE);
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let lease = JobLease::lock_file(path.clone());
                    let holder = serde_json::json!({
                        "pid": std::process::id(),
                        "acquired_at": Utc::now().to_rfc3339(),
                    });
                    writeln!(file, "{holder}")
                        .with_context(|| format!("write lock {}", path.display()))?;
                    debug!(job_id, "job lock acquired");
                    return Ok(lease);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!(path = %path.display(), "removing stale job lock");
                        if let Err(err) = fs::remove_file(&path) {
                            debug!(err = %err, "stale lock already gone");
                        }
                        continue;
                    }
                    if Instant::now() >= deadline {
                        bail!(
                            "job {job_id} is locked by another process ({}); delete the file if no stepgate process is running",
                            path.display()
                        );
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create lock {}", path.display()));
                }
            }
        }
    }

    fn append_attempt(&self, attempt: &Attempt) -> Result<()> {
        let dir = self.job_dir(&attempt.job_id)?;
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let path = dir.join(ATTEMPTS_FILE);
        let mut line = serde_json::to_string(attempt).context("serialize attempt")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append attempt {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync {}", path.display()))?;
        debug!(attempt_id = %attempt.attempt_id, "attempt appended");
        Ok(())
    }

    fn list_attempts(&self, job_id: &str, step_id: Option<&str>) -> Result<Vec<Attempt>> {
        let path = self.job_dir(job_id)?.join(ATTEMPTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut attempts = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let attempt: Attempt = serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))?;
            if step_id.is_none_or(|id| attempt.step_id == id) {
                attempts.push(attempt);
            }
        }
        Ok(attempts)
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AFTER)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write JSON to disk (temp file + rename).
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attempt, job_with_steps, step};

    fn store() -> (tempfile::TempDir, FileStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path().join("jobs"));
        (temp, store)
    }

    #[test]
    fn job_and_steps_survive_reopen() {
        let (temp, store) = store();
        let (job, steps) = job_with_steps(2);
        store.create_job(&job).expect("create");
        store.replace_steps(&job, &steps).expect("replace");

        let reopened = FileStore::new(temp.path().join("jobs"));
        assert_eq!(reopened.get_job(&job.job_id).expect("get"), Some(job.clone()));
        assert_eq!(reopened.list_steps(&job.job_id).expect("steps"), steps);
        assert_eq!(reopened.list_jobs().expect("jobs").len(), 1);
    }

    #[test]
    fn attempts_append_as_json_lines() {
        let (_temp, store) = store();
        let (job, _) = job_with_steps(1);
        store.create_job(&job).expect("create");
        store.append_attempt(&attempt(&job.job_id, "S1", false)).expect("append");
        store.append_attempt(&attempt(&job.job_id, "S1", true)).expect("append");

        let path = store.jobs_dir().join(&job.job_id).join(ATTEMPTS_FILE);
        let contents = fs::read_to_string(path).expect("read");
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(store.count_rejected_attempts(&job.job_id, "S1").expect("count"), 1);
    }

    #[test]
    fn rejects_path_like_job_ids() {
        let (_temp, store) = store();
        assert!(store.get_job("../escape").is_err());
        assert!(store.get_job("").is_err());
    }

    #[test]
    fn save_requires_existing_job() {
        let (_temp, store) = store();
        let (job, _) = job_with_steps(1);
        assert!(store.save_job(&job).is_err());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (_temp, store) = store();
        let (job, steps) = job_with_steps(1);
        store.create_job(&job).expect("create");
        store.replace_steps(&job, &steps).expect("replace");
        let leftovers: Vec<_> = fs::read_dir(store.jobs_dir().join(&job.job_id))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn replan_keeps_old_plan_visible_until_job_is_written() {
        let (_temp, store) = store();
        let (mut job, steps) = job_with_steps(2);
        store.create_job(&job).expect("create");
        store.replace_steps(&job, &steps).expect("replace");
        let before = job.clone();

        let mut next = step("S3", 0);
        next.title = "Replanned".to_string();
        job.install_plan(vec!["S3".to_string()], 4);
        store.replace_steps(&job, &[next]).expect("replan");
        let current = store.list_steps(&job.job_id).expect("steps");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].title, "Replanned");

        // A crash after the steps write and before the job write.
        store.save_job(&before).expect("save");
        let ids: Vec<String> = store
            .list_steps(&job.job_id)
            .expect("steps")
            .into_iter()
            .map(|s| s.step_id)
            .collect();
        assert_eq!(ids, vec!["S1", "S2"]);
    }

    #[test]
    fn lock_excludes_until_released() {
        let (_temp, store) = store();
        let store = store.with_lock_wait(Duration::from_millis(50));
        let (job, _) = job_with_steps(1);
        store.create_job(&job).expect("create");

        let lease = store.lock_job(&job.job_id).expect("lock");
        let lock_path = store.jobs_dir().join(&job.job_id).join(LOCK_FILE);
        assert!(lock_path.exists());
        let err = store.lock_job(&job.job_id).expect_err("held");
        assert!(err.to_string().contains("locked by another process"));

        drop(lease);
        assert!(!lock_path.exists());
        store.lock_job(&job.job_id).expect("relock");
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let (_temp, store) = store();
        let store = store.with_lock_wait(Duration::from_millis(50));
        let (job, _) = job_with_steps(1);
        store.create_job(&job).expect("create");

        let lock_path = store.jobs_dir().join(&job.job_id).join(LOCK_FILE);
        let file = fs::File::create(&lock_path).expect("create lock");
        let old = std::time::SystemTime::now() - STALE_LOCK_AFTER - Duration::from_secs(60);
        file.set_modified(old).expect("backdate");
        drop(file);

        let _lease = store.lock_job(&job.job_id).expect("take over");
    }
}
