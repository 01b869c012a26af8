//! Durable directory-of-files job queue.
//!
//! # Layout
//!
//! ```text
//! <root>/pending/<job_id>.json                claimable
//! <root>/processing/<job_id>@<owner>.json     claimed by <pid>-<token>
//! <root>/done/<job_id>.json                   finished
//! <root>/errors/<job_id>.json                 failed, with diagnostic
//! <root>/errors/<file>.corrupt                quarantined unreadable record
//! <root>/tmp/                                 staging for atomic writes
//! ```
//!
//! The directory listing is the queue state; there is no index. Claiming is
//! a single `rename` out of `pending/`, so concurrent claimers in any number
//! of processes can never both win the same job.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use reelcast_common::error::{ReelError, ReelResult};
use reelcast_job_model::{validate_job_id, Job, JobStatus};

use crate::atomic::{create_json_exclusive, read_json, remove_if_exists, sweep_staging, STALE_STAGING, write_json_atomic};
use crate::owner::OwnerTag;

const RECORD_EXT: &str = "json";
const QUARANTINE_EXT: &str = "corrupt";

/// Outcome handed to [`FileJobQueue::complete`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Succeeded { output: PathBuf },
    Failed { diagnostic: String },
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
    pub quarantined: usize,
}

/// What a recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs returned from a dead owner to `pending`.
    pub requeued: Vec<String>,
    /// Interrupted completions whose processing entry was removed.
    pub finalized: Vec<String>,
    /// Processing entries whose owner is still alive.
    pub still_owned: usize,
    pub quarantined: usize,
    pub staging_swept: usize,
}

#[derive(Debug, Clone)]
pub struct FileJobQueue {
    root: PathBuf,
    pending: PathBuf,
    processing: PathBuf,
    done: PathBuf,
    errors: PathBuf,
    tmp: PathBuf,
}

impl FileJobQueue {
    /// Open (creating if needed) the queue rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> ReelResult<Self> {
        let root = root.into();
        let queue = Self {
            pending: root.join("pending"),
            processing: root.join("processing"),
            done: root.join("done"),
            errors: root.join("errors"),
            tmp: root.join("tmp"),
            root,
        };
        for dir in [
            &queue.pending,
            &queue.processing,
            &queue.done,
            &queue.errors,
            &queue.tmp,
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                ReelError::queue(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(queue)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn errors_dir(&self) -> &Path {
        &self.errors
    }

    fn record_name(job_id: &str) -> String {
        format!("{job_id}.{RECORD_EXT}")
    }

    fn processing_path(&self, job_id: &str, owner: &OwnerTag) -> PathBuf {
        self.processing.join(format!("{job_id}@{owner}.{RECORD_EXT}"))
    }

    /// Add a job. The record appears in `pending/` fully written or not at all.
    pub fn enqueue(&self, job: &Job) -> ReelResult<()> {
        validate_job_id(&job.job_id).map_err(|e| ReelError::queue(e.to_string()))?;
        if self.status(&job.job_id)?.is_some() {
            return Err(ReelError::queue(format!("Duplicate job id {}", job.job_id)));
        }

        let mut record = job.clone();
        record.status = JobStatus::Pending;
        let target = self.pending.join(Self::record_name(&record.job_id));
        if !create_json_exclusive(&self.tmp, &target, &record)? {
            return Err(ReelError::queue(format!("Duplicate job id {}", job.job_id)));
        }

        tracing::info!(
            job_id = %record.job_id,
            kind = ?record.kind,
            orientation = record.orientation.as_str(),
            clip = %record.source_clip_path.display(),
            "Job enqueued"
        );
        Ok(())
    }

    /// Claim the oldest pending job (ties broken by job id).
    pub fn claim(&self) -> ReelResult<Option<Job>> {
        let owner = OwnerTag::current();
        for (mut job, path) in self.pending_in_order()? {
            let target = self.processing_path(&job.job_id, &owner);
            match fs::rename(&path, &target) {
                Ok(()) => {
                    job.status = JobStatus::Processing;
                    write_json_atomic(&self.tmp, &target, &job)?;
                    tracing::info!(job_id = %job.job_id, owner = %owner, "Job claimed");
                    return Ok(Some(job));
                }
                // Another worker won this one.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Move a claimed job to `done/` or `errors/`.
    pub fn complete(&self, job_id: &str, completion: Completion) -> ReelResult<Job> {
        let (path, _owner) = self
            .find_processing(job_id)?
            .ok_or_else(|| ReelError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let mut job = self.read_or_quarantine(&path)?;

        job.finished_at = Some(Utc::now());
        let target = match completion {
            Completion::Succeeded { output } => {
                job.status = JobStatus::Done;
                job.output_path = Some(output);
                self.done.join(Self::record_name(job_id))
            }
            Completion::Failed { diagnostic } => {
                job.status = JobStatus::Failed;
                job.diagnostic = Some(diagnostic);
                self.errors.join(Self::record_name(job_id))
            }
        };

        // Terminal record first: a crash before the removal is finished by
        // `recover`, never requeued.
        write_json_atomic(&self.tmp, &target, &job)?;
        remove_if_exists(&path)?;

        match job.status {
            JobStatus::Done => tracing::info!(job_id, "Job done"),
            _ => tracing::warn!(
                job_id,
                diagnostic = job.diagnostic.as_deref().unwrap_or(""),
                "Job failed"
            ),
        }
        Ok(job)
    }

    /// Return a claimed job to `pending/` (graceful shutdown mid-render).
    pub fn requeue(&self, job_id: &str) -> ReelResult<Job> {
        let (path, _owner) = self
            .find_processing(job_id)?
            .ok_or_else(|| ReelError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let job = self.return_to_pending(&path)?;
        tracing::info!(job_id, "Job requeued");
        Ok(job)
    }

    fn return_to_pending(&self, processing_path: &Path) -> ReelResult<Job> {
        let mut job = self.read_or_quarantine(processing_path)?;
        job.status = JobStatus::Pending;
        write_json_atomic(&self.tmp, &self.pending.join(Self::record_name(&job.job_id)), &job)?;
        remove_if_exists(processing_path)?;
        Ok(job)
    }

    /// Requeue jobs whose owner died and finish interrupted completions.
    ///
    /// Idempotent; safe to run from several processes at once. An orphan is
    /// first re-claimed by renaming it to our own owner tag, so only one
    /// recoverer requeues it.
    pub fn recover(&self) -> ReelResult<RecoveryReport> {
        let mut report = RecoveryReport {
            staging_swept: sweep_staging(&self.tmp, STALE_STAGING)?,
            ..RecoveryReport::default()
        };
        let me = OwnerTag::current();

        for path in list_with_ext(&self.processing, RECORD_EXT)? {
            let Some((job_id, owner)) = parse_processing_name(&path) else {
                self.quarantine(&path, "unrecognized processing entry name");
                report.quarantined += 1;
                continue;
            };

            if self.done.join(Self::record_name(&job_id)).exists()
                || self.errors.join(Self::record_name(&job_id)).exists()
            {
                remove_if_exists(&path)?;
                report.finalized.push(job_id);
                continue;
            }

            if owner.is_alive() {
                report.still_owned += 1;
                continue;
            }

            let mine = self.processing_path(&job_id, &me);
            match fs::rename(&path, &mine) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            match self.return_to_pending(&mine) {
                Ok(_) => {
                    tracing::warn!(job_id = %job_id, dead_owner = %owner, "Requeued orphaned job");
                    report.requeued.push(job_id);
                }
                Err(ReelError::CorruptRecord { .. }) => report.quarantined += 1,
                Err(e) => return Err(e),
            }
        }

        if !report.requeued.is_empty() || !report.finalized.is_empty() || report.quarantined > 0 {
            tracing::info!(
                requeued = report.requeued.len(),
                finalized = report.finalized.len(),
                quarantined = report.quarantined,
                "Queue recovery complete"
            );
        }
        Ok(report)
    }

    /// Current state of a job, from the directory it lives in.
    pub fn status(&self, job_id: &str) -> ReelResult<Option<JobStatus>> {
        Ok(self.locate(job_id)?.map(|(status, _)| status))
    }

    /// Read a job record wherever it currently lives.
    pub fn get(&self, job_id: &str) -> ReelResult<Option<Job>> {
        match self.locate(job_id)? {
            Some((status, path)) => {
                let mut job: Job = read_json(&path)?;
                job.status = status;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    fn locate(&self, job_id: &str) -> ReelResult<Option<(JobStatus, PathBuf)>> {
        validate_job_id(job_id).map_err(|e| ReelError::queue(e.to_string()))?;
        let name = Self::record_name(job_id);
        for (status, dir) in [
            (JobStatus::Pending, &self.pending),
            (JobStatus::Done, &self.done),
            (JobStatus::Failed, &self.errors),
        ] {
            let path = dir.join(&name);
            if path.exists() {
                return Ok(Some((status, path)));
            }
        }
        Ok(self
            .find_processing(job_id)?
            .map(|(path, _)| (JobStatus::Processing, path)))
    }

    /// Count jobs per state. Directory reads only.
    pub fn depth(&self) -> ReelResult<QueueDepth> {
        Ok(QueueDepth {
            pending: list_with_ext(&self.pending, RECORD_EXT)?.len(),
            processing: list_with_ext(&self.processing, RECORD_EXT)?.len(),
            done: list_with_ext(&self.done, RECORD_EXT)?.len(),
            failed: list_with_ext(&self.errors, RECORD_EXT)?.len(),
            quarantined: list_with_ext(&self.errors, QUARANTINE_EXT)?.len(),
        })
    }

    /// Records in one state, oldest first. Unreadable records are skipped.
    pub fn list(&self, status: JobStatus) -> ReelResult<Vec<Job>> {
        let dir = match status {
            JobStatus::Pending => &self.pending,
            JobStatus::Processing => &self.processing,
            JobStatus::Done => &self.done,
            JobStatus::Failed => &self.errors,
        };
        let mut jobs: Vec<Job> = list_with_ext(dir, RECORD_EXT)?
            .iter()
            .filter_map(|path| match read_json::<Job>(path) {
                Ok(mut job) => {
                    job.status = status;
                    Some(job)
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable record");
                    None
                }
            })
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(jobs)
    }

    fn pending_in_order(&self) -> ReelResult<Vec<(Job, PathBuf)>> {
        let mut jobs = Vec::new();
        for path in list_with_ext(&self.pending, RECORD_EXT)? {
            let job: Job = match read_json(&path) {
                Ok(job) => job,
                Err(ReelError::CorruptRecord { message, .. }) => {
                    self.quarantine(&path, &message);
                    continue;
                }
                Err(ReelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if job.job_id != stem {
                self.quarantine(&path, &format!("record id {} does not match file name", job.job_id));
                continue;
            }
            jobs.push((job, path));
        }
        jobs.sort_by(|(a, _), (b, _)| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(jobs)
    }

    fn find_processing(&self, job_id: &str) -> ReelResult<Option<(PathBuf, OwnerTag)>> {
        for path in list_with_ext(&self.processing, RECORD_EXT)? {
            if let Some((id, owner)) = parse_processing_name(&path) {
                if id == job_id {
                    return Ok(Some((path, owner)));
                }
            }
        }
        Ok(None)
    }

    fn read_or_quarantine(&self, path: &Path) -> ReelResult<Job> {
        match read_json(path) {
            Ok(job) => Ok(job),
            Err(ReelError::CorruptRecord { path, message }) => {
                self.quarantine(&path, &message);
                Err(ReelError::CorruptRecord { path, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Move an unreadable record into the error store. Never fails the caller.
    fn quarantine(&self, path: &Path, reason: &str) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "record".to_string());
        let target = self.errors.join(format!("{name}.{QUARANTINE_EXT}"));
        match fs::rename(path, &target) {
            Ok(()) => tracing::warn!(
                path = %path.display(),
                quarantine = %target.display(),
                reason,
                "Quarantined corrupt job record"
            ),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to quarantine record"),
        }
    }
}

/// Split `<job_id>@<pid>-<token>.json`.
fn parse_processing_name(path: &Path) -> Option<(String, OwnerTag)> {
    let stem = path.file_stem()?.to_str()?;
    let (job_id, owner) = stem.split_once('@')?;
    validate_job_id(job_id).ok()?;
    Some((job_id.to_string(), OwnerTag::parse(owner)?))
}

/// Regular files in `dir` with the given extension, sorted by name.
fn list_with_ext(dir: &Path, ext: &str) -> ReelResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reelcast_common::process::current_pid;
    use reelcast_job_model::{BrandingProfile, Orientation};

    fn queue() -> (tempfile::TempDir, FileJobQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = FileJobQueue::open(dir.path().join("queue")).unwrap();
        (dir, queue)
    }

    fn job(id: &str, age_secs: i64) -> Job {
        let mut job = Job::manual(
            format!("/clips/{id}.mp4"),
            "final",
            Some(Orientation::Standard),
            BrandingProfile::default(),
        );
        job.job_id = id.to_string();
        job.created_at = Utc::now() - Duration::seconds(age_secs);
        job
    }

    #[test]
    fn test_enqueue_claim_complete_success() {
        let (_dir, q) = queue();
        q.enqueue(&job("a", 0)).unwrap();
        assert_eq!(q.status("a").unwrap(), Some(JobStatus::Pending));

        let claimed = q.claim().unwrap().unwrap();
        assert_eq!(claimed.job_id, "a");
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(q.status("a").unwrap(), Some(JobStatus::Processing));
        assert!(q.claim().unwrap().is_none());

        let done = q
            .complete(
                "a",
                Completion::Succeeded {
                    output: PathBuf::from("/out/final_a.mp4"),
                },
            )
            .unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.finished_at.is_some());
        assert_eq!(q.status("a").unwrap(), Some(JobStatus::Done));
        assert_eq!(
            q.get("a").unwrap().unwrap().output_path,
            Some(PathBuf::from("/out/final_a.mp4"))
        );
    }

    #[test]
    fn test_failure_lands_in_error_store_with_diagnostic() {
        let (_dir, q) = queue();
        q.enqueue(&job("b", 0)).unwrap();
        q.claim().unwrap();
        q.complete(
            "b",
            Completion::Failed {
                diagnostic: "encoder exploded".to_string(),
            },
        )
        .unwrap();

        let failed = q.get("b").unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.diagnostic.as_deref(), Some("encoder exploded"));
        assert_eq!(q.depth().unwrap().failed, 1);
    }

    #[test]
    fn test_claim_oldest_first_then_id() {
        let (_dir, q) = queue();
        q.enqueue(&job("young", 1)).unwrap();
        q.enqueue(&job("old", 100)).unwrap();
        let tie_a = job("tie-a", 50);
        let mut tie_b = job("tie-b", 50);
        tie_b.created_at = tie_a.created_at;
        q.enqueue(&tie_b).unwrap();
        q.enqueue(&tie_a).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| q.claim().unwrap())
            .map(|j| j.job_id)
            .collect();
        assert_eq!(order, vec!["old", "tie-a", "tie-b", "young"]);
    }

    #[test]
    fn test_duplicate_and_invalid_ids_rejected() {
        let (_dir, q) = queue();
        q.enqueue(&job("dup", 0)).unwrap();
        assert!(q.enqueue(&job("dup", 0)).is_err());
        assert!(q.enqueue(&job("../escape", 0)).is_err());
    }

    #[test]
    fn test_corrupt_record_quarantined_and_queue_continues() {
        let (_dir, q) = queue();
        fs::write(q.root().join("pending").join("broken.json"), b"{\"job_id\":").unwrap();
        q.enqueue(&job("good", 0)).unwrap();

        let claimed = q.claim().unwrap().unwrap();
        assert_eq!(claimed.job_id, "good");
        assert!(q.errors_dir().join("broken.json.corrupt").exists());
        assert_eq!(q.depth().unwrap().quarantined, 1);
    }

    #[test]
    fn test_mismatched_file_name_quarantined() {
        let (_dir, q) = queue();
        let record = job("inner", 0);
        fs::write(
            q.root().join("pending").join("outer.json"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
        assert!(q.claim().unwrap().is_none());
        assert!(q.errors_dir().join("outer.json.corrupt").exists());
    }

    #[test]
    fn test_recover_requeues_dead_owner_exactly_once() {
        let (_dir, q) = queue();
        let mut record = job("orphan", 0);
        record.status = JobStatus::Processing;
        // Same pid, different token: a previous incarnation of this process.
        let dead = OwnerTag::new(current_pid(), "0ldpr0c");
        fs::write(
            q.processing_path("orphan", &dead),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        let report = q.recover().unwrap();
        assert_eq!(report.requeued, vec!["orphan".to_string()]);
        assert_eq!(q.status("orphan").unwrap(), Some(JobStatus::Pending));

        let again = q.recover().unwrap();
        assert!(again.requeued.is_empty());
        assert_eq!(q.depth().unwrap().pending, 1);
        assert_eq!(q.depth().unwrap().processing, 0);
    }

    #[test]
    fn test_recover_leaves_live_owner_alone() {
        let (_dir, q) = queue();
        q.enqueue(&job("mine", 0)).unwrap();
        q.claim().unwrap();
        let report = q.recover().unwrap();
        assert_eq!(report.still_owned, 1);
        assert_eq!(q.status("mine").unwrap(), Some(JobStatus::Processing));
    }

    #[test]
    fn test_recover_finishes_interrupted_completion() {
        let (_dir, q) = queue();
        q.enqueue(&job("half", 0)).unwrap();
        let claimed = q.claim().unwrap().unwrap();
        // Crash after the terminal record was written but before cleanup.
        let mut done = claimed.clone();
        done.status = JobStatus::Done;
        fs::write(
            q.root().join("done").join("half.json"),
            serde_json::to_vec(&done).unwrap(),
        )
        .unwrap();

        let report = q.recover().unwrap();
        assert_eq!(report.finalized, vec!["half".to_string()]);
        assert_eq!(q.status("half").unwrap(), Some(JobStatus::Done));
        assert_eq!(q.depth().unwrap().processing, 0);
    }

    #[test]
    fn test_requeue_returns_claimed_job() {
        let (_dir, q) = queue();
        q.enqueue(&job("r", 0)).unwrap();
        q.claim().unwrap();
        let job = q.requeue("r").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(q.claim().unwrap().unwrap().job_id, "r");
    }

    #[test]
    fn test_complete_unknown_job() {
        let (_dir, q) = queue();
        let err = q
            .complete(
                "ghost",
                Completion::Failed {
                    diagnostic: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ReelError::JobNotFound { .. }));
    }
}
