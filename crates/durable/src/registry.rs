//! Hardware lease and live-session registry.
//!
//! Each physical encoder/decoder slot is one file, `slot-<n>.json`. Taking a
//! lease is an exclusive create of that file, so at most one holder per slot
//! exists across all processes. A [`LeaseGuard`] removes its file on drop,
//! which covers success, error returns, and panics. What it cannot cover,
//! a killed process, is what [`LeaseRegistry::orphans`] and
//! [`LeaseRegistry::force_reset`] are for.
//!
//! Live detection sessions are recorded the same way as
//! `session-<stream_id>.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use reelcast_common::error::{ReelError, ReelResult};
use reelcast_common::process::kill_pid;
use reelcast_job_model::{LeasePurpose, LeaseRecord, SessionRecord};

use crate::atomic::{
    create_json_exclusive, read_json, remove_if_exists, remove_if_stale, sweep_staging, STALE_STAGING,
};
use crate::owner::{process_token, OwnerTag};

const ACQUIRE_POLL: Duration = Duration::from_millis(250);

/// Result of an emergency reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// Owner processes that were sent SIGKILL.
    pub killed: Vec<u32>,
    /// Lease slots cleared.
    pub leases_cleared: Vec<u32>,
    /// Session records cleared.
    pub sessions_cleared: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LeaseRegistry {
    dir: PathBuf,
    tmp: PathBuf,
    slots: u32,
}

impl LeaseRegistry {
    /// Open (creating if needed) a registry with `slots` hardware slots.
    pub fn open(dir: impl Into<PathBuf>, slots: u32) -> ReelResult<Self> {
        let dir = dir.into();
        let tmp = dir.join(".tmp");
        fs::create_dir_all(&tmp).map_err(|e| {
            ReelError::registry(format!("Failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            tmp,
            slots: slots.max(1),
        })
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: u32) -> PathBuf {
        self.dir.join(format!("slot-{slot}.json"))
    }

    fn session_path(&self, stream_id: &str) -> PathBuf {
        let safe: String = stream_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("session-{safe}.json"))
    }

    /// Take a free slot, reclaiming slots whose owner died. `None` if every
    /// slot is held by a live owner.
    pub fn try_acquire(
        &self,
        purpose: LeasePurpose,
        session_id: &str,
    ) -> ReelResult<Option<LeaseGuard>> {
        for slot in 0..self.slots {
            let path = self.slot_path(slot);
            let record = LeaseRecord {
                lease_id: uuid::Uuid::new_v4().to_string(),
                slot,
                purpose: purpose.clone(),
                owner_pid: reelcast_common::process::current_pid(),
                owner_token: process_token().to_string(),
                session_id: session_id.to_string(),
                acquired_at: Utc::now(),
            };

            if create_json_exclusive(&self.tmp, &path, &record)? {
                tracing::debug!(slot, lease_id = %record.lease_id, purpose = ?record.purpose, "Lease acquired");
                return Ok(Some(LeaseGuard::new(path, record)));
            }

            if self.reclaim_if_orphaned(slot)? && create_json_exclusive(&self.tmp, &path, &record)? {
                tracing::debug!(slot, lease_id = %record.lease_id, "Lease acquired after reclaim");
                return Ok(Some(LeaseGuard::new(path, record)));
            }
        }
        Ok(None)
    }

    /// Like [`try_acquire`](Self::try_acquire) but fails with
    /// [`ReelError::LeaseUnavailable`] when all slots are busy.
    pub fn acquire(&self, purpose: LeasePurpose, session_id: &str) -> ReelResult<LeaseGuard> {
        self.try_acquire(purpose, session_id)?
            .ok_or(ReelError::LeaseUnavailable { slots: self.slots })
    }

    /// Poll for a free slot until `timeout`, or until `cancel` is set.
    pub fn acquire_with_timeout(
        &self,
        purpose: LeasePurpose,
        session_id: &str,
        timeout: Duration,
        cancel: Option<&AtomicBool>,
    ) -> ReelResult<LeaseGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(purpose.clone(), session_id)? {
                return Ok(guard);
            }
            if cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false) {
                return Err(ReelError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ReelError::LeaseUnavailable { slots: self.slots });
            }
            std::thread::sleep(ACQUIRE_POLL.min(deadline - now));
        }
    }

    /// Remove a slot file whose owner is dead. Returns whether it was removed.
    fn reclaim_if_orphaned(&self, slot: u32) -> ReelResult<bool> {
        let path = self.slot_path(slot);
        let record: LeaseRecord = match read_json(&path) {
            Ok(record) => record,
            Err(ReelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(ReelError::CorruptRecord { message, .. }) => {
                tracing::warn!(slot, reason = %message, "Clearing unreadable lease record");
                return remove_if_stale::<LeaseRecord, _>(&self.tmp, &path, |r| r.is_none());
            }
            Err(e) => return Err(e),
        };
        if owner_of(&record).is_alive() {
            return Ok(false);
        }
        tracing::warn!(
            slot,
            owner_pid = record.owner_pid,
            purpose = ?record.purpose,
            "Reclaiming lease from dead owner"
        );
        self.clear_orphan(&record)
    }

    /// Remove `record`'s slot file if it still holds that same dead lease.
    fn clear_orphan(&self, record: &LeaseRecord) -> ReelResult<bool> {
        remove_if_stale::<LeaseRecord, _>(&self.tmp, &self.slot_path(record.slot), |current| {
            current.is_some_and(|c| c.lease_id == record.lease_id && !owner_of(c).is_alive())
        })
    }

    /// All current lease records, ordered by slot.
    pub fn entries(&self) -> ReelResult<Vec<LeaseRecord>> {
        let mut records: Vec<LeaseRecord> = self
            .records_with_prefix("slot-")?
            .into_iter()
            .filter_map(|path| read_json(&path).ok())
            .collect();
        records.sort_by_key(|r| r.slot);
        Ok(records)
    }

    /// Leases held by processes that no longer exist.
    pub fn orphans(&self) -> ReelResult<Vec<LeaseRecord>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|r| !owner_of(r).is_alive())
            .collect())
    }

    /// Remove one slot's lease unconditionally.
    pub fn clear(&self, slot: u32) -> ReelResult<bool> {
        remove_if_exists(&self.slot_path(slot))
    }

    /// Clear orphaned leases and sessions. Idempotent.
    pub fn reconcile(&self) -> ReelResult<Vec<LeaseRecord>> {
        sweep_staging(&self.tmp, STALE_STAGING)?;
        let mut cleared = Vec::new();
        for record in self.orphans()? {
            if !self.clear_orphan(&record)? {
                tracing::debug!(slot = record.slot, "Orphaned lease was replaced, keeping slot");
                continue;
            }
            tracing::warn!(
                slot = record.slot,
                owner_pid = record.owner_pid,
                "Cleared orphaned lease"
            );
            cleared.push(record);
        }
        for session in self.sessions()? {
            if !session_owner(&session).is_alive() && self.clear_stale_session(&session.stream_id)? {
                tracing::warn!(stream_id = %session.stream_id, "Cleared stale session record");
            }
        }
        Ok(cleared)
    }

    /// Emergency reset: kill every other process holding a lease or session,
    /// then clear all records.
    pub fn force_reset(&self) -> ReelResult<ResetReport> {
        let mut report = ResetReport::default();
        let mut owners: Vec<OwnerTag> = self.entries()?.iter().map(owner_of).collect();
        let sessions = self.sessions()?;
        owners.extend(sessions.iter().map(session_owner));

        for owner in owners {
            if owner.is_current() || !owner.is_alive() || report.killed.contains(&owner.pid) {
                continue;
            }
            if kill_pid(owner.pid) {
                tracing::warn!(pid = owner.pid, "Killed lease owner");
                report.killed.push(owner.pid);
            }
        }

        for path in self.records_with_prefix("slot-")? {
            if let Ok(record) = read_json::<LeaseRecord>(&path) {
                report.leases_cleared.push(record.slot);
            }
            remove_if_exists(&path)?;
        }
        for session in sessions {
            remove_if_exists(&self.session_path(&session.stream_id))?;
            report.sessions_cleared.push(session.stream_id);
        }
        tracing::warn!(
            killed = report.killed.len(),
            leases = report.leases_cleared.len(),
            sessions = report.sessions_cleared.len(),
            "Registry force reset"
        );
        Ok(report)
    }

    /// Record a live detection session; a second live session for the same
    /// stream id is rejected.
    pub fn register_session(&self, record: SessionRecord) -> ReelResult<SessionGuard> {
        let mut record = record;
        record.owner_token = process_token().to_string();
        let path = self.session_path(&record.stream_id);

        if create_json_exclusive(&self.tmp, &path, &record)? {
            return Ok(SessionGuard { path, released: false });
        }

        let existing: Option<SessionRecord> = read_json(&path).ok();
        let stale = existing
            .as_ref()
            .map(|s| !session_owner(s).is_alive())
            .unwrap_or(true);
        if stale
            && self.clear_stale_session(&record.stream_id)?
            && create_json_exclusive(&self.tmp, &path, &record)?
        {
            tracing::warn!(stream_id = %record.stream_id, "Replaced stale session record");
            return Ok(SessionGuard { path, released: false });
        }
        Err(ReelError::registry(format!(
            "Stream {} already has an active session (pid {})",
            record.stream_id,
            existing.map(|s| s.owner_pid).unwrap_or_default()
        )))
    }

    /// Remove a session record if its owner is still dead when removed.
    fn clear_stale_session(&self, stream_id: &str) -> ReelResult<bool> {
        remove_if_stale::<SessionRecord, _>(&self.tmp, &self.session_path(stream_id), |current| {
            current.map(|s| !session_owner(s).is_alive()).unwrap_or(true)
        })
    }

    /// All recorded sessions.
    pub fn sessions(&self) -> ReelResult<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .records_with_prefix("session-")?
            .into_iter()
            .filter_map(|path| read_json(&path).ok())
            .collect();
        sessions.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        Ok(sessions)
    }

    fn records_with_prefix(&self, prefix: &str) -> ReelResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && name.ends_with(".json") {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn owner_of(record: &LeaseRecord) -> OwnerTag {
    OwnerTag::new(record.owner_pid, record.owner_token.clone())
}

fn session_owner(record: &SessionRecord) -> OwnerTag {
    OwnerTag::new(record.owner_pid, record.owner_token.clone())
}

/// Held lease. Dropping it releases the slot.
#[derive(Debug)]
pub struct LeaseGuard {
    path: PathBuf,
    record: LeaseRecord,
    released: bool,
}

impl LeaseGuard {
    fn new(path: PathBuf, record: LeaseRecord) -> Self {
        Self {
            path,
            record,
            released: false,
        }
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    pub fn slot(&self) -> u32 {
        self.record.slot
    }

    /// Release now and report any filesystem error.
    pub fn release(mut self) -> ReelResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> ReelResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        // Only remove the slot file if it is still ours; it may have been
        // cleared and re-taken by a reset in the meantime.
        match read_json::<LeaseRecord>(&self.path) {
            Ok(current) if current.lease_id != self.record.lease_id => Ok(()),
            Err(ReelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            _ => {
                remove_if_exists(&self.path)?;
                tracing::debug!(slot = self.record.slot, lease_id = %self.record.lease_id, "Lease released");
                Ok(())
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::error!(slot = self.record.slot, error = %e, "Failed to release lease");
        }
    }
}

/// Registered session. Dropping it removes the record.
#[derive(Debug)]
pub struct SessionGuard {
    path: PathBuf,
    released: bool,
}

impl SessionGuard {
    pub fn release(mut self) -> ReelResult<()> {
        self.released = true;
        remove_if_exists(&self.path).map(|_| ())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = remove_if_exists(&self.path);
        }
    }
}
