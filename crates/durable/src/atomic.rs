//! Atomic JSON file primitives.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use reelcast_common::error::{ReelError, ReelResult};

fn staging_path(tmp_dir: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    tmp_dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Write `value` to `target` via a temp file in `tmp_dir` and a rename.
///
/// `tmp_dir` must be on the same filesystem as `target`.
pub fn write_json_atomic<T: Serialize>(tmp_dir: &Path, target: &Path, value: &T) -> ReelResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let staging = staging_path(tmp_dir, target);
    if let Err(e) = write_synced(&staging, &json) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    fs::rename(&staging, target).map_err(|e| {
        let _ = fs::remove_file(&staging);
        e
    })?;
    Ok(())
}

/// Create `target` holding `value` only if it does not exist yet.
///
/// The record is fully written to a temp file and then hard-linked into
/// place, so the exclusive create and the content appear together. Returns
/// `Ok(false)` if `target` already exists.
pub fn create_json_exclusive<T: Serialize>(
    tmp_dir: &Path,
    target: &Path,
    value: &T,
) -> ReelResult<bool> {
    let json = serde_json::to_vec_pretty(value)?;
    let staging = staging_path(tmp_dir, target);
    write_synced(&staging, &json)?;
    let linked = fs::hard_link(&staging, target);
    let _ = fs::remove_file(&staging);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read a JSON record. Parse failures become [`ReelError::CorruptRecord`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ReelResult<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| ReelError::CorruptRecord {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Staging files older than this are leftovers of a crashed writer.
pub const STALE_STAGING: Duration = Duration::from_secs(300);

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> ReelResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove `path` only if the record it holds is still judged stale.
///
/// The file is first renamed aside into `tmp_dir`, so the record checked is
/// the record removed; a record replaced after the caller's earlier read is
/// linked back into place instead. `is_stale` sees `None` for a corrupt
/// record. Returns `Ok(true)` when `path` no longer holds a stale record
/// (removed here or already gone).
pub fn remove_if_stale<T, F>(tmp_dir: &Path, path: &Path, is_stale: F) -> ReelResult<bool>
where
    T: DeserializeOwned,
    F: FnOnce(Option<&T>) -> bool,
{
    let aside = staging_path(tmp_dir, path);
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }

    let record = match read_json::<T>(&aside) {
        Ok(record) => Some(record),
        Err(ReelError::CorruptRecord { .. }) => None,
        Err(e) => {
            restore(&aside, path);
            return Err(e);
        }
    };
    if is_stale(record.as_ref()) {
        fs::remove_file(&aside)?;
        return Ok(true);
    }
    restore(&aside, path);
    Ok(false)
}

fn restore(aside: &Path, path: &Path) {
    if let Err(e) = fs::hard_link(aside, path) {
        tracing::warn!(path = %path.display(), error = %e, "Could not restore live record");
    }
    let _ = fs::remove_file(aside);
}

/// Delete leftover staging files (from a crash mid-write) older than
/// `min_age`. Younger files may belong to a write in progress.
pub fn sweep_staging(tmp_dir: &Path, min_age: Duration) -> ReelResult<usize> {
    let mut removed = 0;
    let entries = match fs::read_dir(tmp_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(".tmp") {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .unwrap_or_default();
        if age >= min_age && remove_if_exists(&entry.path())? {
            removed += 1;
        }
    }
    Ok(removed)
}
