//! Advisory cross-process lock manager (§4.1).
//!
//! Unlike an OS-level flock, the lock artifact is a plain JSON file the
//! engine reads and writes cooperatively; only processes that go through
//! this module respect it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineResult, SyncError};

const LOCK_FILE_NAME: &str = ".papercli_sync.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    process_id: i64,
    hostname: String,
    timestamp: DateTime<Utc>,
}

/// A held pair of locks, one per replica directory. Release is best-effort
/// and happens on drop so a caller that forgets to call [`LockGuard::release`]
/// still clears the lock files.
pub struct LockGuard {
    local_lock: PathBuf,
    remote_lock: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Removes both lock artifacts. Idempotent; I/O failures are swallowed
    /// per §4.1's failure model (release can never corrupt state since the
    /// artifacts are advisory).
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        let _ = fs::remove_file(&self.local_lock);
        let _ = fs::remove_file(&self.remote_lock);
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Acquires the advisory sync lock on both replica directories, or reports
/// who's holding it.
///
/// Steps per §4.1: for each side, in a stable order (local then remote),
/// read any existing lock artifact, reclaim it if stale or orphaned, and
/// abort with `BusyLock` (rolling back any lock already written on the
/// other side) if a live owner is still holding it.
pub fn acquire(local_dir: &Path, remote_dir: &Path, stale_lock_seconds: i64) -> EngineResult<LockGuard> {
    fs::create_dir_all(local_dir).map_err(SyncError::LockAcquisition)?;
    fs::create_dir_all(remote_dir).map_err(SyncError::LockAcquisition)?;

    let local_lock = local_dir.join(LOCK_FILE_NAME);
    let remote_lock = remote_dir.join(LOCK_FILE_NAME);

    for path in [&local_lock, &remote_lock] {
        if let Some(holder) = check_existing_lock(path, stale_lock_seconds) {
            info!(
                pid = holder.process_id,
                hostname = %holder.hostname,
                "sync lock busy, losing the race"
            );
            return Err(SyncError::BusyLock {
                holder_pid: holder.process_id,
                holder_hostname: holder.hostname,
            });
        }
    }

    let info = LockInfo {
        process_id: std::process::id() as i64,
        hostname: hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string()),
        timestamp: Utc::now(),
    };
    let payload = serde_json::to_vec(&info).map_err(|e| {
        SyncError::LockAcquisition(std::io::Error::new(std::io::ErrorKind::Other, e))
    })?;

    if let Err(e) = fs::write(&local_lock, &payload) {
        return Err(SyncError::LockAcquisition(e));
    }
    if let Err(e) = fs::write(&remote_lock, &payload) {
        let _ = fs::remove_file(&local_lock);
        return Err(SyncError::LockAcquisition(e));
    }

    info!(pid = info.process_id, "acquired sync lock on both replicas");
    Ok(LockGuard {
        local_lock,
        remote_lock,
        released: false,
    })
}

/// Returns `Some(holder)` if `path` names a live, non-stale lock; otherwise
/// reclaims it (removing the file) and returns `None`.
fn check_existing_lock(path: &Path, stale_lock_seconds: i64) -> Option<LockInfo> {
    let contents = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return None,
    };

    let info: LockInfo = match serde_json::from_slice(&contents) {
        Ok(info) => info,
        Err(_) => {
            warn!(?path, "malformed lock artifact, treating as stale");
            let _ = fs::remove_file(path);
            return None;
        }
    };

    let age = (Utc::now() - info.timestamp).num_seconds();
    if age > stale_lock_seconds {
        info!(?path, age, "reclaiming stale lock");
        let _ = fs::remove_file(path);
        return None;
    }

    if is_process_alive(info.process_id) {
        Some(info)
    } else {
        info!(?path, pid = info.process_id, "lock owner no longer running, reclaiming");
        let _ = fs::remove_file(path);
        None
    }
}

/// Checks whether `pid` still names a live process.
///
/// Per the design notes, "unable to check" is treated as "assume alive" to
/// avoid wrongly stealing a live lock.
#[cfg(unix)]
fn is_process_alive(pid: i64) -> bool {
    if pid <= 0 {
        return true;
    }
    // SAFETY: signal 0 sends no actual signal, it only probes existence.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        true
    } else {
        let err = std::io::Error::last_os_error();
        !matches!(err.raw_os_error(), Some(libc::ESRCH))
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: i64) -> bool {
    true
}
