//! Error taxonomy for the sync engine (§7 of the design).
//!
//! Only [`SyncError::BusyLock`] and [`SyncError::LockAcquisition`] abort a
//! sync outright; every other path is folded into `SyncResult.errors` by the
//! orchestrator instead of being propagated with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync already in progress (pid {holder_pid} on {holder_hostname})")]
    BusyLock {
        holder_pid: i64,
        holder_hostname: String,
    },

    #[error("failed to acquire sync lock: {0}")]
    LockAcquisition(#[source] std::io::Error),

    #[error("propagation step failed: {0}")]
    DatabaseStep(#[source] sqlx::Error),

    #[error("artifact copy failed: {0}")]
    ArtifactCopy(#[source] std::io::Error),

    #[error("sync cancelled by resolver")]
    Cancelled,
}

/// Short-hand for engine operations that can only fail in ways that abort
/// the sync outright. Not to be confused with [`crate::orchestrator::SyncResult`],
/// the accumulated outcome of a full `sync()` call.
pub type EngineResult<T> = std::result::Result<T, SyncError>;
