use std::env;

/// Engine-wide algorithm constants and deployment knobs.
///
/// The two replica directories are not part of this struct — they are call
/// parameters to [`crate::orchestrator::Orchestrator::new`], not environment
/// configuration, since the engine is a library its host drives directly.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Seconds after which an unreclaimed lock artifact is considered stale.
    pub stale_lock_seconds: i64,
    /// Minimum similarity score for the matcher to accept a pairing.
    pub match_threshold: f64,
    /// Minimum word-overlap ratio for a fuzzy title match to count at all.
    pub title_overlap_floor: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_lock_seconds: 1800,
            match_threshold: 0.8,
            title_overlap_floor: 0.7,
        }
    }
}

impl SyncConfig {
    /// Builds a config from the default constants, with `stale_lock_seconds`
    /// overridable via `SYNC_STALE_LOCK_SECONDS`. The matcher thresholds are
    /// algorithm constants, not deployment knobs, and stay fixed.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stale_lock_seconds: env::var("SYNC_STALE_LOCK_SECONDS")
                .unwrap_or_else(|_| defaults.stale_lock_seconds.to_string())
                .parse()
                .unwrap_or(defaults.stale_lock_seconds),
            ..defaults
        }
    }
}
