//! Conflict resolver and progress callback boundaries (§4.4, §4.8, §9).
//!
//! Both crossings are modeled as trait objects rather than concrete UI
//! references, so the engine runs headless in tests by supplying a resolver
//! that returns a fixed decision map.

use std::collections::HashMap;

use crate::conflict::Conflict;

/// A resolver's choice for a single conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    KeepLocal,
    KeepRemote,
    KeepBoth,
}

/// `resolve(conflicts) -> {conflict_key -> decision} | CANCELLED`.
///
/// Returning `None` is the resolver cancelling the sync (§4.4); a decision
/// map omitting a conflict's key is treated the same as `KeepLocal` for that
/// conflict, since keep-local is a no-op.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflicts: &[Conflict]) -> Option<HashMap<String, Decision>>;
}

/// A resolver that answers every conflict with the same fixed decision;
/// useful for batch sync and tests.
pub struct FixedResolver(pub Decision);

impl ConflictResolver for FixedResolver {
    fn resolve(&self, conflicts: &[Conflict]) -> Option<HashMap<String, Decision>> {
        Some(conflicts.iter().map(|c| (c.key(), self.0)).collect())
    }
}

/// A resolver built from an explicit per-key decision map, falling back to
/// `default` for conflicts it doesn't name.
pub struct MapResolver {
    pub decisions: HashMap<String, Decision>,
    pub default: Decision,
}

impl ConflictResolver for MapResolver {
    fn resolve(&self, conflicts: &[Conflict]) -> Option<HashMap<String, Decision>> {
        Some(
            conflicts
                .iter()
                .map(|c| {
                    let decision = self.decisions.get(&c.key()).copied().unwrap_or(self.default);
                    (c.key(), decision)
                })
                .collect(),
        )
    }
}

/// A resolver that always cancels, for testing the `CANCELLED` path.
pub struct CancellingResolver;

impl ConflictResolver for CancellingResolver {
    fn resolve(&self, _conflicts: &[Conflict]) -> Option<HashMap<String, Decision>> {
        None
    }
}

/// Progress counters carried alongside a phase message (§4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressCounts {
    pub records_total: usize,
    pub records_done: usize,
    pub collections_total: usize,
    pub collections_done: usize,
    pub artifacts_total: usize,
    pub artifacts_done: usize,
}

/// `progress(message, counts?)`.
pub trait ProgressReporter: Send + Sync {
    fn progress(&self, message: &str, counts: Option<&ProgressCounts>);
}

/// A reporter that discards every event; the default when a caller has no
/// UI to drive.
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {
    fn progress(&self, _message: &str, _counts: Option<&ProgressCounts>) {}
}

/// `log(event_tag, details)`, an optional structured trace sink the engine
/// never inspects the contents of (§6).
pub trait SyncLogger: Send + Sync {
    fn log(&self, event_tag: &str, details: &str);
}

pub struct NullSyncLogger;

impl SyncLogger for NullSyncLogger {
    fn log(&self, _event_tag: &str, _details: &str) {}
}
