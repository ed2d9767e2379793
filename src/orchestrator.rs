//! Orchestrator: composes §4.1–§4.7 into a single `sync()` call (§4.8).
//!
//! Only lock contention and lock I/O failures abort the sync outright
//! (§7's propagation policy); every other failure is recorded in
//! `SyncResult.errors` and the sync continues to the next step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{info, info_span, warn};

use crate::config::SyncConfig;
use crate::conflict::{self, Conflict, ConflictKind};
use crate::error::{EngineResult, SyncError};
use crate::lock;
use crate::matcher::{self, Matches};
use crate::models::Record;
use crate::propagate::{artifacts, collections, records};
use crate::resolver::{ConflictResolver, Decision, ProgressCounts, ProgressReporter, SyncLogger};
use crate::store::ReplicaStore;

/// Accumulated outcome of a `sync()` call (§4.8's `SyncResult`).
#[derive(Debug, Default)]
pub struct SyncResult {
    pub records_added: usize,
    pub records_updated: usize,
    pub collections_added: usize,
    pub collections_updated: usize,
    pub artifacts_copied: usize,
    pub artifacts_updated: usize,
    /// Non-empty only when no resolver was supplied and conflicts exist.
    pub conflicts: Vec<Conflict>,
    pub detailed_changes: Vec<String>,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl SyncResult {
    fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    fn total_changes(&self) -> usize {
        self.records_added
            + self.records_updated
            + self.collections_added
            + self.collections_updated
            + self.artifacts_copied
            + self.artifacts_updated
    }

    /// One-line human summary (§4.8).
    pub fn get_summary(&self) -> String {
        if self.cancelled {
            return "Sync operation was cancelled by user".to_string();
        }
        if self.has_conflicts() {
            return format!(
                "Sync completed with {} conflicts that need resolution",
                self.conflicts.len()
            );
        }
        if self.total_changes() == 0 {
            return "No changes to sync - local and remote are already in sync".to_string();
        }

        let mut parts = Vec::new();
        if self.records_added > 0 {
            parts.push(format!("{} records added", self.records_added));
        }
        if self.records_updated > 0 {
            parts.push(format!("{} records updated", self.records_updated));
        }
        if self.collections_added > 0 {
            parts.push(format!("{} collections added", self.collections_added));
        }
        if self.collections_updated > 0 {
            parts.push(format!("{} collections updated", self.collections_updated));
        }
        if self.artifacts_copied > 0 {
            parts.push(format!("{} artifacts copied", self.artifacts_copied));
        }
        if self.artifacts_updated > 0 {
            parts.push(format!("{} artifacts updated", self.artifacts_updated));
        }
        format!("Sync completed: {}", parts.join(", "))
    }
}

pub struct Orchestrator {
    local_dir: PathBuf,
    remote_dir: PathBuf,
    config: SyncConfig,
}

impl Orchestrator {
    pub fn new(
        local_dir: impl Into<PathBuf>,
        remote_dir: impl Into<PathBuf>,
        config: SyncConfig,
    ) -> Self {
        Self {
            local_dir: local_dir.into(),
            remote_dir: remote_dir.into(),
            config,
        }
    }

    fn local_db_path(&self) -> PathBuf {
        self.local_dir.join("papers.db")
    }
    fn remote_db_path(&self) -> PathBuf {
        self.remote_dir.join("papers.db")
    }
    fn local_artifact_dir(&self) -> PathBuf {
        self.local_dir.join("pdfs")
    }
    fn remote_artifact_dir(&self) -> PathBuf {
        self.remote_dir.join("pdfs")
    }

    /// Emits the phase-transition event the §4.8 progress contract names,
    /// both to the host's `progress` callback and as a `tracing::info!`
    /// event for operators (§11): the callback and the span are layered,
    /// not a choice between them.
    fn report(&self, progress: &dyn ProgressReporter, message: &str, counts: Option<&ProgressCounts>) {
        info!(phase = message, "sync phase transition");
        progress.progress(message, counts);
    }

    /// Runs the seven phases of §2 to completion, releasing locks
    /// unconditionally even on error. Only `BusyLock`/`LockAcquisition`
    /// (phase 1) abort with `Err`; every later failure is folded into the
    /// returned `SyncResult.errors`.
    ///
    /// `auto_sync_mode` mirrors the source's unfinished deletion-propagation
    /// flag (§9 "Deletion semantics"): when set, the engine only logs that
    /// deletion-handling would occur here. It never deletes a record,
    /// association or artifact in either replica.
    pub async fn sync(
        &self,
        auto_sync_mode: bool,
        resolver: Option<&dyn ConflictResolver>,
        progress: &dyn ProgressReporter,
        logger: &dyn SyncLogger,
    ) -> EngineResult<SyncResult> {
        let span = info_span!("sync", local = %self.local_dir.display(), remote = %self.remote_dir.display());
        let _enter = span.enter();

        let guard = lock::acquire(&self.local_dir, &self.remote_dir, self.config.stale_lock_seconds)?;
        let result = self.sync_locked(auto_sync_mode, resolver, progress, logger).await;
        guard.release();
        Ok(result)
    }

    async fn sync_locked(
        &self,
        auto_sync_mode: bool,
        resolver: Option<&dyn ConflictResolver>,
        progress: &dyn ProgressReporter,
        logger: &dyn SyncLogger,
    ) -> SyncResult {
        let mut result = SyncResult::default();

        if auto_sync_mode {
            logger.log(
                "auto_sync_deletions_skipped",
                "auto_sync_mode requested deletion propagation, which this engine does not perform",
            );
        }

        self.report(progress, "creating-remote-dir", None);
        if let Err(e) = std::fs::create_dir_all(&self.remote_dir)
            .and_then(|_| std::fs::create_dir_all(self.remote_artifact_dir()))
        {
            result.errors.push(format!("sync failed: could not create remote directory: {e}"));
            return result;
        }

        self.report(progress, "checking-remote-db", None);
        if !self.remote_db_path().exists() {
            self.bootstrap_clone(&mut result, progress, logger).await;
            return result;
        }

        let Some(local_store) = self.open_store(&self.local_db_path(), &mut result).await else {
            return result;
        };
        let Some(remote_store) = self.open_store(&self.remote_db_path(), &mut result).await else {
            return result;
        };

        self.report(progress, "detecting-conflicts", None);
        let (local_records, remote_records) = match (
            local_store.fetch_records().await,
            remote_store.fetch_records().await,
        ) {
            (Ok(l), Ok(r)) => (l, r),
            (Err(e), _) | (_, Err(e)) => {
                result.errors.push(format!("sync failed: {e}"));
                return result;
            }
        };

        let matches = matcher::find_matches(
            &local_records,
            &remote_records,
            &self.local_artifact_dir(),
            &self.remote_artifact_dir(),
            &self.config,
        );
        let conflicts = conflict::detect(
            &local_records,
            &remote_records,
            &matches,
            &self.local_artifact_dir(),
            &self.remote_artifact_dir(),
        );

        if !conflicts.is_empty() {
            logger.log("sync_conflicts", &format!("detected {} conflicts", conflicts.len()));

            match resolver {
                Some(resolver) => {
                    self.report(progress, "resolving-conflicts", None);
                    match resolver.resolve(&conflicts) {
                        None => {
                            result.cancelled = true;
                            logger.log("sync_cancelled", "sync cancelled during conflict resolution");
                            return result;
                        }
                        Some(decisions) => {
                            self.apply_resolutions(&local_store, &conflicts, &decisions, &mut result)
                                .await;
                        }
                    }
                }
                None => {
                    logger.log(
                        "sync_conflicts_unresolved",
                        &format!("{} unresolved conflicts", conflicts.len()),
                    );
                    result.conflicts = conflicts;
                    return result;
                }
            }
        } else {
            logger.log("sync_no_conflicts", "no conflicts detected");
        }

        let counts = ProgressCounts {
            records_total: local_records.len().max(remote_records.len()),
            collections_total: local_store.count_collections().await.unwrap_or(0).max(
                remote_store.count_collections().await.unwrap_or(0),
            ) as usize,
            ..Default::default()
        };

        self.report(progress, "syncing-records", Some(&counts));
        self.sync_records(
            &local_store,
            &remote_store,
            &local_records,
            &remote_records,
            &matches,
            &mut result,
            logger,
        )
        .await;

        self.report(
            progress,
            "syncing-collections",
            Some(&ProgressCounts {
                records_done: counts.records_total,
                ..counts
            }),
        );
        self.sync_collections(&local_store, &remote_store, &mut result, logger).await;

        self.report(
            progress,
            "syncing-artifacts",
            Some(&ProgressCounts {
                records_done: counts.records_total,
                collections_done: counts.collections_total,
                ..counts
            }),
        );
        self.sync_artifacts(&mut result, logger);

        self.report(progress, "complete", None);
        logger.log("sync_complete", &result.get_summary());
        result
    }

    async fn open_store(&self, path: &Path, result: &mut SyncResult) -> Option<ReplicaStore> {
        match ReplicaStore::open(path).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(?path, error = %e, "failed to open replica store");
                result.errors.push(format!("sync failed: could not open {}: {e}", path.display()));
                None
            }
        }
    }

    async fn bootstrap_clone(
        &self,
        result: &mut SyncResult,
        progress: &dyn ProgressReporter,
        logger: &dyn SyncLogger,
    ) {
        // Bootstrap clones the whole database in one shot, so there is no
        // separate matching/conflict/collections phase to report; emit the
        // canonical tags that do apply rather than inventing new ones, so a
        // progress bar keyed on the §4.8 contract doesn't stall waiting for
        // a tag this path will never send.
        self.report(progress, "syncing-records", None);
        if let Err(e) = std::fs::copy(self.local_db_path(), self.remote_db_path()) {
            result.errors.push(format!("sync failed: could not clone local database: {e}"));
            return;
        }

        if let Some(remote_store) = self.open_store(&self.remote_db_path(), result).await {
            result.records_added = remote_store.count_records().await.unwrap_or(0) as usize;
            result.collections_added = remote_store.count_collections().await.unwrap_or(0) as usize;
        }

        logger.log(
            "sync_initial",
            &format!(
                "created initial remote database with {} records and {} collections",
                result.records_added, result.collections_added
            ),
        );

        self.report(progress, "syncing-artifacts", None);
        match artifacts::mirror_missing(&self.local_artifact_dir(), &self.remote_artifact_dir()) {
            Ok(copied) => result.artifacts_copied = copied,
            Err(e) => {
                warn!(error = %e, "artifact bootstrap copy failed");
                result.errors.push(format!("artifact bootstrap copy failed: {e}"));
            }
        }

        self.report(progress, "complete", None);
        logger.log("sync_complete", &result.get_summary());
    }

    async fn apply_resolutions(
        &self,
        local_store: &ReplicaStore,
        conflicts: &[Conflict],
        decisions: &HashMap<String, Decision>,
        result: &mut SyncResult,
    ) {
        for conflict in conflicts {
            let decision = decisions.get(&conflict.key()).copied().unwrap_or(Decision::KeepLocal);
            match decision {
                Decision::KeepLocal => {}
                Decision::KeepRemote => self.apply_keep_remote(local_store, conflict, result).await,
                Decision::KeepBoth => self.apply_keep_both(local_store, conflict, result).await,
            }
        }
    }

    async fn apply_keep_remote(&self, local_store: &ReplicaStore, conflict: &Conflict, result: &mut SyncResult) {
        match conflict.kind {
            ConflictKind::Record => {
                let Some(remote) = &conflict.remote_record else { return };
                match records::apply_remote_version(local_store, remote).await {
                    Ok(true) => {
                        result.records_updated += 1;
                        result.detailed_changes.push(format!("'{}' (from remote)", remote.title));
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(title = %remote.title, error = %e, "record update failed");
                        result.errors.push(format!("record update failed: {e}"));
                    }
                }
            }
            ConflictKind::Artifact => match artifacts::overwrite_with_remote(
                &self.local_artifact_dir(),
                &self.remote_artifact_dir(),
                &conflict.item_id,
            ) {
                Ok(()) => result.artifacts_updated += 1,
                Err(e) => {
                    warn!(file = %conflict.item_id, error = %e, "artifact overwrite failed");
                    result.errors.push(format!("artifact overwrite failed: {e}"));
                }
            },
        }
    }

    async fn apply_keep_both(&self, local_store: &ReplicaStore, conflict: &Conflict, result: &mut SyncResult) {
        match conflict.kind {
            ConflictKind::Record => {
                let Some(remote) = &conflict.remote_record else { return };
                match records::copy_as_duplicate(local_store, remote).await {
                    Ok(_) => {
                        result.records_added += 1;
                        result
                            .detailed_changes
                            .push(format!("'{} (Remote Version)' (kept both versions)", remote.title));
                    }
                    Err(e) => {
                        warn!(title = %remote.title, error = %e, "duplicate record copy failed");
                        result.errors.push(format!("duplicate record copy failed: {e}"));
                    }
                }
            }
            ConflictKind::Artifact => match artifacts::copy_as_duplicate(
                &self.local_artifact_dir(),
                &self.remote_artifact_dir(),
                &conflict.item_id,
            ) {
                Ok(_) => result.artifacts_copied += 1,
                Err(e) => {
                    warn!(file = %conflict.item_id, error = %e, "duplicate artifact copy failed");
                    result.errors.push(format!("duplicate artifact copy failed: {e}"));
                }
            },
        }
    }

    /// Propagates every record left unmatched in `matches`.
    ///
    /// `local_records`/`remote_records` MUST be the snapshot fetched before
    /// conflict resolution ran, not a fresh re-query: `apply_resolutions`
    /// may have inserted a brand-new `keep_both` duplicate into
    /// `local_store` with an id that was never part of `matches`, and a
    /// fresh fetch would wrongly treat that duplicate as local-only-new and
    /// copy it to the opposite replica a second time.
    async fn sync_records(
        &self,
        local_store: &ReplicaStore,
        remote_store: &ReplicaStore,
        local_records: &[Record],
        remote_records: &[Record],
        matches: &Matches,
        result: &mut SyncResult,
        logger: &dyn SyncLogger,
    ) {
        let matched_local: std::collections::HashSet<i64> = matches.keys().copied().collect();
        let matched_remote: std::collections::HashSet<i64> = matches.values().copied().collect();

        // Each unmatched record's copy is an independent step (§5); run the
        // batch concurrently rather than one record at a time.
        let to_remote: Vec<&Record> = local_records.iter().filter(|r| !matched_local.contains(&r.id)).collect();
        let to_remote_outcomes =
            join_all(to_remote.iter().map(|record| records::copy_record(remote_store, record))).await;
        for (record, outcome) in to_remote.into_iter().zip(to_remote_outcomes) {
            match outcome {
                Ok(_) => {
                    result.records_added += 1;
                    result.detailed_changes.push(format!("'{}'", record.title));
                    logger.log("record_added_remote", &format!("added '{}' to remote", record.title));
                }
                Err(e) => {
                    warn!(title = %record.title, error = %e, "failed to copy record to remote");
                    result.errors.push(format!("failed to copy '{}' to remote: {e}", record.title));
                }
            }
        }

        let to_local: Vec<&Record> = remote_records.iter().filter(|r| !matched_remote.contains(&r.id)).collect();
        let to_local_outcomes =
            join_all(to_local.iter().map(|record| records::copy_record(local_store, record))).await;
        for (record, outcome) in to_local.into_iter().zip(to_local_outcomes) {
            match outcome {
                Ok(_) => {
                    result.records_added += 1;
                    result.detailed_changes.push(format!("'{}' (from remote)", record.title));
                    logger.log("record_added_local", &format!("added '{}' to local", record.title));
                }
                Err(e) => {
                    warn!(title = %record.title, error = %e, "failed to copy record to local");
                    result.errors.push(format!("failed to copy '{}' to local: {e}", record.title));
                }
            }
        }
    }

    async fn sync_collections(
        &self,
        local_store: &ReplicaStore,
        remote_store: &ReplicaStore,
        result: &mut SyncResult,
        logger: &dyn SyncLogger,
    ) {
        let local_collections = match local_store.fetch_collections().await {
            Ok(c) => c,
            Err(e) => {
                result.errors.push(format!("failed to read local collections: {e}"));
                return;
            }
        };
        let remote_collections = match remote_store.fetch_collections().await {
            Ok(c) => c,
            Err(e) => {
                result.errors.push(format!("failed to read remote collections: {e}"));
                return;
            }
        };

        let local_names: std::collections::HashSet<&str> =
            local_collections.iter().map(|c| c.name.as_str()).collect();
        let remote_names: std::collections::HashSet<&str> =
            remote_collections.iter().map(|c| c.name.as_str()).collect();

        for collection in local_collections.iter().filter(|c| !remote_names.contains(c.name.as_str())) {
            match collections::copy_collection(remote_store, collection).await {
                Ok(new_id) => {
                    result.collections_added += 1;
                    result.detailed_changes.push(format!("'{}'", collection.name));
                    logger.log("collection_added_remote", &format!("added '{}' to remote", collection.name));
                    if let Ok(titles) = local_store.collection_record_titles(collection.id).await {
                        if let Err(e) = collections::sync_memberships(remote_store, new_id, titles).await {
                            warn!(collection = %collection.name, error = %e, "failed to sync membership to remote");
                            result.errors.push(format!(
                                "failed to sync membership for collection '{}': {e}",
                                collection.name
                            ));
                        }
                    }
                }
                Err(e) => {
                    warn!(collection = %collection.name, error = %e, "failed to copy collection to remote");
                    result.errors.push(format!("failed to copy collection '{}': {e}", collection.name));
                }
            }
        }

        for collection in remote_collections.iter().filter(|c| !local_names.contains(c.name.as_str())) {
            match collections::copy_collection(local_store, collection).await {
                Ok(new_id) => {
                    result.collections_added += 1;
                    result.detailed_changes.push(format!("'{}' (from remote)", collection.name));
                    logger.log("collection_added_local", &format!("added '{}' to local", collection.name));
                    if let Ok(titles) = remote_store.collection_record_titles(collection.id).await {
                        if let Err(e) = collections::sync_memberships(local_store, new_id, titles).await {
                            warn!(collection = %collection.name, error = %e, "failed to sync membership to local");
                            result.errors.push(format!(
                                "failed to sync membership for collection '{}': {e}",
                                collection.name
                            ));
                        }
                    }
                }
                Err(e) => {
                    warn!(collection = %collection.name, error = %e, "failed to copy collection to local");
                    result.errors.push(format!("failed to copy collection '{}': {e}", collection.name));
                }
            }
        }

        for collection in local_collections.iter().filter(|c| remote_names.contains(c.name.as_str())) {
            let Some(remote) = remote_collections.iter().find(|r| r.name == collection.name) else {
                continue;
            };
            if let (Ok(local_titles), Ok(remote_titles)) = (
                local_store.collection_record_titles(collection.id).await,
                remote_store.collection_record_titles(remote.id).await,
            ) {
                let local_only: Vec<String> = local_titles.difference(&remote_titles).cloned().collect();
                let remote_only: Vec<String> = remote_titles.difference(&local_titles).cloned().collect();
                if let Err(e) = collections::sync_memberships(remote_store, remote.id, local_only).await {
                    warn!(collection = %collection.name, error = %e, "failed to sync membership to remote");
                    result.errors.push(format!(
                        "failed to sync membership for collection '{}': {e}",
                        collection.name
                    ));
                }
                if let Err(e) = collections::sync_memberships(local_store, collection.id, remote_only).await {
                    warn!(collection = %collection.name, error = %e, "failed to sync membership to local");
                    result.errors.push(format!(
                        "failed to sync membership for collection '{}': {e}",
                        collection.name
                    ));
                }
            }
        }
    }

    fn sync_artifacts(&self, result: &mut SyncResult, logger: &dyn SyncLogger) {
        match artifacts::mirror_missing(&self.local_artifact_dir(), &self.remote_artifact_dir()) {
            Ok(n) => {
                result.artifacts_copied += n;
                if n > 0 {
                    logger.log("artifacts_copied_remote", &format!("copied {n} artifacts to remote"));
                }
            }
            Err(e) => {
                warn!(error = %e, "artifact sync to remote failed");
                result.errors.push(format!("artifact sync to remote failed: {e}"));
            }
        }
        match artifacts::mirror_missing(&self.remote_artifact_dir(), &self.local_artifact_dir()) {
            Ok(n) => {
                result.artifacts_copied += n;
                if n > 0 {
                    logger.log("artifacts_copied_local", &format!("copied {n} artifacts to local"));
                }
            }
            Err(e) => {
                warn!(error = %e, "artifact sync to local failed");
                result.errors.push(format!("artifact sync to local failed: {e}"));
            }
        }
    }
}
