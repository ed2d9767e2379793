//! End-to-end sync scenarios (§8 of the design: bootstrap clone, DOI
//! matching, fuzzy title matching, conflict resolution, artifact dedup).

use std::collections::HashMap;
use std::fs;

use tempfile::TempDir;

use refsync_core::models::{Collection, Record};
use refsync_core::resolver::{
    Decision, FixedResolver, MapResolver, NullProgressReporter, NullSyncLogger,
};
use refsync_core::store::{self, ReplicaStore};
use refsync_core::{Orchestrator, SyncConfig};

/// Surfaces the orchestrator's `info_span!("sync", ...)` and phase events
/// (§11) on the test writer; harmless to call more than once per process.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn bare_record(title: &str) -> Record {
    Record {
        id: 0,
        title: title.to_string(),
        abstract_text: None,
        venue_full: None,
        venue_acronym: None,
        year: None,
        volume: None,
        issue: None,
        pages: None,
        paper_type: None,
        doi: None,
        preprint_id: None,
        category: None,
        url: None,
        notes: None,
        artifact_ref: None,
        added_at: None,
        modified_at: None,
        authors: String::new(),
    }
}

async fn seed(dir: &std::path::Path, records: &[Record]) -> Vec<i64> {
    fs::create_dir_all(dir.join("pdfs")).unwrap();
    let store = ReplicaStore::open(&dir.join("papers.db")).await.unwrap();
    let mut ids = Vec::new();
    for record in records {
        let mut tx = store.begin().await.unwrap();
        let id = store::insert_record(&mut tx, record).await.unwrap();
        for (position, name) in record.author_names().iter().enumerate() {
            let author_id = store::upsert_author(&mut tx, name).await.unwrap();
            store::insert_author_link(&mut tx, id, author_id, position as i64)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        ids.push(id);
    }
    ids
}

#[tokio::test]
async fn bootstrap_clone_copies_records_and_artifacts() {
    init_tracing();
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    // Remote directory must not exist yet for the bootstrap shortcut to fire.
    let remote_dir = remote.path().join("does-not-exist-yet");

    let mut record = bare_record("A");
    record.doi = Some("10/a".into());
    record.artifact_ref = Some("a.pdf".into());
    seed(local.path(), &[record]).await;
    fs::write(local.path().join("pdfs/a.pdf"), b"pdf-bytes").unwrap();

    let orchestrator = Orchestrator::new(local.path(), &remote_dir, SyncConfig::default());
    let result = orchestrator
        .sync(
            false,
            None,
            &NullProgressReporter,
            &NullSyncLogger,
        )
        .await
        .unwrap();

    assert_eq!(result.records_added, 1);
    assert_eq!(result.artifacts_copied, 1);
    assert!(result.errors.is_empty());

    let remote_store = ReplicaStore::open(&remote_dir.join("papers.db")).await.unwrap();
    let records = remote_store.fetch_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "A");
    assert_eq!(records[0].doi.as_deref(), Some("10/a"));
    assert_eq!(
        fs::read(remote_dir.join("pdfs/a.pdf")).unwrap(),
        b"pdf-bytes"
    );
}

#[tokio::test]
async fn doi_match_with_no_differences_produces_no_conflicts_or_changes() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let mut l = bare_record("X");
    l.doi = Some("10/x".into());
    seed(local.path(), &[l]).await;

    let mut r = bare_record("X");
    r.doi = Some("10/x".into());
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert!(result.conflicts.is_empty());
    assert_eq!(result.records_added, 0);
    assert_eq!(result.records_updated, 0);
}

#[tokio::test]
async fn doi_match_with_divergent_abstract_is_reported_without_a_resolver() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let mut l = bare_record("Y");
    l.doi = Some("10/y".into());
    l.abstract_text = Some("foo".into());
    seed(local.path(), &[l]).await;

    let mut r = bare_record("Y");
    r.doi = Some("10/y".into());
    r.abstract_text = Some("bar".into());
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.conflicts.len(), 1);
    let diff = &result.conflicts[0].differences["abstract"];
    assert_eq!(diff.local.as_deref(), Some("foo"));
    assert_eq!(diff.remote.as_deref(), Some("bar"));
    assert_eq!(result.records_updated, 0);
}

#[tokio::test]
async fn keep_remote_resolution_overwrites_the_local_abstract() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let mut l = bare_record("Y");
    l.doi = Some("10/y".into());
    l.abstract_text = Some("foo".into());
    seed(local.path(), &[l]).await;

    let mut r = bare_record("Y");
    r.doi = Some("10/y".into());
    r.abstract_text = Some("bar".into());
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let resolver = FixedResolver(Decision::KeepRemote);
    let result = orchestrator
        .sync(false, Some(&resolver), &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.records_updated, 1);
    let local_store = ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
    let records = local_store.fetch_records().await.unwrap();
    assert_eq!(records[0].abstract_text.as_deref(), Some("bar"));
}

#[tokio::test]
async fn fuzzy_title_match_with_trailing_punctuation_has_no_conflicts() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    seed(local.path(), &[bare_record("Attention Is All You Need")]).await;
    seed(remote.path(), &[bare_record("Attention is all you need.")]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert!(result.conflicts.is_empty());
    assert_eq!(result.records_added, 0);
}

#[tokio::test]
async fn keep_both_inserts_a_remote_version_copy() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    seed(local.path(), &[bare_record("Z")]).await;
    let mut r = bare_record("Z");
    r.abstract_text = Some("new".into());
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let resolver = FixedResolver(Decision::KeepBoth);
    let result = orchestrator
        .sync(false, Some(&resolver), &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.records_added, 1);
    let local_store = ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
    let titles: Vec<String> = local_store
        .fetch_records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert!(titles.contains(&"Z".to_string()));
    assert!(titles.contains(&"Z (Remote Version)".to_string()));
}

#[tokio::test]
async fn artifact_dedup_skips_renamed_duplicate_content() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    fs::create_dir_all(local.path().join("pdfs")).unwrap();
    fs::create_dir_all(remote.path().join("pdfs")).unwrap();
    ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
    ReplicaStore::open(&remote.path().join("papers.db")).await.unwrap();

    fs::write(local.path().join("pdfs/paper.pdf"), b"identical-bytes").unwrap();
    fs::write(remote.path().join("pdfs/other.pdf"), b"identical-bytes").unwrap();

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.artifacts_copied, 0);
    assert!(!remote.path().join("pdfs/paper.pdf").exists());
    assert!(!local.path().join("pdfs/other.pdf").exists());
}

#[tokio::test]
async fn unmatched_remote_record_propagates_with_author_order_preserved() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    fs::create_dir_all(local.path().join("pdfs")).unwrap();
    ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();

    let mut r = bare_record("Only On Remote");
    r.authors = "Ada Lovelace, Alan Turing".into();
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.records_added, 1);
    let local_store = ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
    let records = local_store.fetch_records().await.unwrap();
    assert_eq!(records[0].authors, "Ada Lovelace,Alan Turing");
}

#[tokio::test]
async fn collection_only_on_local_propagates_with_its_membership() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let mut paper = bare_record("In A Collection");
    paper.doi = Some("10/coll".into());
    let ids = seed(local.path(), &[paper.clone()]).await;
    seed(remote.path(), &[paper]).await;

    {
        let local_store = ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
        let mut tx = local_store.begin().await.unwrap();
        let collection = Collection {
            id: 0,
            name: "Reading List".to_string(),
            description: Some("stuff to read".to_string()),
            created_at: None,
        };
        let collection_id = store::insert_collection(&mut tx, &collection).await.unwrap();
        store::insert_membership(&mut tx, ids[0], collection_id).await.unwrap();
        tx.commit().await.unwrap();
    }

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.collections_added, 1);
    assert!(result.errors.is_empty());

    let remote_store = ReplicaStore::open(&remote.path().join("papers.db")).await.unwrap();
    let collections = remote_store.fetch_collections().await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].name, "Reading List");
    assert_eq!(collections[0].description.as_deref(), Some("stuff to read"));

    let titles = remote_store.collection_record_titles(collections[0].id).await.unwrap();
    assert!(titles.contains("In A Collection"));
}

#[tokio::test]
async fn collection_present_on_both_sides_only_reconciles_membership() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let local_only = bare_record("Local Only Paper");
    let remote_only = bare_record("Remote Only Paper");
    let shared_local = {
        let mut r = bare_record("Shared Paper");
        r.doi = Some("10/shared".into());
        r
    };
    let shared_remote = shared_local.clone();

    let local_ids = seed(local.path(), &[local_only.clone(), shared_local]).await;
    let remote_ids = seed(remote.path(), &[remote_only.clone(), shared_remote]).await;

    let local_collection_id = {
        let local_store = ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
        let mut tx = local_store.begin().await.unwrap();
        let collection = Collection {
            id: 0,
            name: "Shared Collection".to_string(),
            description: None,
            created_at: None,
        };
        let collection_id = store::insert_collection(&mut tx, &collection).await.unwrap();
        store::insert_membership(&mut tx, local_ids[0], collection_id).await.unwrap();
        store::insert_membership(&mut tx, local_ids[1], collection_id).await.unwrap();
        tx.commit().await.unwrap();
        collection_id
    };
    let remote_collection_id = {
        let remote_store = ReplicaStore::open(&remote.path().join("papers.db")).await.unwrap();
        let mut tx = remote_store.begin().await.unwrap();
        let collection = Collection {
            id: 0,
            name: "Shared Collection".to_string(),
            description: None,
            created_at: None,
        };
        let collection_id = store::insert_collection(&mut tx, &collection).await.unwrap();
        store::insert_membership(&mut tx, remote_ids[0], collection_id).await.unwrap();
        store::insert_membership(&mut tx, remote_ids[1], collection_id).await.unwrap();
        tx.commit().await.unwrap();
        collection_id
    };

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let result = orchestrator
        .sync(false, None, &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    // Both sides already have a collection named "Shared Collection", so no
    // new collection is created; only memberships reconcile (§4.6).
    assert_eq!(result.collections_added, 0);

    let local_store = ReplicaStore::open(&local.path().join("papers.db")).await.unwrap();
    let remote_store = ReplicaStore::open(&remote.path().join("papers.db")).await.unwrap();

    let local_titles = local_store.collection_record_titles(local_collection_id).await.unwrap();
    let remote_titles = remote_store.collection_record_titles(remote_collection_id).await.unwrap();

    assert!(local_titles.contains("Local Only Paper"));
    assert!(local_titles.contains("Shared Paper"));
    assert!(remote_titles.contains("Remote Only Paper"));
    assert!(remote_titles.contains("Shared Paper"));
}

#[tokio::test]
async fn resolver_cancelling_leaves_both_replicas_untouched() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let mut l = bare_record("Y");
    l.doi = Some("10/y".into());
    l.abstract_text = Some("foo".into());
    seed(local.path(), &[l]).await;

    let mut r = bare_record("Y");
    r.doi = Some("10/y".into());
    r.abstract_text = Some("bar".into());
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let resolver = refsync_core::resolver::CancellingResolver;
    let result = orchestrator
        .sync(false, Some(&resolver), &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.records_added, 0);
    assert_eq!(result.records_updated, 0);
}

#[tokio::test]
async fn map_resolver_falls_back_to_default_for_unnamed_conflicts() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let mut l = bare_record("Y");
    l.doi = Some("10/y".into());
    l.abstract_text = Some("foo".into());
    seed(local.path(), &[l]).await;

    let mut r = bare_record("Y");
    r.doi = Some("10/y".into());
    r.abstract_text = Some("bar".into());
    seed(remote.path(), &[r]).await;

    let orchestrator = Orchestrator::new(local.path(), remote.path(), SyncConfig::default());
    let resolver = MapResolver {
        decisions: HashMap::new(),
        default: Decision::KeepRemote,
    };
    let result = orchestrator
        .sync(false, Some(&resolver), &NullProgressReporter, &NullSyncLogger)
        .await
        .unwrap();

    assert_eq!(result.records_updated, 1);
}
