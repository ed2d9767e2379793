//! Collection propagator (§4.6).
//!
//! Collections propagate by name; membership transfer matches records by
//! exact title only, intentionally narrower than §4.2's fuzzy matcher, to
//! avoid binding collection membership to a fuzzy match.

use anyhow::Result;

use crate::models::Collection;
use crate::store::{self, ReplicaStore};

/// Creates `collection` on `target` and returns its new id.
pub async fn copy_collection(target: &ReplicaStore, collection: &Collection) -> Result<i64> {
    let mut tx = target.begin().await?;
    let new_id = store::insert_collection(&mut tx, collection).await?;
    tx.commit().await?;
    Ok(new_id)
}

/// For every record in `source_titles`, ensures a membership link exists on
/// `target` for the record with the same title, if one is found there.
/// Idempotent: a record without a matching title on the target is skipped,
/// not created.
pub async fn sync_memberships(
    target: &ReplicaStore,
    collection_id: i64,
    source_titles: impl IntoIterator<Item = String>,
) -> Result<usize> {
    let mut added = 0;
    for title in source_titles {
        let Some(record_id) = target.find_record_id_by_title(&title).await? else {
            continue;
        };
        let mut tx = target.begin().await?;
        store::insert_membership(&mut tx, record_id, collection_id).await?;
        tx.commit().await?;
        added += 1;
    }
    Ok(added)
}
