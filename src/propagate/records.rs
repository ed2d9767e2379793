//! Record propagator (§4.5).

use anyhow::Result;

use crate::models::Record;
use crate::store::{self, ReplicaStore};

/// Copies `record` into the target store: fills missing timestamps,
/// relativizes an absolute `artifact_ref`, inserts the scalar row excluding
/// the source id and rendered authors, then rebuilds authorship in order.
///
/// One call is one transaction (§5): a failure here rolls back the whole
/// copy, not a partial record with no authors.
pub async fn copy_record(target: &ReplicaStore, source: &Record) -> Result<i64> {
    let mut record = source.clone();
    relativize_artifact_ref(&mut record);

    let mut tx = target.begin().await?;
    let new_id = store::insert_record(&mut tx, &record).await?;
    let names = record.author_names();
    for (position, name) in names.iter().enumerate() {
        let author_id = store::upsert_author(&mut tx, name).await?;
        store::insert_author_link(&mut tx, new_id, author_id, position as i64).await?;
    }
    tx.commit().await?;
    Ok(new_id)
}

/// `keep_both` resolution (§4.4): inserts `record` as a new row on `target`
/// with its title suffixed, regardless of any existing match.
pub async fn copy_as_duplicate(target: &ReplicaStore, source: &Record) -> Result<i64> {
    let mut duplicate = source.clone();
    duplicate.title = format!("{} (Remote Version)", duplicate.title);
    copy_record(target, &duplicate).await
}

/// `keep_remote` reconciliation (§4.5): locates the local record by exact
/// title, overwrites its non-null scalar fields, and rebuilds author links
/// from the remote's rendered authors.
pub async fn apply_remote_version(target: &ReplicaStore, remote: &Record) -> Result<bool> {
    let Some(local_id) = target.find_record_id_by_title(&remote.title).await? else {
        return Ok(false);
    };

    let mut record = remote.clone();
    relativize_artifact_ref(&mut record);

    let mut tx = target.begin().await?;
    store::update_record_scalars(&mut tx, local_id, &record).await?;
    let names = record.author_names();
    store::replace_author_links(&mut tx, local_id, &names).await?;
    tx.commit().await?;
    Ok(true)
}

/// Converts an absolute `artifact_ref` to a bare filename. The target
/// replica only ever stores artifacts by filename under its own `pdfs/`
/// directory, so an absolute source path just gets its file name kept;
/// a failure to do so leaves the ref as-is per §4.5 step 3.
fn relativize_artifact_ref(record: &mut Record) {
    let Some(artifact_ref) = &record.artifact_ref else {
        return;
    };
    let path = std::path::Path::new(artifact_ref);
    if path.is_absolute() {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            record.artifact_ref = Some(name.to_string());
        }
    }
}
