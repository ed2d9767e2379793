//! Conflict detection (§4.3).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hash::hash_file;
use crate::matcher::Matches;
use crate::models::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    Record,
    Artifact,
}

/// One side of a difference: the scalar value on each replica, rendered as
/// a display string so the table is uniform across field types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub local: Option<String>,
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Record title for `Record` conflicts, filename for `Artifact` ones.
    pub item_id: String,
    pub local_record: Option<Record>,
    pub remote_record: Option<Record>,
    pub differences: HashMap<String, FieldDifference>,
}

impl Conflict {
    /// Stable cross-reference key used when relaying resolver decisions
    /// back (§4.4), mirroring the source's `f"{conflict_type}_{item_id}"`.
    pub fn key(&self) -> String {
        let kind = match self.kind {
            ConflictKind::Record => "record",
            ConflictKind::Artifact => "artifact",
        };
        format!("{kind}_{}", self.item_id)
    }
}

/// Record-level conflicts over a matched pair plus artifact-level conflicts
/// for same-named files whose content differs (§4.3).
pub fn detect(
    local_records: &[Record],
    remote_records: &[Record],
    matches: &Matches,
    local_artifact_dir: &Path,
    remote_artifact_dir: &Path,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    let local_by_id: HashMap<i64, &Record> = local_records.iter().map(|r| (r.id, r)).collect();
    let remote_by_id: HashMap<i64, &Record> = remote_records.iter().map(|r| (r.id, r)).collect();

    for (&local_id, &remote_id) in matches {
        let (Some(&local), Some(&remote)) = (local_by_id.get(&local_id), remote_by_id.get(&remote_id)) else {
            continue;
        };
        let differences = record_differences(local, remote, local_artifact_dir, remote_artifact_dir);
        if !differences.is_empty() {
            conflicts.push(Conflict {
                kind: ConflictKind::Record,
                item_id: local.title.clone(),
                local_record: Some(local.clone()),
                remote_record: Some(remote.clone()),
                differences,
            });
        }
    }

    conflicts.extend(detect_artifact_conflicts(local_artifact_dir, remote_artifact_dir));
    conflicts
}

/// Per-field differences between a matched pair, including the rendered
/// author string and (if both reference a readable artifact) their hashes.
/// Empty and "missing" values compare equal (§4.3).
fn record_differences(
    local: &Record,
    remote: &Record,
    local_artifact_dir: &Path,
    remote_artifact_dir: &Path,
) -> HashMap<String, FieldDifference> {
    let mut differences = HashMap::new();

    macro_rules! compare {
        ($name:literal, $field:ident) => {
            if !values_equal_opt(&local.$field, &remote.$field) {
                differences.insert(
                    $name.to_string(),
                    FieldDifference {
                        local: local.$field.clone(),
                        remote: remote.$field.clone(),
                    },
                );
            }
        };
    }

    if local.title != remote.title {
        differences.insert(
            "title".to_string(),
            FieldDifference {
                local: Some(local.title.clone()),
                remote: Some(remote.title.clone()),
            },
        );
    }
    compare!("abstract", abstract_text);
    compare!("venue_full", venue_full);
    compare!("venue_acronym", venue_acronym);
    compare!("volume", volume);
    compare!("issue", issue);
    compare!("pages", pages);
    compare!("paper_type", paper_type);
    compare!("doi", doi);
    compare!("preprint_id", preprint_id);
    compare!("category", category);
    compare!("url", url);
    compare!("notes", notes);

    if local.year != remote.year {
        differences.insert(
            "year".to_string(),
            FieldDifference {
                local: local.year.map(|y| y.to_string()),
                remote: remote.year.map(|y| y.to_string()),
            },
        );
    }

    if local.authors != remote.authors {
        differences.insert(
            "authors".to_string(),
            FieldDifference {
                local: Some(local.authors.clone()),
                remote: Some(remote.authors.clone()),
            },
        );
    }

    if let (Some(local_ref), Some(remote_ref)) = (&local.artifact_ref, &remote.artifact_ref) {
        if !local_ref.is_empty() && !remote_ref.is_empty() {
            let local_path = local_artifact_dir.join(local_ref);
            let remote_path = remote_artifact_dir.join(remote_ref);
            if let (Ok(local_hash), Ok(remote_hash)) =
                (hash_file(&local_path), hash_file(&remote_path))
            {
                if local_hash != remote_hash {
                    differences.insert(
                        "artifact_hash".to_string(),
                        FieldDifference {
                            local: Some(format!("{local_hash:x}")),
                            remote: Some(format!("{remote_hash:x}")),
                        },
                    );
                }
            }
        }
    }

    differences
}

fn values_equal_opt(a: &Option<String>, b: &Option<String>) -> bool {
    let a_empty = a.as_deref().unwrap_or("").is_empty();
    let b_empty = b.as_deref().unwrap_or("").is_empty();
    if a_empty && b_empty {
        return true;
    }
    a == b
}

/// Enumerates files present under the same name in both artifact
/// directories, emitting a conflict when content hashes or sizes differ.
fn detect_artifact_conflicts(local_dir: &Path, remote_dir: &Path) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let Ok(local_entries) = std::fs::read_dir(local_dir) else {
        return conflicts;
    };

    for entry in local_entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let remote_path = remote_dir.join(name);
        if !remote_path.is_file() {
            continue;
        }

        let (Ok(local_meta), Ok(remote_meta)) =
            (std::fs::metadata(&path), std::fs::metadata(&remote_path))
        else {
            continue;
        };
        let (Ok(local_hash), Ok(remote_hash)) = (hash_file(&path), hash_file(&remote_path)) else {
            continue;
        };

        if local_hash != remote_hash || local_meta.len() != remote_meta.len() {
            let mut differences = HashMap::new();
            differences.insert(
                "hash".to_string(),
                FieldDifference {
                    local: Some(format!("{local_hash:x}")),
                    remote: Some(format!("{remote_hash:x}")),
                },
            );
            conflicts.push(Conflict {
                kind: ConflictKind::Artifact,
                item_id: name.to_string(),
                local_record: None,
                remote_record: None,
                differences,
            });
        }
    }

    conflicts
}
