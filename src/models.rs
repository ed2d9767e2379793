//! Record, Author and Collection shapes shared across the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bibliographic record as stored in a single replica.
///
/// `id` is replica-local: the same logical record carries unrelated ids on
/// each side and the two are never compared directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub title: String,
    pub abstract_text: Option<String>,
    pub venue_full: Option<String>,
    pub venue_acronym: Option<String>,
    pub year: Option<i64>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub paper_type: Option<String>,
    pub doi: Option<String>,
    pub preprint_id: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    /// Replica-relative filename under `pdfs/`, never an absolute path at rest.
    pub artifact_ref: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Authors in display order, already joined the way the comparison field
    /// set and the propagator expect: comma-separated full names.
    pub authors: String,
}

impl Record {
    /// The ordered list of author names parsed out of `authors`.
    pub fn author_names(&self) -> Vec<String> {
        self.authors
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// The comparison field set from the conflict detector, in one place so the
/// matcher, the differ and the propagator agree on what a "scalar field" is.
pub const COMPARE_FIELDS: &[&str] = &[
    "title",
    "abstract",
    "venue_full",
    "venue_acronym",
    "year",
    "volume",
    "issue",
    "pages",
    "paper_type",
    "doi",
    "preprint_id",
    "category",
    "url",
    "notes",
];
