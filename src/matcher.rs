//! Record matcher: greedy bijective matching by content similarity (§4.2).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SyncConfig;
use crate::hash::hash_file;
use crate::models::Record;

/// Matches a maximal run of alphanumerics, the unit a "word" means for the
/// overlap ratio in §4.2 step 4 — punctuation attached to a word (a
/// trailing period, a possessive apostrophe) never changes the set.
static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// `local_id -> remote_id`, each remote id appearing at most once.
pub type Matches = HashMap<i64, i64>;

/// Computes the greedy bijective matching described in §4.2: for each local
/// record, pick the highest-scoring remote record above the configured
/// threshold; once a remote record is chosen it is unavailable to later
/// local records.
pub fn find_matches(
    local: &[Record],
    remote: &[Record],
    local_artifact_dir: &Path,
    remote_artifact_dir: &Path,
    config: &SyncConfig,
) -> Matches {
    let mut matches = Matches::new();
    let mut taken: HashSet<i64> = HashSet::new();

    for l in local {
        let mut best: Option<(i64, f64)> = None;
        for r in remote {
            if taken.contains(&r.id) {
                continue;
            }
            let score = similarity(l, r, local_artifact_dir, remote_artifact_dir, config);
            if score > config.match_threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((r.id, score));
            }
        }
        if let Some((remote_id, _)) = best {
            matches.insert(l.id, remote_id);
            taken.insert(remote_id);
        }
    }

    matches
}

/// `S(a, b)` from §4.2: short-circuit identifier rules, then title + optional
/// artifact scoring.
pub fn similarity(
    a: &Record,
    b: &Record,
    a_artifact_dir: &Path,
    b_artifact_dir: &Path,
    config: &SyncConfig,
) -> f64 {
    if non_empty_eq(&a.doi, &b.doi) {
        return 1.0;
    }
    if non_empty_eq(&a.preprint_id, &b.preprint_id) {
        return 1.0;
    }
    if non_empty_eq(&a.url, &b.url) {
        return 1.0;
    }

    let title_score = title_similarity(&a.title, &b.title, config.title_overlap_floor);
    if title_score < config.title_overlap_floor {
        return 0.0;
    }

    match artifact_similarity(a, b, a_artifact_dir, b_artifact_dir) {
        Some(p) => title_score.max((title_score + p) / 2.0),
        None => title_score,
    }
}

fn non_empty_eq(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.is_empty() && !b.is_empty() && a == b,
        _ => false,
    }
}

fn title_similarity(a: &str, b: &str, overlap_floor: f64) -> f64 {
    let a = a.to_lowercase();
    let a = a.trim();
    let b = b.to_lowercase();
    let b = b.trim();

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if b.contains(a) || a.contains(b) {
        return 0.85;
    }

    let words_a = title_words(a);
    let words_b = title_words(b);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let overlap = words_a.intersection(&words_b).count() as f64;
    let denom = words_a.len().max(words_b.len()) as f64;
    let ratio = overlap / denom;
    if ratio > overlap_floor {
        ratio
    } else {
        0.0
    }
}

/// Word set for the overlap comparison, stripped of surrounding punctuation
/// per word so a trailing period doesn't count a word as mismatched.
fn title_words(s: &str) -> HashSet<&str> {
    WORD_PATTERN.find_iter(s).map(|m| m.as_str()).collect()
}

/// `P` from §4.2 step 5: `None` when either side lacks a readable artifact.
fn artifact_similarity(a: &Record, b: &Record, a_dir: &Path, b_dir: &Path) -> Option<f64> {
    let a_ref = a.artifact_ref.as_ref().filter(|s| !s.is_empty())?;
    let b_ref = b.artifact_ref.as_ref().filter(|s| !s.is_empty())?;

    let a_path = a_dir.join(a_ref);
    let b_path = b_dir.join(b_ref);
    let a_meta = std::fs::metadata(&a_path).ok()?;
    let b_meta = std::fs::metadata(&b_path).ok()?;

    let a_hash = hash_file(&a_path).ok()?;
    let b_hash = hash_file(&b_path).ok()?;
    if a_hash == b_hash {
        return Some(1.0);
    }

    let (a_size, b_size) = (a_meta.len(), b_meta.len());
    if a_size > 0 && b_size > 0 {
        let ratio = a_size.min(b_size) as f64 / a_size.max(b_size) as f64;
        if ratio >= 0.8 {
            return Some(0.8);
        }
    }
    None
}
