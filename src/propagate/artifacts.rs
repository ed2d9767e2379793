//! Artifact propagator (§4.7): bidirectional file sync with content-hash
//! dedup so a byte-identical file is never stored twice under different
//! names.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;

use crate::hash::hash_file;

#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactSyncCounts {
    pub copied: usize,
    pub updated: usize,
}

/// Builds a `hash -> filename` index of every regular file directly under
/// `dir` (non-recursive, matching the source's `glob("*.pdf")` shape
/// generalized to "whatever files are present").
fn hash_index(dir: &Path) -> HashMap<u64, String> {
    let mut index = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return index;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Ok(hash) = hash_file(&path) {
            index.entry(hash).or_insert_with(|| name.to_string());
        }
    }
    index
}

fn file_names(dir: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect()
}

/// Mirrors files from `src_dir` into `dst_dir`, skipping any whose name
/// already exists there or whose content already exists under any name
/// (§4.7 steps 1–3).
pub fn mirror_missing(src_dir: &Path, dst_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dst_dir)?;
    let dst_names = file_names(dst_dir);
    let dst_hashes = hash_index(dst_dir);

    let mut copied = 0;
    let Ok(entries) = std::fs::read_dir(src_dir) else {
        return Ok(0);
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if dst_names.contains(name) {
            continue;
        }
        let Ok(hash) = hash_file(&path) else {
            continue;
        };
        if dst_hashes.contains_key(&hash) {
            continue;
        }
        copy_preserving_mtime(&path, &dst_dir.join(name))?;
        copied += 1;
    }
    Ok(copied)
}

/// `keep_remote` artifact resolution (§4.7 step 4): overwrites the local
/// file with the remote one.
pub fn overwrite_with_remote(local_dir: &Path, remote_dir: &Path, filename: &str) -> Result<()> {
    let remote_path = remote_dir.join(filename);
    let local_path = local_dir.join(filename);
    copy_preserving_mtime(&remote_path, &local_path)
}

/// `keep_both` artifact resolution (§4.7 step 5): copies the remote file in
/// under `<stem>_remote<ext>`.
pub fn copy_as_duplicate(local_dir: &Path, remote_dir: &Path, filename: &str) -> Result<String> {
    let remote_path = remote_dir.join(filename);
    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = path.extension().and_then(|e| e.to_str());
    let new_name = match ext {
        Some(ext) => format!("{stem}_remote.{ext}"),
        None => format!("{stem}_remote"),
    };
    copy_preserving_mtime(&remote_path, &local_dir.join(&new_name))?;
    Ok(new_name)
}

fn copy_preserving_mtime(src: &Path, dst: &Path) -> Result<()> {
    std::fs::copy(src, dst)?;
    if let Ok(meta) = std::fs::metadata(src) {
        if let Ok(mtime) = meta.modified() {
            let _ = filetime_set(dst, mtime);
        }
    }
    Ok(())
}

/// Sets `dst`'s modification time. `std::fs` has no portable setter, so this
/// shells out to the same utime(2) family every Unix libc exposes; on other
/// platforms preserving mtime is best-effort and silently skipped.
#[cfg(unix)]
fn filetime_set(dst: &Path, mtime: std::time::SystemTime) -> std::io::Result<()> {
    use std::ffi::CString;
    let duration = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let path = CString::new(dst.as_os_str().as_encoded_bytes()).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;
    let times = [
        libc::timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        },
        libc::timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        },
    ];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn filetime_set(_dst: &Path, _mtime: std::time::SystemTime) -> std::io::Result<()> {
    Ok(())
}
