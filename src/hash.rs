//! Content hashing for artifact dedup (§4.7, §9 "Hash choice").
//!
//! The source uses MD5; this rewrite substitutes xxh3 since no deployment
//! needs to interoperate with an existing MD5-hashed store and the hash is
//! never persisted, only used within a single sync.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const STREAM_BUF: usize = 64 * 1024;

/// Content hash of a file, computed by streaming rather than loading the
/// whole file into memory.
pub fn hash_file(path: &Path) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut hasher = xxhash_rust::xxh3::Xxh3::new();
    let mut buf = [0u8; STREAM_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn identical_content_hashes_equal() {
        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        a.write_all(b"hello world").unwrap();
        b.write_all(b"hello world").unwrap();
        assert_eq!(hash_file(a.path()).unwrap(), hash_file(b.path()).unwrap());
    }

    #[test]
    fn differing_content_hashes_differ() {
        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        a.write_all(b"hello world").unwrap();
        b.write_all(b"goodbye world").unwrap();
        assert_ne!(hash_file(a.path()).unwrap(), hash_file(b.path()).unwrap());
    }
}
