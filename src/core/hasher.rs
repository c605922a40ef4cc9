//! BLAKE3 content hashing for watch mode, bundles and deployment state.

use crate::error::{Error, Result};
use std::path::Path;

fn tagged(hash: blake3::Hash) -> String {
    format!("blake3:{}", hash.to_hex())
}

/// Streamed hash of a file's bytes, tagged `blake3:`.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(file).map_err(|e| Error::io(path, e))?;
    Ok(tagged(hasher.finalize()))
}

pub fn hash_string(s: &str) -> String {
    tagged(blake3::hash(s.as_bytes()))
}

/// Hash any serializable value through its canonical YAML rendering.
pub fn hash_value<T: serde::Serialize>(value: &T) -> Result<String> {
    let yaml = serde_yaml_ng::to_string(value)
        .map_err(|e| Error::Config(format!("cannot serialize for hashing: {}", e)))?;
    Ok(hash_string(&yaml))
}

/// Order-sensitive hash over component hashes (NUL-separated).
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in components {
        hasher.update(part.as_bytes()).update(b"\0");
    }
    tagged(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.yaml");
        std::fs::write(&path, "name: User\n").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
        assert_eq!(h, hash_string("name: User\n"));
    }

    #[test]
    fn test_hash_string_distinguishes() {
        assert_eq!(hash_string("a"), hash_string("a"));
        assert_ne!(hash_string("a"), hash_string("b"));
    }

    #[test]
    fn test_hash_value_stable() {
        let mut map = indexmap::IndexMap::new();
        map.insert("name", "User");
        assert_eq!(hash_value(&map).unwrap(), hash_value(&map).unwrap());
    }

    #[test]
    fn test_composite_hash_order_sensitive() {
        let h = composite_hash(&["blake3:aaa", "blake3:bbb"]);
        let h2 = composite_hash(&["blake3:bbb", "blake3:aaa"]);
        assert_ne!(h, h2);
    }

    #[test]
    fn test_hash_file_not_found() {
        let err = hash_file(Path::new("/nonexistent/file.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
