//! Writing under the output directory: atomic file writes and path containment.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Write `contents` to `path` atomically (write to temp, then rename).
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp_path, contents).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Join a relative path onto `base`, refusing absolute paths and `..`.
pub fn contained_join(base: &Path, relative: &Path) -> std::result::Result<PathBuf, String> {
    if relative.as_os_str().is_empty() {
        return Err("empty output path".to_string());
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("path '{}' escapes the output directory", relative.display()))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path '{}' must be relative", relative.display()))
            }
        }
    }
    Ok(base.join(relative))
}
