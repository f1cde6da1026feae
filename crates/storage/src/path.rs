//! Root-confined path resolution for the state file.

use crate::{Result, StoreError};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve `relative` under `root`, creating missing directories on the way.
///
/// Rejects absolute paths, `..` components and symlinks (directories or the
/// file itself) that lead outside the canonical root.
pub fn resolve_within_root(root: &Path, relative: &Path) -> Result<PathBuf> {
    let outside = || StoreError::OutsideRoot {
        root: root.to_path_buf(),
        path: relative.to_path_buf(),
    };
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside())
            }
        }
    }
    let Some((file_name, dirs)) = parts.split_last() else {
        return Err(StoreError::InvalidPath(relative.to_path_buf()));
    };

    fs::create_dir_all(root).map_err(io(root))?;
    let canonical_root = root.canonicalize().map_err(io(root))?;

    let mut current = canonical_root.clone();
    for dir in dirs {
        current.push(dir);
        if !current.exists() {
            fs::create_dir(&current).map_err(io(&current))?;
        }
        current = current.canonicalize().map_err(io(&current))?;
        if !current.starts_with(&canonical_root) {
            return Err(outside());
        }
    }

    let resolved = current.join(file_name);
    if let Ok(meta) = fs::symlink_metadata(&resolved) {
        if meta.file_type().is_symlink() {
            let target = resolved.canonicalize().map_err(io(&resolved))?;
            if !target.starts_with(&canonical_root) {
                return Err(outside());
            }
        }
    }

    Ok(resolved)
}
