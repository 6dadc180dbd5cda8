//! Symlink-aware destination resolution.

use std::path::{Component, Path, PathBuf};

use strata_core::error::{Result, StrataError};

/// Resolve the path writes to `dest` actually land on.
///
/// Walks upward from `dest` until an existing entry is found, resolves
/// that entry through every symlink, then re-appends the missing tail.
/// `/usr/local/bin` with `/usr/local -> /opt/local` becomes
/// `/opt/local/bin` even when `bin` does not exist yet.
pub fn resolve_if_symlink(dest: &Path) -> Result<PathBuf> {
    if !dest.is_absolute() {
        return Err(StrataError::Resolution(format!(
            "dest path must be abs: {}",
            dest.display()
        )));
    }

    let dest = clean_path(dest);
    let mut pending: Vec<std::ffi::OsString> = Vec::new();
    let mut current = dest.clone();

    while current.parent().is_some() {
        match std::fs::symlink_metadata(&current) {
            Ok(_) => {
                current = std::fs::canonicalize(&current)
                    .map_err(|e| StrataError::io_at("failed to eval symlinks for", &current, e))?;
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(name) = current.file_name() {
                    pending.push(name.to_os_string());
                }
                current.pop();
            }
            Err(e) => return Err(StrataError::io_at("failed to lstat", &current, e)),
        }
    }

    for name in pending.iter().rev() {
        current.push(name);
    }
    let resolved = clean_path(&current);

    if resolved != dest {
        tracing::trace!(
            from = %dest.display(),
            to = %resolved.display(),
            "Updating destination path due to symlink"
        );
    }
    Ok(resolved)
}

/// Lexically normalize a path: drop `.`, fold `..`, collapse separators.
/// `..` never climbs above the root of an absolute path.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
