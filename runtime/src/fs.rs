//! Filesystem copy primitives for COPY execution.
//!
//! Each primitive reports whether it wrote the destination or skipped it
//! because the file context excludes the source. Failures are errors.

use std::io::Read;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use strata_core::error::{Result, StrataError};

use crate::oci::build::context::FileContext;
use crate::oci::build::ownership::{apply_ownership, Ownership};

/// Mode for directories created implicitly as parents of a destination.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Outcome of copying one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Destination was created or overwritten
    Written,
    /// Source is excluded by the file context; nothing was touched
    Skipped,
}

/// Attributes applied to everything one instruction writes.
#[derive(Debug, Clone, Copy)]
pub struct CopyOptions<'a> {
    pub context: &'a FileContext,
    pub ownership: Ownership,
    /// Explicit mode; `None` keeps the source mode
    pub chmod: Option<u32>,
}

/// Copy the tree below `src` into `dest`.
///
/// Returns every destination path written, `dest` itself included.
/// Excluded entries are left out.
pub fn copy_dir(src: &Path, dest: &Path, opts: &CopyOptions<'_>) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    copy_dir_entry(src, dest, opts, &mut copied)?;
    Ok(copied)
}

fn copy_dir_entry(
    src: &Path,
    dest: &Path,
    opts: &CopyOptions<'_>,
    copied: &mut Vec<PathBuf>,
) -> Result<()> {
    let meta = std::fs::symlink_metadata(src).map_err(|e| StrataError::io_at("stat", src, e))?;
    let excluded = opts.context.excludes(src);

    if meta.is_dir() {
        if !excluded {
            tracing::trace!(path = %dest.display(), "Creating directory");
            let mode = opts.chmod.unwrap_or(meta.mode() & 0o7777);
            let ownership = with_source_owner(opts.ownership, &meta);
            mkdir_with_permissions(dest, mode, ownership)?;
            copied.push(dest.to_path_buf());
        }

        let mut entries = std::fs::read_dir(src)
            .map_err(|e| StrataError::io_at("reading directory", src, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| StrataError::io_at("reading directory", src, e))?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            copy_dir_entry(&entry.path(), &dest.join(entry.file_name()), opts, copied)?;
        }
    } else if excluded {
        tracing::debug!(path = %src.display(), "Excluded by ignore rules, skipping");
    } else if meta.file_type().is_symlink() {
        copy_symlink(src, dest, opts.context)?;
        copied.push(dest.to_path_buf());
    } else {
        copy_file(src, dest, opts)?;
        copied.push(dest.to_path_buf());
    }
    Ok(())
}

/// Recreate the symlink `src` at `dest` with the same link text.
pub fn copy_symlink(src: &Path, dest: &Path, context: &FileContext) -> Result<CopyOutcome> {
    if context.excludes(src) {
        tracing::debug!(path = %src.display(), "Excluded by ignore rules, skipping");
        return Ok(CopyOutcome::Skipped);
    }

    remove_existing(dest)?;
    create_parent_dirs(dest, Ownership::UNSPECIFIED)?;

    let target = std::fs::read_link(src).map_err(|e| StrataError::io_at("reading link", src, e))?;
    std::os::unix::fs::symlink(&target, dest)
        .map_err(|e| StrataError::io_at("creating symlink", dest, e))?;
    Ok(CopyOutcome::Written)
}

/// Copy the regular file `src` to `dest`.
///
/// Unspecified ownership keeps the source owner. Unspecified mode keeps
/// the source mode.
pub fn copy_file(src: &Path, dest: &Path, opts: &CopyOptions<'_>) -> Result<CopyOutcome> {
    if opts.context.excludes(src) {
        tracing::debug!(path = %src.display(), "Excluded by ignore rules, skipping");
        return Ok(CopyOutcome::Skipped);
    }
    if src == dest {
        return Ok(CopyOutcome::Written);
    }

    let meta = std::fs::metadata(src).map_err(|e| StrataError::io_at("stat", src, e))?;
    let mut file =
        std::fs::File::open(src).map_err(|e| StrataError::io_at("opening", src, e))?;
    let mode = opts.chmod.unwrap_or(meta.mode() & 0o7777);
    let ownership = with_source_owner(opts.ownership, &meta);

    create_file(dest, &mut file, mode, ownership)?;
    Ok(CopyOutcome::Written)
}

/// Write `content` to a new file at `path` with `mode` and `ownership`,
/// creating missing parents.
pub fn create_file(
    path: &Path,
    content: &mut dyn Read,
    mode: u32,
    ownership: Ownership,
) -> Result<()> {
    create_parent_dirs(path, ownership)?;

    let mut dest =
        std::fs::File::create(path).map_err(|e| StrataError::io_at("creating", path, e))?;
    std::io::copy(content, &mut dest).map_err(|e| StrataError::io_at("writing", path, e))?;
    drop(dest);

    set_permissions(path, mode, ownership)
}

/// Create `path` and missing parents, then apply mode and ownership to it.
fn mkdir_with_permissions(path: &Path, mode: u32, ownership: Ownership) -> Result<()> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if !meta.is_dir() {
            remove_existing(path)?;
        }
    }
    create_parent_dirs(path, ownership)?;
    match std::fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(StrataError::io_at("creating directory", path, e)),
    }
    set_permissions(path, mode, ownership)
}

/// Create every missing ancestor of `path` with the default directory mode.
fn create_parent_dirs(path: &Path, ownership: Ownership) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let missing: Vec<&Path> = parent
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && std::fs::symlink_metadata(p).is_err())
        .collect();

    for dir in missing.into_iter().rev() {
        match std::fs::create_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StrataError::io_at("creating directory", dir, e)),
        }
        set_permissions(dir, DEFAULT_DIR_MODE, ownership)?;
    }
    Ok(())
}

fn set_permissions(path: &Path, mode: u32, ownership: Ownership) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| StrataError::io_at("changing mode of", path, e))?;
    let meta =
        std::fs::symlink_metadata(path).map_err(|e| StrataError::io_at("stat", path, e))?;
    apply_ownership(path, ownership, (meta.uid(), meta.gid()))
}

fn remove_existing(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StrataError::io_at("stat", path, e)),
    }
    .map_err(|e| StrataError::io_at("removing", path, e))
}

/// Fill unspecified ids from the source entry's owner.
fn with_source_owner(ownership: Ownership, meta: &std::fs::Metadata) -> Ownership {
    Ownership {
        uid: ownership.uid.or(Some(meta.uid())),
        gid: ownership.gid.or(Some(meta.gid())),
    }
}
