//! COPY source and destination resolution.
//!
//! Sources are expanded against the replacement environment, wildcards
//! are matched inside the file context, and the resulting set is checked
//! against the destination before anything is copied.

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use strata_core::error::{Result, StrataError};

use super::context::FileContext;
use super::dockerfile::CopyInstruction;
use super::expand::expand;
use super::path::clean_path;

const WILDCARD_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

const MULTIPLE_SOURCES_ERROR: &str =
    "when specifying multiple sources in a COPY command, destination must be a directory and end in '/'";

/// Sources after substitution and wildcard matching.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSources {
    /// Source paths relative to the file context root
    pub sources: Vec<String>,
    /// Destination after substitution
    pub dest: String,
}

/// True when `s` contains a glob metacharacter.
pub fn contains_wildcards(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Join `rel` below `root`, treating an absolute `rel` as root-relative.
pub fn join_under(root: &Path, rel: &str) -> PathBuf {
    root.join(rel.trim_start_matches('/'))
}

/// Expand variables in the sources and destination of `copy`, match
/// wildcards inside `context`, and validate the result.
///
/// `root` and the image working directory `cwd` locate the destination
/// for the directory check.
pub fn resolve_env_and_wildcards(
    copy: &CopyInstruction,
    context: &FileContext,
    env: &[(String, String)],
    root: &Path,
    cwd: &Path,
) -> Result<ResolvedSources> {
    let dest = expand(&copy.dest, env, true)?;

    let patterns = copy
        .pattern_sources()
        .map(|s| expand(&s.path, env, true))
        .collect::<Result<Vec<_>>>()?;

    let sources = resolve_sources(&patterns, context)?;
    if !patterns.is_empty() {
        validate_sources(&patterns, &sources, &dest, context, root, cwd)?;
    }

    Ok(ResolvedSources { sources, dest })
}

/// Replace wildcard patterns with the context entries they match.
/// Literal sources are kept as written. A source that climbs above the
/// context root is rejected.
pub fn resolve_sources(patterns: &[String], context: &FileContext) -> Result<Vec<String>> {
    let mut resolved = Vec::new();
    for pattern in patterns {
        context_relative(pattern)?;
        if contains_wildcards(pattern) {
            resolved.extend(match_sources(pattern, context)?);
        } else {
            resolved.push(pattern.clone());
        }
    }
    tracing::debug!(sources = ?resolved, "Resolved sources");
    Ok(resolved)
}

/// `pattern` normalized relative to the context root.
fn context_relative(pattern: &str) -> Result<PathBuf> {
    let rel = clean_path(Path::new(pattern.trim_start_matches('/')));
    if rel.components().next() == Some(Component::ParentDir) {
        return Err(StrataError::Resolution(format!(
            "forbidden path outside the build context: {}",
            pattern
        )));
    }
    Ok(rel)
}

fn match_sources(pattern: &str, context: &FileContext) -> Result<Vec<String>> {
    let root = context.root();
    let rel = context_relative(pattern)?;
    let full = format!(
        "{}/{}",
        Pattern::escape(&root.to_string_lossy()).trim_end_matches('/'),
        rel.to_string_lossy()
    );

    let mut matches = Vec::new();
    for entry in glob::glob_with(&full, WILDCARD_OPTIONS)? {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            StrataError::io_at("matching wildcard at", &path, e.into_error())
        })?;
        if context.excludes(&path) {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            matches.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(matches)
}

/// Reject source sets that cannot be copied to `dest`.
fn validate_sources(
    patterns: &[String],
    resolved: &[String],
    dest: &str,
    context: &FileContext,
    root: &Path,
    cwd: &Path,
) -> Result<()> {
    let dest_is_dir = is_dest_dir(dest, root, cwd);

    if !patterns.iter().any(|p| contains_wildcards(p)) {
        let counted = patterns
            .iter()
            .filter(|p| !context.excludes(Path::new(p.trim_start_matches('/'))))
            .count();
        if counted > 1 && !dest_is_dir {
            return Err(StrataError::Resolution(MULTIPLE_SOURCES_ERROR.to_string()));
        }
    }

    // A single directory source implies a directory destination
    if let [only] = resolved {
        let path = join_under(context.root(), only);
        let meta = std::fs::symlink_metadata(&path)
            .map_err(|e| StrataError::io_at("failed to get fileinfo for", &path, e))?;
        if meta.is_dir() {
            return Ok(());
        }
    }

    let mut total_files = 0;
    for src in resolved {
        let path = join_under(context.root(), src);
        total_files += count_entries(&path, context)?;
    }

    if total_files == 0 {
        return Err(StrataError::Resolution(
            "copy failed: no source files specified".to_string(),
        ));
    }
    if total_files > 1 && !dest_is_dir {
        return Err(StrataError::Resolution(MULTIPLE_SOURCES_ERROR.to_string()));
    }
    Ok(())
}

/// Count `path` and everything below it that the context does not exclude.
fn count_entries(path: &Path, context: &FileContext) -> Result<usize> {
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| StrataError::io_at("failed to get fileinfo for", path, e))?;
    let mut count = usize::from(!context.excludes(path));
    if meta.is_dir() {
        let entries =
            std::fs::read_dir(path).map_err(|e| StrataError::io_at("reading", path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StrataError::io_at("reading", path, e))?;
            count += count_entries(&entry.path(), context)?;
        }
    }
    Ok(count)
}

/// Where an image path lands on the host: absolute paths below `root`,
/// relative ones below the working directory `cwd`.
///
/// The path is normalized inside the image first, so `..` stops at the
/// image root and never leaves `root`.
pub fn host_path(root: &Path, cwd: &Path, path: &str) -> PathBuf {
    let image_path = Path::new("/").join(cwd).join(path);
    let image_path = clean_path(&image_path);
    clean_path(&join_under(root, &image_path.to_string_lossy()))
}

/// Whether `dest` names a directory: it ends in `/`, is `.`, or already
/// exists as a directory.
pub fn is_dest_dir(dest: &str, root: &Path, cwd: &Path) -> bool {
    dest.ends_with('/') || dest == "." || host_path(root, cwd, dest).is_dir()
}

/// Host destination path for one source.
///
/// A relative `dest` is anchored at the image working directory `cwd`.
/// When the destination is a directory the source's file name is
/// appended, except for directory sources (trailing `/`) whose contents
/// land in `dest` itself.
pub fn destination_filepath(src: &str, dest: &str, root: &Path, cwd: &Path) -> PathBuf {
    let src_name = if src.ends_with('/') {
        ""
    } else {
        src.rsplit('/').next().unwrap_or_default()
    };

    let mut new_dest = host_path(root, cwd, dest);
    if !src_name.is_empty() && is_dest_dir(dest, root, cwd) {
        new_dest.push(src_name);
    }
    new_dest
}
