//! File context: the root a COPY resolves its sources against.
//!
//! Either the build context or the extracted root of an earlier stage.
//! Exclusion patterns use `.dockerignore` syntax: one glob per entry,
//! relative to the root, with `!` re-including previously excluded paths.
//! The last matching pattern decides.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use strata_core::error::Result;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct ExcludeRule {
    pattern: Pattern,
    negated: bool,
}

/// Source root for one COPY execution.
#[derive(Debug, Clone)]
pub struct FileContext {
    root: PathBuf,
    rules: Vec<ExcludeRule>,
}

impl FileContext {
    /// Context with no exclusions.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rules: Vec::new(),
        }
    }

    /// Context with `.dockerignore`-style exclusion patterns.
    pub fn with_excludes<S: AsRef<str>>(root: impl Into<PathBuf>, patterns: &[S]) -> Result<Self> {
        let mut rules = Vec::new();
        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let (negated, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, raw),
            };
            let body = body.trim_start_matches("./").trim_matches('/');
            if body.is_empty() {
                continue;
            }
            rules.push(ExcludeRule {
                pattern: Pattern::new(body)?,
                negated,
            });
        }
        Ok(Self {
            root: root.into(),
            rules,
        })
    }

    /// Read exclusion patterns from `<root>/.dockerignore` when present.
    pub fn from_dockerignore(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let ignore_file = root.join(".dockerignore");
        let patterns: Vec<String> = match std::fs::read_to_string(&ignore_file) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(strata_core::StrataError::io_at(
                    "reading",
                    &ignore_file,
                    e,
                ))
            }
        };
        Self::with_excludes(root, patterns.as_slice())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `path` (absolute under the root, or relative to it) is
    /// excluded. Paths outside the root are never excluded.
    pub fn excludes(&self, path: &Path) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) if path.is_relative() => path,
            Err(_) => return false,
        };
        if rel.as_os_str().is_empty() {
            return false;
        }

        let mut excluded = false;
        for rule in &self.rules {
            if rule_matches(&rule.pattern, rel) {
                excluded = !rule.negated;
            }
        }
        excluded
    }
}

/// A pattern matches a path or any of its parent directories.
fn rule_matches(pattern: &Pattern, rel: &Path) -> bool {
    rel.ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .any(|p| pattern.matches_path_with(p, MATCH_OPTIONS))
}
