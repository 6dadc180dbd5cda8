use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that forces root ownership for copies from the build context.
pub const COPY_AS_ROOT_ENV: &str = "STRATA_COPY_AS_ROOT";

/// Default freshness window for warmed images: two weeks.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Instruction executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Root of the filesystem being built (`/` inside a build container)
    pub root_dir: PathBuf,

    /// Directory holding the extracted root of every earlier build stage,
    /// one subdirectory per stage name
    pub inter_stage_deps_dir: PathBuf,

    /// Default build context
    pub build_context: PathBuf,

    /// Force 0:0 ownership for copies from the build context instead of
    /// the image's default user
    pub copy_as_root: bool,

    /// Build-context exclusion patterns (`.dockerignore` syntax)
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/"),
            inter_stage_deps_dir: PathBuf::from("/strata/stages"),
            build_context: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            copy_as_root: false,
            ignore_patterns: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    /// Default configuration with `copy_as_root` taken from `STRATA_COPY_AS_ROOT`.
    pub fn from_env() -> Self {
        let copy_as_root = std::env::var(COPY_AS_ROOT_ENV)
            .map(|v| env_bool(&v))
            .unwrap_or(false);
        if copy_as_root {
            tracing::debug!("{} set, copying build context files as 0:0", COPY_AS_ROOT_ENV);
        }
        Self {
            copy_as_root,
            ..Self::default()
        }
    }

    /// Root directory of a named earlier build stage.
    pub fn stage_root(&self, stage: &str) -> PathBuf {
        self.inter_stage_deps_dir.join(stage)
    }
}

/// Image cache warmer options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmerOptions {
    /// Local cache directory
    pub cache_dir: PathBuf,

    /// Entries older than this are re-fetched
    pub cache_ttl: Duration,

    /// Explicit image references to warm
    #[serde(default)]
    pub images: Vec<String>,

    /// Dockerfile whose base images are warmed as well
    pub dockerfile_path: Option<PathBuf>,

    /// Build-argument overrides (`KEY=VALUE`) applied while scanning the Dockerfile
    #[serde(default)]
    pub build_args: Vec<String>,

    /// Re-fetch even when a fresh entry exists
    #[serde(default)]
    pub force: bool,
}

impl Default for WarmerOptions {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/cache"),
            cache_ttl: DEFAULT_CACHE_TTL,
            images: Vec::new(),
            dockerfile_path: None,
            build_args: Vec::new(),
            force: false,
        }
    }
}

fn env_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.root_dir, PathBuf::from("/"));
        assert!(!config.copy_as_root);
        assert!(config.ignore_patterns.is_empty());
    }

    #[test]
    fn test_stage_root() {
        let config = ExecutorConfig {
            inter_stage_deps_dir: PathBuf::from("/strata/stages"),
            ..ExecutorConfig::default()
        };
        assert_eq!(
            config.stage_root("builder"),
            PathBuf::from("/strata/stages/builder")
        );
    }

    #[test]
    fn test_env_bool() {
        assert!(env_bool("1"));
        assert!(env_bool("TRUE"));
        assert!(env_bool(" yes "));
        assert!(!env_bool("0"));
        assert!(!env_bool(""));
        assert!(!env_bool("off"));
    }

    #[test]
    fn test_warmer_options_defaults() {
        let opts = WarmerOptions::default();
        assert_eq!(opts.cache_ttl, DEFAULT_CACHE_TTL);
        assert!(!opts.force);
        assert!(opts.dockerfile_path.is_none());
    }

    #[test]
    fn test_warmer_options_deserialize_with_defaults() {
        let json = r#"{
            "cache_dir": "/tmp/cache",
            "cache_ttl": { "secs": 60, "nanos": 0 },
            "dockerfile_path": null
        }"#;
        let opts: WarmerOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.cache_ttl, Duration::from_secs(60));
        assert!(opts.images.is_empty());
        assert!(opts.build_args.is_empty());
    }
}
