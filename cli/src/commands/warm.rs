//! `strata warm` command.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use strata_core::config::{WarmerOptions, DEFAULT_CACHE_TTL};
use strata_runtime::{WarmOutcome, Warmer};

#[derive(Args)]
pub struct WarmArgs {
    /// Image references to warm (e.g., "alpine:3.19", "ghcr.io/org/image:tag")
    pub images: Vec<String>,

    /// Also warm every base image of this Dockerfile
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Set build-time variables used in FROM lines (KEY=VALUE), can be repeated
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,

    /// Cache directory (default: $STRATA_CACHE_DIR or the user cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Re-fetch images cached longer ago than this many hours (default: 336)
    #[arg(long)]
    pub cache_ttl_hours: Option<u64>,

    /// Re-fetch even when the cached copy is still fresh
    #[arg(long)]
    pub force: bool,

    /// Only print failures
    #[arg(short, long)]
    pub quiet: bool,
}

impl WarmArgs {
    fn options(&self) -> Result<WarmerOptions, String> {
        if self.images.is_empty() && self.file.is_none() {
            return Err("Nothing to warm: give image references or --file".to_string());
        }
        let cache_ttl = self
            .cache_ttl_hours
            .map(|h| Duration::from_secs(h.saturating_mul(3600)))
            .unwrap_or(DEFAULT_CACHE_TTL);

        Ok(WarmerOptions {
            cache_dir: self.cache_dir.clone().unwrap_or_else(super::default_cache_dir),
            cache_ttl,
            images: self.images.clone(),
            dockerfile_path: self.file.clone(),
            build_args: self.build_arg.clone(),
            force: self.force,
        })
    }
}

pub async fn execute(args: WarmArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = args.options()?;
    tracing::debug!(
        cache_dir = %options.cache_dir.display(),
        images = options.images.len(),
        dockerfile = ?options.dockerfile_path,
        "Warming base images"
    );
    let warmer = Warmer::from_options(&options)?;
    let summary = warmer.warm_all(&options).await?;

    for (image, outcome) in &summary.results {
        match outcome {
            WarmOutcome::Fetched(path) if !args.quiet => {
                println!("Fetched: {} ({})", image, path.display())
            }
            WarmOutcome::AlreadyCached if !args.quiet => println!("Cached:  {}", image),
            WarmOutcome::Failed(message) => eprintln!("Failed:  {}: {}", image, message),
            _ => {}
        }
    }

    if !args.quiet {
        println!(
            "{} fetched, {} already cached, {} failed",
            summary.fetched(),
            summary.already_cached(),
            summary.failed()
        );
    }

    if summary.has_failures() {
        return Err(format!("{} image(s) could not be warmed", summary.failed()).into());
    }
    Ok(())
}
