//! CLI command definitions and dispatch.

mod base_images;
mod images;
mod rmi;
mod warm;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_runtime::ImageCache;

/// Environment variable overriding the default cache directory.
const CACHE_DIR_ENV: &str = "STRATA_CACHE_DIR";

/// Strata: daemonless container image build core.
#[derive(Parser)]
#[command(name = "strata", version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Fetch base images into the local cache ahead of a build
    Warm(warm::WarmArgs),
    /// List the base images a Dockerfile builds from
    BaseImages(base_images::BaseImagesArgs),
    /// List cached images
    Images(images::ImagesArgs),
    /// Remove one or more cached images
    Rmi(rmi::RmiArgs),
}

/// Cache directory: `$STRATA_CACHE_DIR`, else the user cache dir
/// (e.g. ~/.cache/strata/images).
pub(crate) fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .map(|c| c.join("strata"))
        .unwrap_or_else(|| PathBuf::from(".strata"))
        .join("images")
}

/// Open the image cache at `dir`, or the default location.
pub(crate) fn open_image_cache(dir: Option<PathBuf>) -> Result<ImageCache, Box<dyn std::error::Error>> {
    let dir = dir.unwrap_or_else(default_cache_dir);
    Ok(ImageCache::new(&dir)?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Warm(args) => warm::execute(args).await,
        Command::BaseImages(args) => base_images::execute(args).await,
        Command::Images(args) => images::execute(args).await,
        Command::Rmi(args) => rmi::execute(args).await,
    }
}
