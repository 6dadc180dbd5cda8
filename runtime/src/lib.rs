//! Strata Runtime - daemonless image build core.
//!
//! Executes COPY instructions against a build root, substitutes cached
//! single-layer results for them, and warms the base images a Dockerfile
//! depends on into a local cache.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod fs;
pub mod oci;

// Re-export common types
pub use cache::{ImageCache, RemoteImageSource, WarmEntry, WarmOutcome, WarmSummary, Warmer};
pub use oci::{
    extract_layer, scan_base_images, BuildArgs, BuildCommand, CachingCopyCommand, CopyCommand,
    CopyInstruction, Dockerfile, FileContext, ImageReference, Instruction, LayeredImage, OciImage,
    OciImageConfig, RegistryAuth, RegistryPuller,
};

/// Strata Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
