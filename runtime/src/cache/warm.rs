//! Base image warming.
//!
//! Fetches base images into the local [`ImageCache`] ahead of a build so the
//! build itself never waits on a registry. An image whose cache entry is
//! still fresh is not fetched again; the caller gets the distinguishable
//! [`StrataError::AlreadyCached`] condition instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use strata_core::config::WarmerOptions;
use strata_core::error::{Result, StrataError};

use super::image_cache::{ImageCache, WarmEntry};
use crate::oci::build::scan::scan_base_images;
use crate::oci::reference::ImageReference;
use crate::oci::registry::{RegistryAuth, RegistryPuller};

/// Where images are fetched from.
#[async_trait]
pub trait RemoteImageSource: Send + Sync {
    /// Write `reference` as an OCI image layout into the existing, empty
    /// directory `target_dir`.
    async fn fetch(&self, reference: &ImageReference, target_dir: &Path) -> Result<()>;
}

/// What happened to one image during [`Warmer::warm_all`].
#[derive(Debug, Clone, PartialEq)]
pub enum WarmOutcome {
    /// Fetched into the cache at this path
    Fetched(PathBuf),
    /// A fresh entry already existed
    AlreadyCached,
    /// Fetching failed with this message
    Failed(String),
}

/// Per-image results of a [`Warmer::warm_all`] run, in request order.
#[derive(Debug, Clone, Default)]
pub struct WarmSummary {
    pub results: Vec<(String, WarmOutcome)>,
}

impl WarmSummary {
    pub fn fetched(&self) -> usize {
        self.count(|o| matches!(o, WarmOutcome::Fetched(_)))
    }

    pub fn already_cached(&self) -> usize {
        self.count(|o| matches!(o, WarmOutcome::AlreadyCached))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, WarmOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&WarmOutcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Fetches images into an [`ImageCache`].
pub struct Warmer {
    remote: Arc<dyn RemoteImageSource>,
    cache: Arc<ImageCache>,
}

impl Warmer {
    pub fn new(remote: Arc<dyn RemoteImageSource>, cache: Arc<ImageCache>) -> Self {
        Self { remote, cache }
    }

    /// Warmer pulling from registries with credentials from the environment
    /// into the cache at `options.cache_dir`.
    pub fn from_options(options: &WarmerOptions) -> Result<Self> {
        let cache = ImageCache::new(&options.cache_dir)?;
        let remote = RegistryPuller::with_auth(RegistryAuth::from_env());
        Ok(Self::new(Arc::new(remote), Arc::new(cache)))
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Make sure `image` is in the cache and return its local path.
    ///
    /// - absent or older than `options.cache_ttl`: fetch and store it
    /// - present and fresh: fail with [`StrataError::AlreadyCached`] without
    ///   fetching, unless `options.force` is set
    ///
    /// Concurrent calls for the same image are serialized; the second one
    /// sees the first one's entry.
    pub async fn warm(&self, image: &str, options: &WarmerOptions) -> Result<PathBuf> {
        let reference = ImageReference::parse(image)?;
        let _guard = self.cache.lock(&reference).await;

        if let Some(entry) = self.cache.lookup(&reference)? {
            if entry.is_fresh(options.cache_ttl) && !options.force {
                tracing::debug!(
                    reference = %reference,
                    fetched_at = %entry.fetched_at,
                    "Image already cached"
                );
                return Err(StrataError::AlreadyCached {
                    reference: reference.full_reference(),
                });
            }
            tracing::info!(
                reference = %reference,
                fetched_at = %entry.fetched_at,
                force = options.force,
                "Cached image expired, re-fetching"
            );
        }

        let staging = self.cache.staging_dir(&reference)?;
        if let Err(e) = self.remote.fetch(&reference, &staging).await {
            self.cache.discard(&staging);
            return Err(e);
        }
        let entry = match self.commit(&reference, &staging).await {
            Ok(entry) => entry,
            Err(e) => {
                self.cache.discard(&staging);
                return Err(e);
            }
        };

        tracing::info!(
            reference = %reference,
            path = %entry.path.display(),
            "Warmed image"
        );
        Ok(entry.path)
    }

    /// Move a fetched layout into the cache on the blocking pool.
    async fn commit(&self, reference: &ImageReference, staging: &Path) -> Result<WarmEntry> {
        let cache = Arc::clone(&self.cache);
        let reference = reference.clone();
        let staging = staging.to_path_buf();
        tokio::task::spawn_blocking(move || cache.commit(&reference, &staging))
            .await
            .map_err(|e| {
                StrataError::io(
                    "committing cache entry",
                    std::io::Error::new(std::io::ErrorKind::Other, e),
                )
            })?
    }

    /// Warm `options.images` plus every base image of `options.dockerfile_path`,
    /// concurrently.
    ///
    /// Images naming the same cache entry are warmed once. Per-image failures
    /// are reported in the summary; only an unreadable Dockerfile or bad
    /// build args fail the whole call.
    pub async fn warm_all(&self, options: &WarmerOptions) -> Result<WarmSummary> {
        let mut images = options.images.clone();
        if let Some(ref dockerfile) = options.dockerfile_path {
            images.extend(scan_base_images(dockerfile, options.build_args.as_slice())?);
        }
        let images = dedupe_images(images);

        let results = futures::future::join_all(images.iter().map(|image| async move {
            let outcome = match self.warm(image, options).await {
                Ok(path) => WarmOutcome::Fetched(path),
                Err(e) if e.is_already_cached() => WarmOutcome::AlreadyCached,
                Err(e) => {
                    tracing::warn!(image = %image, error = %e, "Failed to warm image");
                    WarmOutcome::Failed(e.to_string())
                }
            };
            (image.clone(), outcome)
        }))
        .await;

        Ok(WarmSummary { results })
    }
}

/// Drop later spellings of an image already in the list. Unparseable names
/// are kept so their failure is reported.
fn dedupe_images(images: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|image| match ImageReference::parse(image) {
            Ok(r) => seen.insert(r.cache_key()),
            Err(_) => true,
        })
        .collect()
}
