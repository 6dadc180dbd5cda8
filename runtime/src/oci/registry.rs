//! Registry client for fetching base images.
//!
//! Uses the `oci-distribution` crate to pull an image's manifest, config
//! and layers and lays them out on disk as an OCI image layout, which is
//! the form the image cache stores.

use std::path::Path;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use sha2::{Digest, Sha256};
use strata_core::error::{Result, StrataError};

use super::reference::ImageReference;
use crate::cache::RemoteImageSource;

/// Environment variables holding registry credentials.
const USERNAME_ENV: &str = "STRATA_REGISTRY_USERNAME";
const PASSWORD_ENV: &str = "STRATA_REGISTRY_PASSWORD";

/// Credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `STRATA_REGISTRY_USERNAME` and `STRATA_REGISTRY_PASSWORD`,
    /// falling back to anonymous unless both are set.
    pub fn from_env() -> Self {
        match (std::env::var(USERNAME_ENV), std::env::var(PASSWORD_ENV)) {
            (Ok(username), Ok(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Pulls images from container registries into OCI layouts.
pub struct RegistryPuller {
    client: Client,
    auth: RegistryAuth,
}

impl Default for RegistryPuller {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryPuller {
    /// Puller with anonymous authentication.
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    pub fn with_auth(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Pull `reference` and write it as an OCI image layout into `target_dir`:
    /// `oci-layout`, `index.json` and `blobs/sha256/<hex>` for the manifest,
    /// the config and every layer.
    pub async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let registry = reference.registry.as_str();

        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image from registry"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir)
            .map_err(|e| StrataError::io_at("creating", &blobs_dir, e))?;

        // Multi-arch indexes resolve to the linux manifest for this host
        let auth = self.auth.to_oci_auth();
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| registry_error(registry, format!("Failed to pull manifest: {}", e)))?;

        let manifest_json = serde_json::to_vec(&manifest)?;
        write_blob(&blobs_dir, &manifest_digest, &manifest_json)?;

        self.pull_content(&oci_ref, &manifest, &blobs_dir, registry)
            .await?;

        let layout_path = target_dir.join("oci-layout");
        std::fs::write(&layout_path, r#"{"imageLayoutVersion":"1.0.0"}"#)
            .map_err(|e| StrataError::io_at("writing", &layout_path, e))?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest_json.len(),
                "annotations": {
                    "org.opencontainers.image.ref.name": reference.full_reference()
                }
            }]
        });
        let index_path = target_dir.join("index.json");
        std::fs::write(&index_path, serde_json::to_string_pretty(&index)?)
            .map_err(|e| StrataError::io_at("writing", &index_path, e))?;

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            layers = manifest.layers.len(),
            "Image pulled"
        );

        Ok(())
    }

    /// Pull the config and layer blobs named by `manifest`, verifying each
    /// against its digest.
    async fn pull_content(
        &self,
        oci_ref: &Reference,
        manifest: &OciImageManifest,
        blobs_dir: &Path,
        registry: &str,
    ) -> Result<()> {
        for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            tracing::debug!(
                digest = %descriptor.digest,
                size = descriptor.size,
                media_type = %descriptor.media_type,
                "Pulling blob"
            );

            let data = self.pull_blob(oci_ref, descriptor, registry).await?;
            verify_digest(&descriptor.digest, &data)?;
            write_blob(blobs_dir, &descriptor.digest, &data)?;
        }
        Ok(())
    }

    async fn pull_blob(
        &self,
        oci_ref: &Reference,
        descriptor: &OciDescriptor,
        registry: &str,
    ) -> Result<Vec<u8>> {
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, descriptor, &mut data)
            .await
            .map_err(|e| {
                registry_error(
                    registry,
                    format!("Failed to pull blob {}: {}", descriptor.digest, e),
                )
            })?;
        Ok(data)
    }
}

#[async_trait]
impl RemoteImageSource for RegistryPuller {
    async fn fetch(&self, reference: &ImageReference, target_dir: &Path) -> Result<()> {
        self.pull(reference, target_dir).await
    }
}

fn registry_error(registry: &str, message: String) -> StrataError {
    StrataError::Registry {
        registry: registry.to_string(),
        message,
    }
}

/// Write a blob to `blobs/sha256/<hex>`.
fn write_blob(blobs_dir: &Path, digest: &str, data: &[u8]) -> Result<()> {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    let path = blobs_dir.join(hex);
    std::fs::write(&path, data).map_err(|e| StrataError::io_at("writing blob", &path, e))
}

/// Reject a blob whose content does not hash to its sha256 digest. Other
/// algorithms are accepted unchecked.
fn verify_digest(digest: &str, data: &[u8]) -> Result<()> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if actual != expected {
        return Err(StrataError::CacheIntegrity(format!(
            "blob digest mismatch: expected sha256:{}, got sha256:{}",
            expected, actual
        )));
    }
    Ok(())
}

fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        StrataError::OciImage(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Select the linux manifest for the host architecture from an image index.
///
/// Builds always produce linux images, whatever the host OS.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
