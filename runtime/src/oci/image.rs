//! OCI image parsing and representation.
//!
//! Handles parsing of an OCI image layout including manifest and configuration.

use std::path::{Path, PathBuf};

use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};
use strata_core::error::{Result, StrataError};

/// An image whose filesystem layers can be read from disk.
pub trait LayeredImage: Send + Sync {
    /// Paths to layer blobs, bottom to top.
    fn layers(&self) -> Result<Vec<PathBuf>>;
}

/// Represents an OCI image loaded from disk.
#[derive(Debug)]
pub struct OciImage {
    /// Root directory of the OCI image layout
    root_dir: PathBuf,

    /// Image configuration
    config: OciImageConfig,

    /// Paths to layer blobs (in order, bottom to top)
    layer_paths: Vec<PathBuf>,
}

/// The parts of an image configuration instructions depend on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OciImageConfig {
    /// Environment variables
    pub env: Vec<(String, String)>,

    /// Working directory
    pub working_dir: Option<String>,

    /// Default user, `user[:group]`
    pub user: Option<String>,
}

impl OciImage {
    /// Load an OCI image from a directory.
    ///
    /// The directory must contain a valid OCI image layout:
    /// - oci-layout file
    /// - index.json
    /// - blobs/sha256/ directory with manifest, config, and layers
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();

        Self::validate_oci_layout(&root_dir)?;

        let index = Self::load_index(&root_dir)?;

        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| StrataError::OciImage("No manifests in index.json".to_string()))?
            .digest()
            .to_string();

        let manifest = Self::load_manifest(&root_dir, &manifest_digest)?;

        let config_digest = manifest.config().digest().to_string();
        let config = Self::load_config(&root_dir, &config_digest)?;

        let layer_paths = manifest
            .layers()
            .iter()
            .map(|layer| Self::blob_path(&root_dir, layer.digest()))
            .collect();

        Ok(Self {
            root_dir,
            config,
            layer_paths,
        })
    }

    /// Get the image configuration.
    pub fn config(&self) -> &OciImageConfig {
        &self.config
    }

    /// Get paths to all layer blobs (in order, bottom to top).
    pub fn layer_paths(&self) -> &[PathBuf] {
        &self.layer_paths
    }

    /// Get the root directory of the OCI image.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Validate that the directory contains a valid OCI layout.
    fn validate_oci_layout(root_dir: &Path) -> Result<()> {
        for required in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(required).exists() {
                return Err(StrataError::OciImage(format!(
                    "Not a valid OCI layout: missing {} in {}",
                    required,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    fn load_index(root_dir: &Path) -> Result<ImageIndex> {
        let index_path = root_dir.join("index.json");
        let content = std::fs::read_to_string(&index_path)
            .map_err(|e| StrataError::io_at("reading", &index_path, e))?;

        serde_json::from_str(&content)
            .map_err(|e| StrataError::OciImage(format!("Failed to parse index.json: {}", e)))
    }

    fn load_manifest(root_dir: &Path, digest: &str) -> Result<ImageManifest> {
        let blob_path = Self::blob_path(root_dir, digest);
        let content = std::fs::read_to_string(&blob_path)
            .map_err(|e| StrataError::io_at("reading manifest", &blob_path, e))?;

        serde_json::from_str(&content)
            .map_err(|e| StrataError::OciImage(format!("Failed to parse manifest: {}", e)))
    }

    fn load_config(root_dir: &Path, digest: &str) -> Result<OciImageConfig> {
        let blob_path = Self::blob_path(root_dir, digest);
        let content = std::fs::read_to_string(&blob_path)
            .map_err(|e| StrataError::io_at("reading config", &blob_path, e))?;

        let oci_config: ImageConfiguration = serde_json::from_str(&content)
            .map_err(|e| StrataError::OciImage(format!("Failed to parse config: {}", e)))?;

        Ok(OciImageConfig::from_oci_config(&oci_config))
    }

    /// Get the path to a blob by digest (`sha256:abc...`).
    pub(crate) fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
        let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
        root_dir.join("blobs").join(algorithm).join(hash)
    }
}

impl LayeredImage for OciImage {
    fn layers(&self) -> Result<Vec<PathBuf>> {
        if let Some(missing) = self.layer_paths.iter().find(|p| !p.exists()) {
            return Err(StrataError::OciImage(format!(
                "layer blob missing: {}",
                missing.display()
            )));
        }
        Ok(self.layer_paths.clone())
    }
}

impl OciImageConfig {
    /// Create from OCI spec ImageConfiguration.
    fn from_oci_config(oci_config: &ImageConfiguration) -> Self {
        let config = oci_config.config();

        let working_dir = config
            .as_ref()
            .and_then(|c| c.working_dir().clone())
            .filter(|w| !w.is_empty());
        let user = config
            .as_ref()
            .and_then(|c| c.user().clone())
            .filter(|u| !u.is_empty());

        let env = config
            .as_ref()
            .and_then(|c| c.env().as_ref())
            .map(|env_list| {
                env_list
                    .iter()
                    .filter_map(|e| e.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            env,
            working_dir,
            user,
        }
    }
}
