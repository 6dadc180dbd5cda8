//! OCI image support for Strata.
//!
//! - Build instructions: Dockerfile model, COPY executors, base image scan
//! - OCI image layout reading (manifest, config, layer blobs)
//! - Layer extraction with whiteouts
//! - Reference normalization and registry pulls
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    OCI Image Layout                          │
//! │                                                              │
//! │  image/                                                      │
//! │  ├── oci-layout           (OCI layout marker)               │
//! │  ├── index.json           (Image index)                     │
//! │  └── blobs/                                                 │
//! │      └── sha256/                                            │
//! │          ├── <manifest>   (Image manifest)                  │
//! │          ├── <config>     (Image configuration)             │
//! │          └── <layers>     (Filesystem layers)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod build;
mod image;
mod layers;
pub mod reference;
pub mod registry;

pub use build::{
    scan_base_images, BuildArgs, BuildCommand, CachingCopyCommand, CopyCommand, CopyInstruction,
    Dockerfile, FileContext, Instruction,
};
pub use image::{LayeredImage, OciImage, OciImageConfig};
pub use layers::extract_layer;
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryPuller};
