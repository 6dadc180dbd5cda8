//! Base image discovery.
//!
//! Lists the images a Dockerfile's stages are built `FROM`, so they can be
//! fetched into the local cache before the build starts.

use std::path::Path;

use strata_core::error::Result;

use super::args::BuildArgs;
use super::dockerfile::{Dockerfile, Instruction};
use super::expand::expand;

/// Image name that denotes an empty base rather than a pullable image.
const SCRATCH: &str = "scratch";

/// Every external base image named by a `FROM` line of the Dockerfile at
/// `dockerfile_path`, in source order.
///
/// `build_args` are `KEY=VALUE` overrides for the `ARG`s declared before the
/// first `FROM`, matched by name case-insensitively. Stages built from an
/// earlier stage and `scratch` are left out.
pub fn scan_base_images<S: AsRef<str>>(dockerfile_path: &Path, build_args: &[S]) -> Result<Vec<String>> {
    let overrides = BuildArgs::from_pairs(build_args)?;
    let dockerfile = Dockerfile::from_file(dockerfile_path)?;
    base_images(&dockerfile, &overrides)
}

/// Base images of an already parsed Dockerfile.
pub fn base_images(dockerfile: &Dockerfile, overrides: &BuildArgs) -> Result<Vec<String>> {
    // Only ARGs declared before the first FROM are in scope for FROM lines
    let mut meta_args = BuildArgs::new();
    let mut seen_from = false;
    let mut stages: Vec<String> = Vec::new();
    let mut images = Vec::new();

    for instruction in &dockerfile.instructions {
        match instruction {
            Instruction::Arg { name, default } if !seen_from => {
                meta_args.declare(name.clone(), default.clone());
                if let Some(value) = overrides.get_ignore_case(name) {
                    meta_args.set(name.clone(), value);
                }
            }
            Instruction::From { image, alias } => {
                seen_from = true;
                let resolved = expand(image, &meta_args.declared_values(), false)?;

                let is_stage = stages.iter().any(|s| s.eq_ignore_ascii_case(&resolved));
                if is_stage {
                    tracing::debug!(stage = %resolved, "Skipping FROM of earlier stage");
                } else if !resolved.eq_ignore_ascii_case(SCRATCH) {
                    images.push(resolved);
                }

                if let Some(alias) = alias {
                    stages.push(alias.clone());
                }
            }
            _ => {}
        }
    }

    tracing::debug!(count = images.len(), images = ?images, "Scanned base images");
    Ok(images)
}
