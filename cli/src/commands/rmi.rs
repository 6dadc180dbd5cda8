//! `strata rmi` command.

use std::path::PathBuf;

use clap::Args;
use strata_runtime::ImageReference;

#[derive(Args)]
pub struct RmiArgs {
    /// Image references to remove from the cache
    #[arg(required = true)]
    pub images: Vec<String>,

    /// Cache directory (default: $STRATA_CACHE_DIR or the user cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

pub async fn execute(args: RmiArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cache = super::open_image_cache(args.cache_dir)?;

    let mut missing = Vec::new();
    for image in &args.images {
        let reference = ImageReference::parse(image)?;
        let _guard = cache.lock(&reference).await;
        if cache.invalidate(&reference)? {
            println!("Removed: {}", reference);
        } else {
            missing.push(image.as_str());
        }
    }

    if !missing.is_empty() {
        return Err(format!("No such cached image: {}", missing.join(", ")).into());
    }
    Ok(())
}
