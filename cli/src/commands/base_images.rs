//! `strata base-images` command.

use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct BaseImagesArgs {
    /// Path to the Dockerfile
    #[arg(short = 'f', long = "file", default_value = "Dockerfile")]
    pub file: PathBuf,

    /// Set build-time variables used in FROM lines (KEY=VALUE), can be repeated
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,
}

pub async fn execute(args: BaseImagesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let images = strata_runtime::scan_base_images(&args.file, args.build_arg.as_slice())?;
    for image in images {
        println!("{image}");
    }
    Ok(())
}
