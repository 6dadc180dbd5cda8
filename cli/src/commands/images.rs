//! `strata images` command.

use std::path::PathBuf;

use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Cache directory (default: $STRATA_CACHE_DIR or the user cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Only show image references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ImagesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cache = super::open_image_cache(args.cache_dir)?;
    let entries = cache.list()?;

    if args.quiet {
        for entry in &entries {
            println!("{}", entry.reference);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REFERENCE", "SIZE", "FETCHED", "PATH"]);
    for entry in &entries {
        let size = output::dir_size(&entry.path).map(output::format_bytes);
        table.add_row(vec![
            entry.reference.clone(),
            size.unwrap_or_else(|_| "-".to_string()),
            output::format_ago(&entry.fetched_at),
            entry.path.display().to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}
