//! Formatting helpers for CLI output.

use std::path::Path;

use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table};

/// Create a borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

    for (unit, size) in UNITS {
        if bytes >= size {
            return format!("{:.1} {}", bytes as f64 / size as f64, unit);
        }
    }
    format!("{} B", bytes)
}

/// Format a timestamp relative to now, e.g. "3 hours ago".
pub fn format_ago(dt: &DateTime<Utc>) -> String {
    format_ago_at(dt, Utc::now())
}

fn format_ago_at(dt: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(*dt).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    const STEPS: [(&str, i64); 6] = [
        ("years", 365 * 86400),
        ("months", 30 * 86400),
        ("days", 86400),
        ("hours", 3600),
        ("minutes", 60),
        ("seconds", 1),
    ];
    for (unit, size) in STEPS {
        if secs >= size {
            return format!("{} {} ago", secs / size, unit);
        }
    }
    "0 seconds ago".to_string()
}

/// Total size of the regular files under `path`, not following symlinks.
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
