//! Build instruction support.
//!
//! Provides Dockerfile parsing, base image scanning, variable substitution,
//! source and destination resolution, and the COPY executors.
//!
//! # Flow
//!
//! ```text
//! CopyInstruction ─┬─> ownership (chown/chmod) ─┐
//!                  ├─> sources (env + globs)  ───┼─> CopyCommand ──> touched paths
//!                  └─> path (symlink-safe dest) ─┘
//! cached image ──────────────────────────────────> CachingCopyCommand ──> touched paths
//! ```

pub mod args;
pub mod context;
pub mod copy;
pub mod dockerfile;
pub mod expand;
pub mod ownership;
pub mod path;
pub mod scan;
pub mod sources;

pub use args::BuildArgs;
pub use context::FileContext;
pub use copy::{BuildCommand, CachingCopyCommand, CopyCommand};
pub use dockerfile::{CopyInstruction, CopySource, Dockerfile, Instruction};
pub use expand::expand;
pub use ownership::{EtcPasswdLookup, Ownership, UserEntry, UserLookup};
pub use path::resolve_if_symlink;
pub use scan::scan_base_images;
