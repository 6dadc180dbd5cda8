//! Strata Core - Foundational Types
//!
//! Error types and configuration shared by the Strata runtime and CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{ExecutorConfig, WarmerOptions};
pub use error::{is_already_cached, Result, StrataError};

/// Strata version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
