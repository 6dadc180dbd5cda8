use std::path::Path;

use thiserror::Error;

/// Strata error types
#[derive(Error, Debug)]
pub enum StrataError {
    /// Bad chown/chmod spec, malformed wildcard, or an unusable path
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Filesystem failure with the operation that triggered it
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Cached image does not match what the cached-copy step requires
    #[error("Cache integrity error: {0}")]
    CacheIntegrity(String),

    /// Image is already present in the local cache and still fresh
    #[error("Image already cached: {reference}")]
    AlreadyCached { reference: String },

    /// Dockerfile unreadable or syntactically invalid
    #[error("Parse error: {0}")]
    Parse(String),

    /// A required file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error raised while executing one build instruction
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<StrataError>,
    },

    /// OCI image layout error
    #[error("OCI image error: {0}")]
    OciImage(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataError {
    /// Wrap an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StrataError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O error that concerns a specific path.
    pub fn io_at(op: &str, path: &Path, source: std::io::Error) -> Self {
        StrataError::Io {
            context: format!("{} {}", op, path.display()),
            source,
        }
    }

    /// Attach the description of the instruction being executed.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        StrataError::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// True when this is the warmer's "already cached" condition rather
    /// than a real failure.
    pub fn is_already_cached(&self) -> bool {
        match self {
            StrataError::AlreadyCached { .. } => true,
            StrataError::Step { source, .. } => source.is_already_cached(),
            _ => false,
        }
    }

    /// True when the root cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            StrataError::NotFound(_) => true,
            StrataError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            StrataError::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Predicate for callers that only want "fetch if missing" semantics.
pub fn is_already_cached(err: &StrataError) -> bool {
    err.is_already_cached()
}

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        StrataError::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

impl From<glob::PatternError> for StrataError {
    fn from(err: glob::PatternError) -> Self {
        StrataError::Resolution(format!("invalid wildcard pattern: {}", err))
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;
