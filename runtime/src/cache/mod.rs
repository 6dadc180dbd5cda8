//! Local cache of base images.
//!
//! - `ImageCache`: on-disk store of pulled images, one OCI layout per reference
//! - `Warmer`: fetches missing or expired images into the store

pub mod image_cache;
pub mod warm;

pub use image_cache::{ImageCache, WarmEntry};
pub use warm::{RemoteImageSource, WarmOutcome, WarmSummary, Warmer};
