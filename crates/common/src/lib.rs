//! Shared types and utilities for stowage.
//!
//! This crate provides common functionality used across all stowage crates:
//! - SHA-1 content digest helpers
//! - Generic progress callback trait
//! - Service limit constants

pub mod constants;
pub mod hash;
pub mod progress;

// Re-export commonly used items at crate root
pub use constants::*;
pub use hash::{hex_sha1_of_bytes, hex_sha1_of_stream, Sha1Hasher};
pub use progress::{progress_fn, FnProgress, NoOpProgress, ProgressCallback};
