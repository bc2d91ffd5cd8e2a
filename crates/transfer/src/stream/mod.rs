//! Stream composition: offset-bounded views and virtual concatenation.
//!
//! Both wrappers exist to serve retries-by-reopening: they never rewind,
//! checkpoint, or share position state. A fresh attempt always builds a
//! fresh stream from the same sources.

mod chained;
mod range;

pub use chained::ChainedStream;
pub use range::{wrap_with_range, StreamRange};
