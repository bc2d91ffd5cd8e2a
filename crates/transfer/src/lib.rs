//! Transfer engine for part-bounded object storage.
//!
//! This crate moves large payloads (local files, in-memory buffers,
//! server-side copy ranges) into a storage service that accepts whole
//! objects or explicitly numbered parts of a large file, each part
//! bounded by a minimum and maximum size.
//!
//! The core is the emerge engine: a pure planner partitions an ordered
//! list of write intents into transport-legal parts, and an executor runs
//! those parts with bounded concurrency, retry, resume, and correct
//! finalization, producing the same logical object regardless of how many
//! physical sources or parts were required.
//!
//! The storage service itself is consumed through the
//! [`RemoteStorageClient`] trait; authentication, endpoint handling, and
//! per-request timeouts live behind it.

pub mod bucket;
pub mod emerge;
mod error;
pub mod source;
pub mod stream;
mod traits;
mod types;
pub mod validation;

pub use bucket::Bucket;
pub use emerge::{
    validate_intents, CopyPartDefinition, EmergeExecutor, EmergePartDefinition, EmergePlan,
    EmergePlanner, OutboundSource, PartId, UploadPartDefinition, UploadSubpart,
    UploadSubpartsDefinition, WriteIntent,
};
pub use error::EmergeError;
pub use source::{
    CopySource, SourceStream, UploadSource, UploadSourceBytes, UploadSourceLocalFile,
};
pub use stream::{wrap_with_range, ChainedStream, StreamRange};
pub use traits::{RemoteStorageClient, StreamOpener};
pub use types::{
    EmergeOptions, EmergeTarget, FileDescriptor, PartDescriptor, PartListPage, RetrySettings,
    ServiceLimits, TransferProgress,
};
pub use validation::{validate_metadata, validate_object_name};
