//! Interfaces between the emerge engine and its collaborators.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;

use crate::error::EmergeError;
use crate::types::{FileDescriptor, PartDescriptor, PartListPage};

/// Factory producing fresh readable streams.
///
/// Retried operations never rewind a partially consumed stream; they call
/// [`StreamOpener::open_stream`] again and start over from byte zero, so
/// implementations must yield byte-identical content on every call.
pub trait StreamOpener: Send + Sync {
    /// Exact number of bytes a fresh stream will yield.
    fn stream_length(&self) -> u64;

    /// Open a fresh stream positioned at byte zero.
    fn open_stream(&self) -> Result<Box<dyn Read + Send>, EmergeError>;
}

/// Remote storage operations the emerge engine depends on.
///
/// Implementations own authentication, endpoint selection, and per-request
/// timeouts. Busy or expired endpoints surface as retryable
/// [`EmergeError::Transport`]; a digest mismatch reported by the service
/// surfaces as [`EmergeError::Integrity`].
#[async_trait]
pub trait RemoteStorageClient: Send + Sync {
    /// Upload a whole object in one request.
    #[allow(clippy::too_many_arguments)]
    async fn upload_whole_object(
        &self,
        bucket_id: &str,
        object_name: &str,
        opener: &dyn StreamOpener,
        length: u64,
        content_sha1: Option<&str>,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<FileDescriptor, EmergeError>;

    /// Start a large file and return its identifier.
    async fn start_large_file(
        &self,
        bucket_id: &str,
        object_name: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String, EmergeError>;

    /// Upload one part of a large file.
    ///
    /// `content_sha1` is `None` only for parts whose digest cannot be
    /// computed locally; the service then records its own.
    async fn upload_part(
        &self,
        large_file_id: &str,
        part_number: u32,
        opener: &dyn StreamOpener,
        length: u64,
        content_sha1: Option<&str>,
    ) -> Result<PartDescriptor, EmergeError>;

    /// Copy a byte range of an existing stored object into one part of a
    /// large file, entirely server-side.
    async fn copy_part(
        &self,
        large_file_id: &str,
        part_number: u32,
        source_file_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<PartDescriptor, EmergeError>;

    /// Finalize a large file from its parts, listed by part number.
    async fn finish_large_file(
        &self,
        large_file_id: &str,
        part_sha1s: &[String],
    ) -> Result<FileDescriptor, EmergeError>;

    /// Cancel an unfinished large file so the service reclaims its parts.
    /// Must be idempotent: cancelling an already finished or cancelled
    /// file is not an error.
    async fn cancel_large_file(&self, large_file_id: &str) -> Result<(), EmergeError>;

    /// List parts already uploaded for an unfinished large file.
    /// The caller follows `next_part_number` until exhausted.
    async fn list_parts(
        &self,
        large_file_id: &str,
        start_part_number: u32,
        batch_size: u32,
    ) -> Result<PartListPage, EmergeError>;

    /// Read a byte range of an existing stored object.
    ///
    /// Used only to stream copy ranges that are too small to stand as
    /// copy parts of their own; ranges are bounded by the minimum part
    /// size, so buffering them in memory is acceptable.
    async fn download_file_range(
        &self,
        file_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, EmergeError>;
}
