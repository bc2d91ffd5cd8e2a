//! Shared data structures for emerge operations.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_common::{
    DEFAULT_LIST_PARTS_BATCH_SIZE, DEFAULT_MAX_PART_COUNT, DEFAULT_MAX_PART_SIZE,
    DEFAULT_MIN_PART_SIZE, DEFAULT_PART_CONCURRENCY,
};

/// Part-size and part-count bounds advertised by the storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLimits {
    /// Smallest legal size for any part except the last.
    pub min_part_size: u64,
    /// Largest legal size for a single part.
    pub max_part_size: u64,
    /// Maximum number of parts in one large file.
    pub max_part_count: u32,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            max_part_count: DEFAULT_MAX_PART_COUNT,
        }
    }
}

/// Retry settings for transfer operations.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Maximum number of attempts per operation, including the first.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier (exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Backoff delay before the next attempt, given how many attempts
    /// have already failed.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let exponent: i32 = failed_attempts.saturating_sub(1) as i32;
        let delay: f64 = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }
}

/// Options for a single emerge invocation.
#[derive(Debug, Clone)]
pub struct EmergeOptions {
    /// Caller-recommended part size. Ignored when below the service
    /// minimum; the planner then falls back to the minimum.
    pub recommended_part_size: Option<u64>,
    /// Maximum number of parts transferred concurrently.
    pub max_concurrency: usize,
    /// Retry settings applied to every remote operation.
    pub retry: RetrySettings,
    /// Identifier of a previously started, unfinished large file to
    /// continue instead of starting a new one.
    pub resume_file_id: Option<String>,
    /// Page size used when listing already-uploaded parts for resume.
    pub list_parts_batch_size: u32,
}

impl Default for EmergeOptions {
    fn default() -> Self {
        Self {
            recommended_part_size: None,
            max_concurrency: DEFAULT_PART_CONCURRENCY,
            retry: RetrySettings::default(),
            resume_file_id: None,
            list_parts_batch_size: DEFAULT_LIST_PARTS_BATCH_SIZE,
        }
    }
}

impl EmergeOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recommended part size.
    pub fn with_recommended_part_size(mut self, part_size: u64) -> Self {
        self.recommended_part_size = Some(part_size);
        self
    }

    /// Set maximum concurrent part transfers.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set retry settings.
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Continue a previously started large file.
    pub fn with_resume_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.resume_file_id = Some(file_id.into());
        self
    }
}

/// Descriptor of a finalized object, as returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Service-assigned file identifier.
    pub file_id: String,
    /// Object name within the bucket.
    pub file_name: String,
    /// Stored content type.
    pub content_type: String,
    /// Whole-object SHA-1, when the service recorded one. Large files
    /// report per-part digests instead.
    pub content_sha1: Option<String>,
    /// Total object length in bytes.
    pub content_length: u64,
    /// User metadata stored with the object.
    pub metadata: HashMap<String, String>,
}

/// Descriptor of one uploaded or copied part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// One-based part number.
    pub part_number: u32,
    /// Hex SHA-1 of the part's bytes, as recorded by the service.
    pub content_sha1: String,
    /// Part length in bytes.
    pub content_length: u64,
}

/// One page of a paginated part listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartListPage {
    /// Parts in this page, ordered by part number.
    pub parts: Vec<PartDescriptor>,
    /// Part number to request next, or `None` when exhausted.
    pub next_part_number: Option<u32>,
}

/// Progress update reported after each completed part.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Cumulative bytes transferred or skipped so far.
    pub bytes_completed: u64,
    /// Total bytes the finished object will contain.
    pub total_bytes: u64,
    /// Parts finished so far, including parts skipped by resume.
    pub parts_completed: u64,
    /// Total parts in the plan; 1 for a whole-object upload.
    pub total_parts: u64,
}

/// Destination of an emerge operation.
#[derive(Debug, Clone)]
pub struct EmergeTarget {
    /// Bucket receiving the object.
    pub bucket_id: String,
    /// Name of the object being created.
    pub object_name: String,
    /// Content type stored with the object.
    pub content_type: String,
    /// User metadata stored with the object.
    pub metadata: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetrySettings {
            max_attempts: 8,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(400));
        // Capped at max_backoff_ms from here on
        assert_eq!(retry.backoff_delay(6), Duration::from_millis(1000));
    }

    #[test]
    fn test_emerge_options_builder() {
        let options = EmergeOptions::new()
            .with_recommended_part_size(64 * 1024 * 1024)
            .with_max_concurrency(8)
            .with_resume_file_id("large-file-1");
        assert_eq!(options.recommended_part_size, Some(64 * 1024 * 1024));
        assert_eq!(options.max_concurrency, 8);
        assert_eq!(options.resume_file_id.as_deref(), Some("large-file-1"));
    }

    #[test]
    fn test_service_limits_default() {
        let limits = ServiceLimits::default();
        assert_eq!(limits.min_part_size, 5 * 1024 * 1024);
        assert_eq!(limits.max_part_count, 10_000);
    }
}
