//! Shared constants used across stowage crates.

/// Smallest part size the service accepts for any part other than the
/// last one of a large file (5MB).
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest single part the service accepts (5GB). Copy ranges are cut
/// against this bound rather than the recommended size.
pub const DEFAULT_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in one large file.
pub const DEFAULT_MAX_PART_COUNT: u32 = 10_000;

/// Content type sentinel that lets the service pick a MIME type from the
/// object name.
pub const AUTO_CONTENT_TYPE: &str = "application/x-auto";

/// Maximum UTF-8 length of an object name in bytes.
pub const MAX_OBJECT_NAME_BYTES: usize = 1024;

/// Maximum number of user metadata entries stored with an object.
pub const MAX_METADATA_ENTRIES: usize = 10;

/// Maximum combined byte length of all metadata keys and values.
pub const MAX_METADATA_BYTES: usize = 7000;

/// Default number of parts transferred concurrently.
pub const DEFAULT_PART_CONCURRENCY: usize = 4;

/// Default page size when listing already-uploaded parts of an
/// unfinished large file.
pub const DEFAULT_LIST_PARTS_BATCH_SIZE: u32 = 1000;
