//! Outbound data sources.
//!
//! An upload source is a byte payload with a known length that can be
//! opened as a fresh readable stream any number of times. Re-opening is
//! what makes retries safe: an attempt never rewinds a used stream, it
//! opens a new one. A copy source has no local bytes at all; it names a
//! range of an object already stored by the service.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use stowage_common::hash::hex_sha1_of_stream;

use crate::error::EmergeError;

/// Readable, seekable byte stream handed out by an upload source.
pub trait SourceStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceStream for T {}

/// A local byte payload that can be opened repeatedly.
///
/// The content digest is computed at most once, by consuming a dedicated
/// stream, and cached on the source; the stream used for hashing is never
/// the one used for uploading.
pub trait UploadSource: Send + Sync + fmt::Debug {
    /// Exact byte length, known up front.
    fn content_length(&self) -> u64;

    /// Open a fresh stream positioned at byte zero.
    fn open(&self) -> Result<Box<dyn SourceStream>, EmergeError>;

    /// Hex SHA-1 of the full content, computed once and cached.
    fn content_sha1(&self) -> Result<String, EmergeError>;

    /// Stable identity used in diagnostics, e.g. a path or `<memory>`.
    fn source_id(&self) -> String;
}

/// Upload source backed by a file on local disk.
#[derive(Debug)]
pub struct UploadSourceLocalFile {
    path: PathBuf,
    length: u64,
    sha1: OnceCell<String>,
}

impl UploadSourceLocalFile {
    /// Create a source for a local file, reading its length from disk.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EmergeError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)
            .map_err(|e| EmergeError::from_io(path.display().to_string(), e))?;
        Ok(Self {
            path,
            length: metadata.len(),
            sha1: OnceCell::new(),
        })
    }

    /// Create a source with a digest the caller already knows, skipping
    /// the hashing pass entirely.
    pub fn with_content_sha1(path: impl AsRef<Path>, sha1: String) -> Result<Self, EmergeError> {
        let source = Self::new(path)?;
        let _ = source.sha1.set(sha1);
        Ok(source)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for UploadSourceLocalFile {
    fn content_length(&self) -> u64 {
        self.length
    }

    fn open(&self) -> Result<Box<dyn SourceStream>, EmergeError> {
        let file: File = File::open(&self.path)
            .map_err(|e| EmergeError::from_io(self.path.display().to_string(), e))?;
        Ok(Box::new(file))
    }

    fn content_sha1(&self) -> Result<String, EmergeError> {
        self.sha1
            .get_or_try_init(|| {
                let mut stream = self.open()?;
                let (digest, _) = hex_sha1_of_stream(&mut stream)
                    .map_err(|e| EmergeError::from_io(self.source_id(), e))?;
                Ok(digest)
            })
            .cloned()
    }

    fn source_id(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Upload source backed by an in-memory buffer.
///
/// The buffer is shared, not copied: each opened stream reads the same
/// reference-counted bytes.
#[derive(Debug, Clone)]
pub struct UploadSourceBytes {
    data: Arc<Vec<u8>>,
    sha1: OnceCell<String>,
}

impl UploadSourceBytes {
    /// Create a source over a byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            sha1: OnceCell::new(),
        }
    }

    /// Borrow the underlying bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Cursor target keeping the shared buffer alive for the stream's life.
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl UploadSource for UploadSourceBytes {
    fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> Result<Box<dyn SourceStream>, EmergeError> {
        Ok(Box::new(Cursor::new(SharedBytes(self.data.clone()))))
    }

    fn content_sha1(&self) -> Result<String, EmergeError> {
        Ok(self
            .sha1
            .get_or_init(|| stowage_common::hex_sha1_of_bytes(&self.data))
            .clone())
    }

    fn source_id(&self) -> String {
        format!("<memory:{} bytes>", self.data.len())
    }
}

/// A byte range of an object already stored by the service.
///
/// Has no local stream; the transfer happens inside the storage service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    /// Identifier of the stored object to copy from.
    pub source_file_id: String,
    /// First byte of the range within the stored object.
    pub offset: u64,
    /// Length of the range in bytes.
    pub length: u64,
}

impl CopySource {
    /// Create a copy source over a byte range of a stored object.
    pub fn new(source_file_id: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            source_file_id: source_file_id.into(),
            offset,
            length,
        }
    }

    /// Absolute range of a sub-slice of this copy source.
    ///
    /// `relative_offset` is measured from the start of this source's own
    /// range, so the result can be handed directly to the service.
    pub fn absolute_range(&self, relative_offset: u64, length: u64) -> (u64, u64) {
        (self.offset + relative_offset, length)
    }

    /// Stable identity used in diagnostics and structural part ids.
    pub fn source_id(&self) -> String {
        format!("copy:{}", self.source_file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bytes_source_roundtrip() {
        let source = UploadSourceBytes::new(b"some payload".to_vec());
        assert_eq!(source.content_length(), 12);

        let mut stream = source.open().unwrap();
        let mut read_back: Vec<u8> = Vec::new();
        stream.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, b"some payload");
    }

    #[test]
    fn test_bytes_source_sha1_deterministic_across_opens() {
        let source = UploadSourceBytes::new(b"hello world".to_vec());
        let first = source.content_sha1().unwrap();
        let second = source.content_sha1().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_local_file_source_length_and_sha1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        let source = UploadSourceLocalFile::new(&path).unwrap();
        assert_eq!(source.content_length(), 11);
        assert_eq!(
            source.content_sha1().unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );

        // Two opens produce independent streams with identical content
        let mut first = source.open().unwrap();
        let mut second = source.open().unwrap();
        let mut a: Vec<u8> = Vec::new();
        let mut b: Vec<u8> = Vec::new();
        first.read_to_end(&mut a).unwrap();
        second.read_to_end(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_local_file_source_missing_file() {
        let result = UploadSourceLocalFile::new("/nonexistent/payload.bin");
        assert!(matches!(result, Err(EmergeError::Io { .. })));
    }

    #[test]
    fn test_precomputed_sha1_is_not_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"content").unwrap();

        let source =
            UploadSourceLocalFile::with_content_sha1(&path, "feedfacefeedface".to_string())
                .unwrap();
        assert_eq!(source.content_sha1().unwrap(), "feedfacefeedface");
    }

    #[test]
    fn test_copy_source_absolute_range() {
        let source = CopySource::new("stored-object-4", 1000, 500);
        assert_eq!(source.absolute_range(0, 500), (1000, 500));
        assert_eq!(source.absolute_range(100, 200), (1100, 200));
    }
}
