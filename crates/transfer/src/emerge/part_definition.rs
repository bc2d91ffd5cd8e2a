//! Definitions of the physical parts an emerge plan is made of.
//!
//! A part definition is a self-contained unit of work: it knows its exact
//! byte length, how to open a fresh stream over its content (for upload
//! parts), and its identity for idempotent resume matching. Digests are
//! computed at most once per definition, on a dedicated stream, and
//! cached; the stream that gets hashed is never the stream that gets
//! uploaded.

use std::io::Read;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use stowage_common::hash::hex_sha1_of_stream;

use crate::error::EmergeError;
use crate::source::{CopySource, UploadSource};
use crate::stream::{wrap_with_range, ChainedStream};
use crate::traits::StreamOpener;

/// Identity of one plan part, used for resume matching.
///
/// Hashable parts are identified by content digest; parts without a
/// locally computable digest fall back to a structural identity naming
/// the source, offset, and length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartId {
    /// Hex SHA-1 of the part's content.
    ContentSha1(String),
    /// Structural identity of a source byte range.
    SourceRange {
        source_id: String,
        offset: u64,
        length: u64,
    },
    /// Ordered identities of a packed part's subparts.
    Composite(Vec<PartId>),
}

/// Opens range-wrapped streams over one upload source.
#[derive(Debug, Clone)]
pub(crate) struct RangeOpener {
    source: Arc<dyn UploadSource>,
    relative_offset: u64,
    length: u64,
}

impl RangeOpener {
    pub(crate) fn new(source: Arc<dyn UploadSource>, relative_offset: u64, length: u64) -> Self {
        Self {
            source,
            relative_offset,
            length,
        }
    }
}

impl StreamOpener for RangeOpener {
    fn stream_length(&self) -> u64 {
        self.length
    }

    fn open_stream(&self) -> Result<Box<dyn Read + Send>, EmergeError> {
        let base = self.source.open()?;
        let wrapped = wrap_with_range(
            base,
            self.source.content_length(),
            self.relative_offset,
            self.length,
        )
        .map_err(|e| EmergeError::from_io(self.source.source_id(), e))?;
        Ok(Box::new(wrapped))
    }
}

/// Opens streams over bytes already fetched into memory.
///
/// Used for copy-range subparts, whose content is re-downloaded for each
/// upload attempt and wrapped here for the duration of that attempt.
#[derive(Debug, Clone)]
pub(crate) struct BytesOpener {
    bytes: Arc<Vec<u8>>,
}

impl BytesOpener {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }
}

struct SharedBytesCursor {
    bytes: Arc<Vec<u8>>,
    pos: usize,
}

impl Read for SharedBytesCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining: &[u8] = &self.bytes[self.pos..];
        let to_copy: usize = buf.len().min(remaining.len());
        buf[..to_copy].copy_from_slice(&remaining[..to_copy]);
        self.pos += to_copy;
        Ok(to_copy)
    }
}

impl StreamOpener for BytesOpener {
    fn stream_length(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn open_stream(&self) -> Result<Box<dyn Read + Send>, EmergeError> {
        Ok(Box::new(SharedBytesCursor {
            bytes: self.bytes.clone(),
            pos: 0,
        }))
    }
}

/// Opens a chained stream over an ordered list of openers.
pub(crate) struct ChainOpener {
    links: Vec<Arc<dyn StreamOpener>>,
}

impl ChainOpener {
    pub(crate) fn new(links: Vec<Arc<dyn StreamOpener>>) -> Self {
        Self { links }
    }
}

impl StreamOpener for ChainOpener {
    fn stream_length(&self) -> u64 {
        self.links.iter().map(|l| l.stream_length()).sum()
    }

    fn open_stream(&self) -> Result<Box<dyn Read + Send>, EmergeError> {
        Ok(Box::new(ChainedStream::new(self.links.clone())))
    }
}

/// One fragment of a packed upload part.
#[derive(Debug, Clone)]
pub enum UploadSubpart {
    /// A slice of a local upload source. Hashable.
    Local {
        source: Arc<dyn UploadSource>,
        relative_offset: u64,
        length: u64,
    },
    /// A slice of a stored object, too small to stand as a copy part of
    /// its own. Streamed through a ranged read at execution time; not
    /// hashable, since the bytes are not local when the plan is built.
    Remote {
        source: Arc<CopySource>,
        relative_offset: u64,
        length: u64,
    },
}

impl UploadSubpart {
    /// Byte length of this fragment.
    pub fn length(&self) -> u64 {
        match self {
            UploadSubpart::Local { length, .. } => *length,
            UploadSubpart::Remote { length, .. } => *length,
        }
    }

    /// Whether a digest can be computed locally for this fragment.
    pub fn is_hashable(&self) -> bool {
        matches!(self, UploadSubpart::Local { .. })
    }

    /// Structural identity of this fragment.
    pub fn subpart_id(&self) -> PartId {
        match self {
            UploadSubpart::Local {
                source,
                relative_offset,
                length,
            } => PartId::SourceRange {
                source_id: source.source_id(),
                offset: *relative_offset,
                length: *length,
            },
            UploadSubpart::Remote {
                source,
                relative_offset,
                length,
            } => {
                let (offset, length) = source.absolute_range(*relative_offset, *length);
                PartId::SourceRange {
                    source_id: source.source_id(),
                    offset,
                    length,
                }
            }
        }
    }

    /// Opener for a local fragment; `None` for remote fragments, whose
    /// bytes only exist once the executor fetches them.
    pub(crate) fn local_opener(&self) -> Option<Arc<dyn StreamOpener>> {
        match self {
            UploadSubpart::Local {
                source,
                relative_offset,
                length,
            } => Some(Arc::new(RangeOpener::new(
                source.clone(),
                *relative_offset,
                *length,
            ))),
            UploadSubpart::Remote { .. } => None,
        }
    }
}

/// A contiguous slice of one upload source, transferred as one part.
#[derive(Debug, Clone)]
pub struct UploadPartDefinition {
    source: Arc<dyn UploadSource>,
    relative_offset: u64,
    length: u64,
    sha1: OnceCell<String>,
}

impl UploadPartDefinition {
    pub fn new(source: Arc<dyn UploadSource>, relative_offset: u64, length: u64) -> Self {
        Self {
            source,
            relative_offset,
            length,
            sha1: OnceCell::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Digest of the slice, computed on first request by consuming a
    /// fresh range-wrapped stream, then cached.
    pub fn sha1(&self) -> Result<String, EmergeError> {
        self.sha1
            .get_or_try_init(|| {
                // Whole-source slices reuse the source's own cached digest
                if self.relative_offset == 0 && self.length == self.source.content_length() {
                    return self.source.content_sha1();
                }
                let opener = self.opener();
                let mut stream = opener.open_stream()?;
                let (digest, _) = hex_sha1_of_stream(&mut stream)
                    .map_err(|e| EmergeError::from_io(self.source.source_id(), e))?;
                Ok(digest)
            })
            .cloned()
    }

    pub(crate) fn opener(&self) -> Arc<dyn StreamOpener> {
        Arc::new(RangeOpener::new(
            self.source.clone(),
            self.relative_offset,
            self.length,
        ))
    }

    pub fn source_id(&self) -> String {
        self.source.source_id()
    }
}

/// Several small fragments packed together to satisfy the minimum part
/// size, transferred as one part over a chained stream.
#[derive(Debug, Clone)]
pub struct UploadSubpartsDefinition {
    subparts: Vec<UploadSubpart>,
    sha1: OnceCell<String>,
}

impl UploadSubpartsDefinition {
    pub fn new(subparts: Vec<UploadSubpart>) -> Self {
        Self {
            subparts,
            sha1: OnceCell::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.subparts.iter().map(|s| s.length()).sum()
    }

    /// Hashable iff every fragment is hashable.
    pub fn is_hashable(&self) -> bool {
        self.subparts.iter().all(|s| s.is_hashable())
    }

    /// The fragments, in destination order.
    pub fn subparts(&self) -> &[UploadSubpart] {
        &self.subparts
    }

    /// Digest over the full chained concatenation, not per fragment.
    /// `None` when any fragment is remote.
    pub fn sha1(&self) -> Result<Option<String>, EmergeError> {
        if !self.is_hashable() {
            return Ok(None);
        }
        self.sha1
            .get_or_try_init(|| {
                // hashable implies every fragment is local
                let opener = self.local_opener().ok_or_else(|| {
                    EmergeError::validation("cannot hash a part with remote fragments")
                })?;
                let mut stream = opener.open_stream()?;
                let (digest, _) = hex_sha1_of_stream(&mut stream)
                    .map_err(|e| EmergeError::from_io(self.source_id(), e))?;
                Ok(digest)
            })
            .map(|digest| Some(digest.clone()))
    }

    /// Chained opener over the fragments, when all of them are local.
    pub(crate) fn local_opener(&self) -> Option<Arc<dyn StreamOpener>> {
        let links: Option<Vec<Arc<dyn StreamOpener>>> =
            self.subparts.iter().map(|s| s.local_opener()).collect();
        links.map(|links| Arc::new(ChainOpener::new(links)) as Arc<dyn StreamOpener>)
    }

    pub fn source_id(&self) -> String {
        format!("<packed:{} subparts>", self.subparts.len())
    }
}

/// A server-side copy range, transferred without local data.
#[derive(Debug, Clone)]
pub struct CopyPartDefinition {
    source: Arc<CopySource>,
    relative_offset: u64,
    length: u64,
}

impl CopyPartDefinition {
    pub fn new(source: Arc<CopySource>, relative_offset: u64, length: u64) -> Self {
        Self {
            source,
            relative_offset,
            length,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Identifier of the stored object being copied from.
    pub fn source_file_id(&self) -> &str {
        &self.source.source_file_id
    }

    /// Absolute byte range within the stored object.
    pub fn absolute_range(&self) -> (u64, u64) {
        self.source.absolute_range(self.relative_offset, self.length)
    }

    pub fn source_id(&self) -> String {
        self.source.source_id()
    }
}

/// One physical part of the eventual object.
///
/// The variant set is fixed: a part either uploads a slice of one source,
/// uploads several packed fragments, or copies a range server-side.
#[derive(Debug, Clone)]
pub enum EmergePartDefinition {
    Upload(UploadPartDefinition),
    UploadSubparts(UploadSubpartsDefinition),
    Copy(CopyPartDefinition),
}

impl EmergePartDefinition {
    /// Byte length this part contributes to the object.
    pub fn length(&self) -> u64 {
        match self {
            EmergePartDefinition::Upload(part) => part.length(),
            EmergePartDefinition::UploadSubparts(part) => part.length(),
            EmergePartDefinition::Copy(part) => part.length(),
        }
    }

    /// Whether a digest can be computed locally for this part.
    pub fn is_hashable(&self) -> bool {
        match self {
            EmergePartDefinition::Upload(_) => true,
            EmergePartDefinition::UploadSubparts(part) => part.is_hashable(),
            EmergePartDefinition::Copy(_) => false,
        }
    }

    /// Digest sent to the service as the part's integrity check, when one
    /// can be computed locally.
    pub fn sha1(&self) -> Result<Option<String>, EmergeError> {
        match self {
            EmergePartDefinition::Upload(part) => part.sha1().map(Some),
            EmergePartDefinition::UploadSubparts(part) => part.sha1(),
            EmergePartDefinition::Copy(_) => Ok(None),
        }
    }

    /// Identity used for idempotent resume matching.
    pub fn part_id(&self) -> Result<PartId, EmergeError> {
        match self {
            EmergePartDefinition::Upload(part) => Ok(PartId::ContentSha1(part.sha1()?)),
            EmergePartDefinition::UploadSubparts(part) => match part.sha1()? {
                Some(digest) => Ok(PartId::ContentSha1(digest)),
                None => Ok(PartId::Composite(
                    part.subparts().iter().map(|s| s.subpart_id()).collect(),
                )),
            },
            EmergePartDefinition::Copy(part) => {
                let (offset, length) = part.absolute_range();
                Ok(PartId::SourceRange {
                    source_id: part.source_id(),
                    offset,
                    length,
                })
            }
        }
    }

    /// Opener over the part's content when every byte is local; `None`
    /// when the part is a copy or packs remote fragments.
    pub(crate) fn local_opener(&self) -> Option<Arc<dyn StreamOpener>> {
        match self {
            EmergePartDefinition::Upload(part) => Some(part.opener()),
            EmergePartDefinition::UploadSubparts(part) => part.local_opener(),
            EmergePartDefinition::Copy(_) => None,
        }
    }

    /// Stable identity used in diagnostics.
    pub fn source_id(&self) -> String {
        match self {
            EmergePartDefinition::Upload(part) => part.source_id(),
            EmergePartDefinition::UploadSubparts(part) => part.source_id(),
            EmergePartDefinition::Copy(part) => part.source_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::UploadSourceBytes;
    use stowage_common::hex_sha1_of_bytes;

    fn bytes_source(data: &[u8]) -> Arc<dyn UploadSource> {
        Arc::new(UploadSourceBytes::new(data.to_vec()))
    }

    #[test]
    fn test_upload_part_slice_digest_and_stream() {
        let source = bytes_source(b"abcdefghij");
        let part = UploadPartDefinition::new(source, 2, 5);

        assert_eq!(part.length(), 5);
        assert_eq!(part.sha1().unwrap(), hex_sha1_of_bytes(b"cdefg"));

        let mut stream = part.opener().open_stream().unwrap();
        let mut out: Vec<u8> = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"cdefg");
    }

    #[test]
    fn test_upload_part_whole_source_reuses_source_digest() {
        let source = bytes_source(b"whole body");
        let part = UploadPartDefinition::new(source.clone(), 0, source.content_length());
        assert_eq!(part.sha1().unwrap(), source.content_sha1().unwrap());
    }

    #[test]
    fn test_subparts_digest_covers_concatenation() {
        let part = UploadSubpartsDefinition::new(vec![
            UploadSubpart::Local {
                source: bytes_source(b"abc"),
                relative_offset: 0,
                length: 3,
            },
            UploadSubpart::Local {
                source: bytes_source(b"XXdefYY"),
                relative_offset: 2,
                length: 3,
            },
        ]);

        assert_eq!(part.length(), 6);
        assert!(part.is_hashable());
        assert_eq!(
            part.sha1().unwrap(),
            Some(hex_sha1_of_bytes(b"abcdef"))
        );

        let mut stream = part.local_opener().unwrap().open_stream().unwrap();
        let mut out: Vec<u8> = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_remote_subpart_disables_hashing() {
        let part = UploadSubpartsDefinition::new(vec![
            UploadSubpart::Local {
                source: bytes_source(b"abc"),
                relative_offset: 0,
                length: 3,
            },
            UploadSubpart::Remote {
                source: Arc::new(CopySource::new("stored-9", 100, 400)),
                relative_offset: 50,
                length: 200,
            },
        ]);

        assert!(!part.is_hashable());
        assert_eq!(part.sha1().unwrap(), None);

        let definition = EmergePartDefinition::UploadSubparts(part);
        let id = definition.part_id().unwrap();
        match id {
            PartId::Composite(ids) => {
                assert_eq!(ids.len(), 2);
                assert_eq!(
                    ids[1],
                    PartId::SourceRange {
                        source_id: "copy:stored-9".to_string(),
                        offset: 150,
                        length: 200,
                    }
                );
            }
            other => panic!("expected composite id, got {other:?}"),
        }
    }

    #[test]
    fn test_copy_part_identity_and_range() {
        let part = CopyPartDefinition::new(Arc::new(CopySource::new("stored-2", 1000, 800)), 200, 300);
        assert_eq!(part.length(), 300);
        assert_eq!(part.absolute_range(), (1200, 300));

        let definition = EmergePartDefinition::Copy(part);
        assert!(!definition.is_hashable());
        assert_eq!(definition.sha1().unwrap(), None);
        assert_eq!(
            definition.part_id().unwrap(),
            PartId::SourceRange {
                source_id: "copy:stored-2".to_string(),
                offset: 1200,
                length: 300,
            }
        );
    }

    #[test]
    fn test_digest_cached_across_calls() {
        let part = UploadPartDefinition::new(bytes_source(b"abcdefghij"), 0, 10);
        let first = part.sha1().unwrap();
        let second = part.sha1().unwrap();
        assert_eq!(first, second);
    }
}
