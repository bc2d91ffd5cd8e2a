//! Write intents: where each source lands in the destination object.

use std::fmt;
use std::sync::Arc;

use crate::error::EmergeError;
use crate::source::{CopySource, UploadSource};

/// Source side of a write intent.
#[derive(Debug, Clone)]
pub enum OutboundSource {
    /// Bytes transferred from this machine.
    Upload(Arc<dyn UploadSource>),
    /// A server-side copy range; no local bytes.
    Copy(Arc<CopySource>),
}

impl OutboundSource {
    /// Byte length this source contributes to the object.
    pub fn length(&self) -> u64 {
        match self {
            OutboundSource::Upload(source) => source.content_length(),
            OutboundSource::Copy(source) => source.length,
        }
    }

    /// Stable identity used in diagnostics.
    pub fn source_id(&self) -> String {
        match self {
            OutboundSource::Upload(source) => source.source_id(),
            OutboundSource::Copy(source) => source.source_id(),
        }
    }

    /// Whether this is a server-side copy.
    pub fn is_copy(&self) -> bool {
        matches!(self, OutboundSource::Copy(_))
    }
}

/// A request to place one source's bytes at a given offset of the object
/// being built.
///
/// Intents compose the object by ascending destination offset with no
/// gaps or overlaps; [`validate_intents`] enforces that before planning.
#[derive(Clone)]
pub struct WriteIntent {
    source: OutboundSource,
    destination_offset: u64,
}

impl WriteIntent {
    /// Create an intent placing `source` at `destination_offset`.
    pub fn new(source: OutboundSource, destination_offset: u64) -> Self {
        Self {
            source,
            destination_offset,
        }
    }

    /// Convenience constructor for an upload source at offset zero.
    pub fn entire_upload(source: Arc<dyn UploadSource>) -> Self {
        Self::new(OutboundSource::Upload(source), 0)
    }

    /// Convenience constructor for a copy source at offset zero.
    pub fn entire_copy(source: Arc<CopySource>) -> Self {
        Self::new(OutboundSource::Copy(source), 0)
    }

    /// The source being written.
    pub fn source(&self) -> &OutboundSource {
        &self.source
    }

    /// First destination byte this intent covers.
    pub fn destination_offset(&self) -> u64 {
        self.destination_offset
    }

    /// Byte length of this intent.
    pub fn length(&self) -> u64 {
        self.source.length()
    }

    /// One past the last destination byte this intent covers.
    pub fn destination_end(&self) -> u64 {
        self.destination_offset + self.length()
    }

    /// Whether this intent is a server-side copy.
    pub fn is_copy(&self) -> bool {
        self.source.is_copy()
    }

    /// Turn an ordered list of sources into contiguous intents, each
    /// starting where the previous one ended.
    pub fn wrap_sources(sources: impl IntoIterator<Item = OutboundSource>) -> Vec<WriteIntent> {
        let mut offset: u64 = 0;
        sources
            .into_iter()
            .map(|source| {
                let intent = WriteIntent::new(source, offset);
                offset = intent.destination_end();
                intent
            })
            .collect()
    }
}

impl fmt::Debug for WriteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteIntent")
            .field("source", &self.source.source_id())
            .field("destination_offset", &self.destination_offset)
            .field("length", &self.length())
            .finish()
    }
}

/// Check that intents compose one contiguous object starting at byte
/// zero, with no gaps, overlaps, or zero-length members.
///
/// # Returns
/// The total object length.
pub fn validate_intents(intents: &[WriteIntent]) -> Result<u64, EmergeError> {
    if intents.is_empty() {
        return Err(EmergeError::validation("at least one write intent required"));
    }
    let mut expected_offset: u64 = 0;
    for intent in intents {
        if intent.length() == 0 {
            return Err(EmergeError::validation(format!(
                "zero-length write intent from {}",
                intent.source.source_id()
            )));
        }
        if intent.destination_offset() != expected_offset {
            return Err(EmergeError::validation(format!(
                "write intent from {} starts at {} but byte {} is next (gap or overlap)",
                intent.source.source_id(),
                intent.destination_offset(),
                expected_offset
            )));
        }
        expected_offset = intent.destination_end();
    }
    Ok(expected_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::UploadSourceBytes;

    fn upload(len: usize) -> OutboundSource {
        OutboundSource::Upload(Arc::new(UploadSourceBytes::new(vec![0u8; len])))
    }

    fn copy(len: u64) -> OutboundSource {
        OutboundSource::Copy(Arc::new(CopySource::new("stored-1", 0, len)))
    }

    #[test]
    fn test_wrap_sources_assigns_contiguous_offsets() {
        let intents = WriteIntent::wrap_sources(vec![upload(10), copy(25), upload(5)]);
        assert_eq!(intents.len(), 3);
        assert_eq!(intents[0].destination_offset(), 0);
        assert_eq!(intents[1].destination_offset(), 10);
        assert_eq!(intents[2].destination_offset(), 35);
        assert_eq!(validate_intents(&intents).unwrap(), 40);
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(
            validate_intents(&[]),
            Err(EmergeError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_gap() {
        let intents = vec![
            WriteIntent::new(upload(10), 0),
            WriteIntent::new(upload(10), 15),
        ];
        assert!(matches!(
            validate_intents(&intents),
            Err(EmergeError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let intents = vec![
            WriteIntent::new(upload(10), 0),
            WriteIntent::new(upload(10), 5),
        ];
        assert!(matches!(
            validate_intents(&intents),
            Err(EmergeError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_length() {
        let intents = vec![WriteIntent::new(upload(0), 0)];
        assert!(matches!(
            validate_intents(&intents),
            Err(EmergeError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nonzero_start() {
        let intents = vec![WriteIntent::new(upload(10), 3)];
        assert!(matches!(
            validate_intents(&intents),
            Err(EmergeError::Validation { .. })
        ));
    }
}
