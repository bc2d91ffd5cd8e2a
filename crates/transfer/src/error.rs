//! Error types for emerge operations.

use thiserror::Error;

/// Errors that can occur while emerging an object.
#[derive(Error, Debug, Clone)]
pub enum EmergeError {
    /// Request rejected before any network call: bad object name,
    /// malformed intent sequence, oversize metadata.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// Transport-level failure. Busy or expired upload endpoints and
    /// connection resets are retryable; digest-mismatch style rejections
    /// arrive as [`EmergeError::Integrity`] instead.
    #[error("Transport failure: {message}")]
    Transport { message: String, retryable: bool },

    /// The service reported a content digest mismatch for a part.
    #[error("Integrity check failed for part {part_number}: {message}")]
    Integrity { part_number: u32, message: String },

    /// The plan cannot fit the service's part-size or part-count limits.
    #[error("Plan exceeds service limits: {message}")]
    Capacity { message: String },

    /// A part exhausted its retries; the large file has been cancelled.
    #[error("Part {part_number} from {source_id} failed: {cause}")]
    PartFailure {
        part_number: u32,
        source_id: String,
        #[source]
        cause: Box<EmergeError>,
    },

    /// Operation cancelled, either by the caller or after a hard part
    /// failure stopped the remaining work.
    #[error("Operation cancelled")]
    Cancelled,

    /// Local I/O error while reading a source.
    #[error("I/O error reading {source_id}: {message}")]
    Io { source_id: String, message: String },
}

impl EmergeError {
    /// Check if this error may be retried with a fresh attempt.
    ///
    /// Integrity errors are deliberately not retryable here: the executor
    /// gives them exactly one fresh-stream retry of their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmergeError::Transport { retryable, .. } => *retryable,
            EmergeError::Validation { .. } => false,
            EmergeError::Integrity { .. } => false,
            EmergeError::Capacity { .. } => false,
            EmergeError::PartFailure { .. } => false,
            EmergeError::Cancelled => false,
            EmergeError::Io { .. } => false,
        }
    }

    /// Create an I/O error tagged with the source it came from.
    pub fn from_io(source_id: impl Into<String>, err: std::io::Error) -> Self {
        EmergeError::Io {
            source_id: source_id.into(),
            message: err.to_string(),
        }
    }

    /// Create a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        EmergeError::Validation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_retryable_transport_is_retryable() {
        let busy = EmergeError::Transport {
            message: "upload endpoint busy".to_string(),
            retryable: true,
        };
        assert!(busy.is_retryable());

        let hard = EmergeError::Transport {
            message: "certificate rejected".to_string(),
            retryable: false,
        };
        assert!(!hard.is_retryable());

        let integrity = EmergeError::Integrity {
            part_number: 3,
            message: "sha1 mismatch".to_string(),
        };
        assert!(!integrity.is_retryable());
        assert!(!EmergeError::Cancelled.is_retryable());
        assert!(!EmergeError::validation("bad name").is_retryable());
    }

    #[test]
    fn test_part_failure_carries_context() {
        let err = EmergeError::PartFailure {
            part_number: 7,
            source_id: "file:/tmp/payload.bin".to_string(),
            cause: Box::new(EmergeError::Integrity {
                part_number: 7,
                message: "sha1 mismatch".to_string(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("7"));
        assert!(text.contains("payload.bin"));
    }
}
