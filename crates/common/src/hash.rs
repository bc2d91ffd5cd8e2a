//! SHA-1 content digest helpers.
//!
//! Part identity in the storage service is the hex SHA-1 of the part's
//! bytes, so every digest here is a 40-character lowercase hex string.

use std::io::Read;

use sha1::{Digest, Sha1};

/// Compute the hex SHA-1 digest of a byte slice.
pub fn hex_sha1_of_bytes(data: &[u8]) -> String {
    let mut hasher: Sha1 = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the hex SHA-1 digest of everything a stream yields.
///
/// Reads the stream in 64KB chunks until exhaustion, so arbitrarily large
/// streams are hashed in constant memory.
///
/// # Arguments
/// * `stream` - Readable positioned at the first byte to hash
///
/// # Returns
/// The hex digest and the total number of bytes consumed.
///
/// # Errors
/// Returns any error raised while reading the stream.
pub fn hex_sha1_of_stream<R: Read + ?Sized>(stream: &mut R) -> Result<(String, u64), std::io::Error> {
    let mut hasher: Sha1Hasher = Sha1Hasher::new();
    let mut buffer: Vec<u8> = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;

    loop {
        let bytes_read: usize = stream.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((hasher.finish_hex(), total))
}

/// Streaming hasher for incremental SHA-1 computation.
///
/// Use this when data arrives in pieces, such as hashing while copying
/// between streams.
pub struct Sha1Hasher {
    inner: Sha1,
}

impl Sha1Hasher {
    /// Create a new streaming hasher.
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    /// Update the hasher with additional data.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the digest as a 40-char hex string.
    pub fn finish_hex(self) -> String {
        format!("{:x}", self.inner.finalize())
    }
}

impl Default for Sha1Hasher {
    fn default() -> Self {
        Self::new()
    }
}
