//! Virtual concatenation of independently opened streams.

use std::io::{self, Read};
use std::sync::Arc;

use crate::traits::StreamOpener;

/// Reads a sequence of stream openers as one continuous stream.
///
/// Components are opened lazily when the read cursor reaches them and
/// dropped as soon as they are exhausted, so at most one component stream
/// is live at a time. Sequential access only. A component that ends
/// before its declared length is an error, not a silent truncation, and
/// a component is never read past its declared length.
///
/// Re-reading from the start means constructing a new `ChainedStream`
/// from the same openers; openers must therefore reproduce byte-identical
/// content on every call.
pub struct ChainedStream {
    openers: Vec<Arc<dyn StreamOpener>>,
    index: usize,
    current: Option<Box<dyn Read + Send>>,
    produced_in_current: u64,
}

impl ChainedStream {
    /// Chain the given openers in order.
    pub fn new(openers: Vec<Arc<dyn StreamOpener>>) -> Self {
        Self {
            openers,
            index: 0,
            current: None,
            produced_in_current: 0,
        }
    }

    /// Total number of bytes the chain will yield.
    pub fn total_length(&self) -> u64 {
        self.openers.iter().map(|o| o.stream_length()).sum()
    }

    fn advance(&mut self) {
        self.current = None;
        self.produced_in_current = 0;
        self.index += 1;
    }
}

impl Read for ChainedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let Some(opener) = self.openers.get(self.index) else {
                return Ok(0);
            };
            let expected: u64 = opener.stream_length();
            let remaining: u64 = expected - self.produced_in_current;
            if remaining == 0 {
                self.advance();
                continue;
            }

            if self.current.is_none() {
                let stream = opener
                    .open_stream()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                self.current = Some(stream);
            }

            let to_read: usize = buf.len().min(remaining as usize);
            let stream = self.current.as_mut().expect("component stream is open");
            let bytes_read: usize = stream.read(&mut buf[..to_read])?;
            if bytes_read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "chained component {} ended after {} of {} bytes",
                        self.index, self.produced_in_current, expected
                    ),
                ));
            }

            self.produced_in_current += bytes_read as u64;
            if self.produced_in_current == expected {
                self.advance();
            }
            return Ok(bytes_read);
        }
    }
}
