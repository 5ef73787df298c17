//! Streaming decompressor owned by one direction of a flow
//!
//! A context lives from the start of a compressed body until the next
//! message boundary (or trailer), and must be ended before the slot that
//! owns it is reused.

use crate::enums::CompressionMode;
use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, warn};

/// Largest deflate window, 32 KiB
const MAX_WINDOW_BITS: u8 = 15;

/// One inflate stream
pub struct CompressionContext {
    mode: CompressionMode,
    inflater: Decompress,
    stream_end: bool,
}

/// Progress made by a single [`CompressionContext::decompress`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inflated {
    pub consumed: usize,
    pub produced: usize,
    pub stream_end: bool,
}

/// Byte counts reported when a stream is ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTotals {
    pub total_in: u64,
    pub total_out: u64,
    pub complete: bool,
}

impl CompressionContext {
    /// Start a stream for `mode`. There is no context for uncompressed bodies.
    ///
    /// Deflate bodies carry a zlib wrapper, gzip bodies a gzip member header
    /// and trailer. Both wrappers are handled by the inflater.
    pub fn new(mode: CompressionMode) -> Option<Self> {
        let inflater = match mode {
            CompressionMode::None => return None,
            CompressionMode::Gzip => Decompress::new_gzip(MAX_WINDOW_BITS),
            CompressionMode::Deflate => Decompress::new(true),
        };

        Some(Self {
            mode,
            inflater,
            stream_end: false,
        })
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    pub fn is_stream_end(&self) -> bool {
        self.stream_end
    }

    /// Inflate as much of `input` into `output` as fits
    pub fn decompress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Inflated, DecompressError> {
        if self.stream_end {
            return Ok(Inflated {
                consumed: 0,
                produced: 0,
                stream_end: true,
            });
        }

        let before_in = self.inflater.total_in();
        let before_out = self.inflater.total_out();

        let status = self
            .inflater
            .decompress(input, output, FlushDecompress::Sync)
            .map_err(|e| DecompressError::Corrupt(e.to_string()))?;

        if status == Status::StreamEnd {
            self.stream_end = true;
        }

        Ok(Inflated {
            consumed: (self.inflater.total_in() - before_in) as usize,
            produced: (self.inflater.total_out() - before_out) as usize,
            stream_end: self.stream_end,
        })
    }

    /// Finalize the stream and release it
    ///
    /// A stream cut short is not an error here: the body simply ended
    /// early, which the parser reports on its own.
    pub fn end(self) -> StreamTotals {
        let totals = StreamTotals {
            total_in: self.inflater.total_in(),
            total_out: self.inflater.total_out(),
            complete: self.stream_end,
        };

        if totals.complete {
            debug!(
                "{:?} stream ended: {} bytes in, {} bytes out",
                self.mode, totals.total_in, totals.total_out
            );
        } else {
            warn!(
                "{:?} stream released before end of stream after {} bytes in",
                self.mode, totals.total_in
            );
        }

        totals
    }
}

impl std::fmt::Debug for CompressionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionContext")
            .field("mode", &self.mode)
            .field("total_in", &self.inflater.total_in())
            .field("total_out", &self.inflater.total_out())
            .field("stream_end", &self.stream_end)
            .finish()
    }
}

/// Decompression errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecompressError {
    /// The compressed stream is malformed
    Corrupt(String),
}

impl std::fmt::Display for DecompressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecompressError::Corrupt(e) => write!(f, "Corrupt compressed stream: {}", e),
        }
    }
}

impl std::error::Error for DecompressError {}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_no_context_for_identity() {
        assert!(CompressionContext::new(CompressionMode::None).is_none());
    }

    #[test]
    fn test_deflate_stream() {
        let body = b"hello hello hello hello world";
        let compressed = zlib(body);

        let mut ctx = CompressionContext::new(CompressionMode::Deflate).unwrap();
        let mut out = [0u8; 256];
        let step = ctx.decompress(&compressed, &mut out).unwrap();

        assert_eq!(step.consumed, compressed.len());
        assert_eq!(&out[..step.produced], body);
        assert!(step.stream_end);

        let totals = ctx.end();
        assert!(totals.complete);
        assert_eq!(totals.total_out, body.len() as u64);
    }

    #[test]
    fn test_gzip_body() {
        let body = b"<html>gzip coded response body</html>";
        let compressed = gzip(body);

        let mut ctx = CompressionContext::new(CompressionMode::Gzip).unwrap();
        let mut out = [0u8; 256];
        let step = ctx.decompress(&compressed, &mut out).unwrap();

        assert_eq!(&out[..step.produced], body);
        assert_eq!(step.consumed, compressed.len());
        assert!(step.stream_end);
        assert!(ctx.end().complete);
    }

    #[test]
    fn test_gzip_split_inside_header() {
        let body = b"split across two sections of a chunked body";
        let compressed = gzip(body);

        // The gzip member header alone is ten bytes
        let (first, second) = compressed.split_at(4);

        let mut ctx = CompressionContext::new(CompressionMode::Gzip).unwrap();
        let mut out = vec![0u8; 256];
        let a = ctx.decompress(first, &mut out).unwrap();
        assert_eq!(a.consumed, first.len());
        assert_eq!(a.produced, 0);

        let b = ctx.decompress(second, &mut out).unwrap();
        assert!(b.stream_end);
        assert_eq!(&out[..b.produced], body);
    }

    #[test]
    fn test_gzip_rejects_zlib_stream() {
        let mut ctx = CompressionContext::new(CompressionMode::Gzip).unwrap();
        let mut out = [0u8; 64];
        let result = ctx.decompress(&zlib(b"not a gzip member"), &mut out);
        assert!(matches!(result, Err(DecompressError::Corrupt(_))));
    }

    #[test]
    fn test_corrupt_stream() {
        let mut ctx = CompressionContext::new(CompressionMode::Deflate).unwrap();
        let mut out = [0u8; 64];
        let result = ctx.decompress(&[0xff, 0xff, 0xff, 0xff], &mut out);
        assert!(matches!(result, Err(DecompressError::Corrupt(_))));
    }

    #[test]
    fn test_end_incomplete_stream() {
        let compressed = zlib(b"truncated body");
        let mut ctx = CompressionContext::new(CompressionMode::Deflate).unwrap();
        let mut out = [0u8; 64];
        ctx.decompress(&compressed[..4], &mut out).unwrap();

        let totals = ctx.end();
        assert!(!totals.complete);
    }
}
