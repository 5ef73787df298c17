//! Body decode state owned by a flow
//!
//! This module provides:
//! - Streaming decompression contexts (gzip / deflate)
//! - Multipart (MIME) body tracking
//! - Response charset tracking across sections

pub mod compression;
pub mod mime;
pub mod utf;

pub use compression::{CompressionContext, DecompressError, Inflated, StreamTotals};
pub use mime::{MimePhase, MimeSession};
pub use utf::{Charset, UtfDecodeState, UtfSection};
