//! Shared enumerations for HTTP flow inspection
//!
//! Every piece of per-direction state is stored in a [`PerDirection`]
//! and looked up by [`Direction`], never by a raw integer index.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Side of the flow that produced a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server (requests)
    Client,
    /// Server to client (responses)
    Server,
}

impl Direction {
    /// Both directions, client first
    pub const BOTH: [Direction; 2] = [Direction::Client, Direction::Server];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Client => write!(f, "client"),
            Direction::Server => write!(f, "server"),
        }
    }
}

/// A value held once per direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerDirection<T> {
    pub client: T,
    pub server: T,
}

impl<T> PerDirection<T> {
    pub fn new(client: T, server: T) -> Self {
        Self { client, server }
    }
}

impl<T> Index<Direction> for PerDirection<T> {
    type Output = T;

    fn index(&self, direction: Direction) -> &T {
        match direction {
            Direction::Client => &self.client,
            Direction::Server => &self.server,
        }
    }
}

impl<T> IndexMut<Direction> for PerDirection<T> {
    fn index_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::Client => &mut self.client,
            Direction::Server => &mut self.server,
        }
    }
}

/// Kind of message section produced by the splitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    /// Nothing expected or in progress
    None,
    /// Request line
    Request,
    /// Status line
    Status,
    /// Header block
    Header,
    /// Body delimited by Content-Length
    BodyCl,
    /// Chunked body
    BodyChunk,
    /// Body delimited by connection close
    BodyOld,
    /// Trailer block after a chunked body
    Trailer,
}

impl SectionType {
    /// Body sections are reassembled in the shared body buffer
    pub fn is_body(self) -> bool {
        matches!(
            self,
            SectionType::BodyCl | SectionType::BodyChunk | SectionType::BodyOld
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionType::None => "None",
            SectionType::Request => "Request",
            SectionType::Status => "Status",
            SectionType::Header => "Header",
            SectionType::BodyCl => "BodyCl",
            SectionType::BodyChunk => "BodyChunk",
            SectionType::BodyOld => "BodyOld",
            SectionType::Trailer => "Trailer",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// HTTP protocol version seen on the start line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionId {
    NotPresent,
    Http09,
    Http10,
    Http11,
    Http20,
    Other,
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionId::NotPresent => "-",
            VersionId::Http09 => "0.9",
            VersionId::Http10 => "1.0",
            VersionId::Http11 => "1.1",
            VersionId::Http20 => "2.0",
            VersionId::Other => "other",
        };
        f.write_str(s)
    }
}

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodId {
    NotPresent,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Other,
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodId::NotPresent => "-",
            MethodId::Get => "GET",
            MethodId::Head => "HEAD",
            MethodId::Post => "POST",
            MethodId::Put => "PUT",
            MethodId::Delete => "DELETE",
            MethodId::Connect => "CONNECT",
            MethodId::Options => "OPTIONS",
            MethodId::Trace => "TRACE",
            MethodId::Patch => "PATCH",
            MethodId::Other => "other",
        };
        f.write_str(s)
    }
}

/// Content coding applied to a message body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    None,
    Gzip,
    Deflate,
}

/// Position of the chunked-transfer decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Waiting for a chunk-size line
    AwaitingSize,
    /// Inside chunk data
    AwaitingData,
}
