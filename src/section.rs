//! Section reassembly buffers and the splitter seam
//!
//! Header-type sections are reassembled in a buffer owned by the flow.
//! Body sections are reassembled in one shared per-thread buffer instead,
//! so a flow holding a body section only borrows it.

use crate::enums::SectionType;
use std::cell::RefCell;

/// Size of the shared body reassembly buffer
pub const BODY_BUFFER_SIZE: usize = 64 * 1024;

thread_local! {
    static BODY_BUFFER: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(BODY_BUFFER_SIZE));
}

/// Run `f` against the shared body reassembly buffer
pub fn with_body_buffer<R>(f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    BODY_BUFFER.with(|b| f(&mut b.borrow_mut()))
}

/// Where the current section of one direction is being reassembled
#[derive(Debug, Default)]
pub enum SectionBuffer {
    /// Nothing being reassembled
    #[default]
    Empty,
    /// Buffer owned by this flow
    Owned(Vec<u8>),
    /// Alias of the shared body reassembly buffer
    SharedBody,
}

impl SectionBuffer {
    /// Pick the right kind of buffer for a section type. A body section
    /// takes over the shared buffer, discarding whatever it held.
    pub fn for_section(section_type: SectionType, capacity: usize) -> Self {
        if section_type.is_body() {
            with_body_buffer(|buf| buf.clear());
            SectionBuffer::SharedBody
        } else {
            SectionBuffer::Owned(Vec::with_capacity(capacity))
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, SectionBuffer::Owned(_))
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, SectionBuffer::SharedBody)
    }

    /// Append section bytes, returning how many were taken. The shared
    /// body buffer never grows past [`BODY_BUFFER_SIZE`].
    pub fn append(&mut self, data: &[u8]) -> usize {
        match self {
            SectionBuffer::Empty => {
                *self = SectionBuffer::Owned(data.to_vec());
                data.len()
            }
            SectionBuffer::Owned(buf) => {
                buf.extend_from_slice(data);
                data.len()
            }
            SectionBuffer::SharedBody => with_body_buffer(|buf| {
                let room = BODY_BUFFER_SIZE.saturating_sub(buf.len());
                let taken = data.len().min(room);
                buf.extend_from_slice(&data[..taken]);
                taken
            }),
        }
    }

    /// Bytes reassembled so far
    pub fn len(&self) -> usize {
        match self {
            SectionBuffer::Empty => 0,
            SectionBuffer::Owned(buf) => buf.len(),
            SectionBuffer::SharedBody => with_body_buffer(|buf| buf.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Give up this flow's hold on the buffer. Owned storage is freed,
    /// the shared body buffer is left alone for whoever uses it next.
    /// Returns the number of owned bytes freed.
    pub fn release(&mut self) -> usize {
        match std::mem::take(self) {
            SectionBuffer::Owned(buf) => buf.capacity(),
            SectionBuffer::Empty | SectionBuffer::SharedBody => 0,
        }
    }
}

/// Result of scanning bytes for a section boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitResult {
    /// Boundary not found yet, keep accumulating
    Search,
    /// Section ends after this many bytes of the scanned data
    Flush(usize),
    /// Stream cannot be parsed as HTTP
    Abort,
}

/// Finds section boundaries in one direction of a flow.
///
/// Flow state owns one per direction and releases it at teardown but
/// never drives it.
pub trait Splitter {
    /// Scan newly arrived bytes
    fn scan(&mut self, data: &[u8]) -> SplitResult;

    /// Section the splitter is currently looking for
    fn section_type(&self) -> SectionType;
}
