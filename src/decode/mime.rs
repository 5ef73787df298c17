//! Multipart body tracking
//!
//! Holds the state needed to follow a `multipart/*` body across sections:
//! the boundary announced in Content-Type and how far the body has gotten.
//! Part contents are handed to file processing elsewhere.

/// Longest boundary RFC 2046 allows
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Progress through a multipart body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimePhase {
    /// Before the first delimiter
    Preamble,
    /// Inside a part
    Part,
    /// After the closing delimiter
    Epilogue,
}

/// Per-direction multipart decode state
#[derive(Debug, Clone)]
pub struct MimeSession {
    boundary: Vec<u8>,
    phase: MimePhase,
    parts_seen: u32,
}

impl MimeSession {
    /// Build from a Content-Type value. Only multipart types carrying a
    /// usable boundary parameter get a session.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mut params = content_type.split(';');
        let media_type = params.next()?.trim();
        if !media_type
            .get(..10)
            .is_some_and(|p| p.eq_ignore_ascii_case("multipart/"))
        {
            return None;
        }

        let boundary = params.find_map(|p| {
            let (name, value) = p.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"'))
        })?;

        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
            return None;
        }

        Some(Self {
            boundary: boundary.as_bytes().to_vec(),
            phase: MimePhase::Preamble,
            parts_seen: 0,
        })
    }

    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    pub fn phase(&self) -> MimePhase {
        self.phase
    }

    pub fn parts_seen(&self) -> u32 {
        self.parts_seen
    }

    /// Account for a delimiter line (`--boundary` or `--boundary--`)
    /// found by the body scanner.
    pub fn on_delimiter(&mut self, line: &[u8]) -> bool {
        let Some(rest) = line.strip_prefix(b"--") else {
            return false;
        };
        let Some(tail) = rest.strip_prefix(self.boundary.as_slice()) else {
            return false;
        };

        if self.phase == MimePhase::Epilogue {
            return false;
        }

        if tail.starts_with(b"--") {
            self.phase = MimePhase::Epilogue;
        } else {
            self.phase = MimePhase::Part;
            self.parts_seen += 1;
        }
        true
    }
}
