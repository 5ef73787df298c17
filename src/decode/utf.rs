//! Response charset tracking
//!
//! A response body may be encoded in UTF-8, UTF-16 or UTF-32, announced
//! either by Content-Type or by a byte order mark. Code units can split
//! across section boundaries, so incomplete units are carried forward
//! until the next section arrives.
//!
//! UTF-8 sequence lengths by lead byte:
//! - 0xxxxxxx: 1 byte
//! - 110xxxxx: 2 bytes
//! - 1110xxxx: 3 bytes
//! - 11110xxx: 4 bytes

/// Body character encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// Not a Unicode encoding we normalize
    Unknown,
}

impl Charset {
    /// Read the `charset` parameter of a Content-Type value
    pub fn from_content_type(content_type: &str) -> Charset {
        let declared = content_type.split(';').skip(1).find_map(|p| {
            let (name, value) = p.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"'))
        });

        match declared.map(|c| c.to_ascii_lowercase()).as_deref() {
            Some("utf-8") | Some("utf8") => Charset::Utf8,
            Some("utf-16le") => Charset::Utf16Le,
            Some("utf-16be") | Some("utf-16") => Charset::Utf16Be,
            Some("utf-32le") => Charset::Utf32Le,
            Some("utf-32be") | Some("utf-32") => Charset::Utf32Be,
            _ => Charset::Unknown,
        }
    }

    /// Fixed code unit width, `None` for variable-width UTF-8
    fn unit_width(self) -> Option<usize> {
        match self {
            Charset::Utf16Le | Charset::Utf16Be => Some(2),
            Charset::Utf32Le | Charset::Utf32Be => Some(4),
            Charset::Utf8 | Charset::Unknown => None,
        }
    }
}

/// Match a byte order mark at the start of a body
fn detect_bom(bytes: &[u8]) -> Option<(Charset, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some((Charset::Utf8, 3)),
        [0xFF, 0xFE, 0x00, 0x00, ..] => Some((Charset::Utf32Le, 4)),
        [0x00, 0x00, 0xFE, 0xFF, ..] => Some((Charset::Utf32Be, 4)),
        [0xFF, 0xFE, ..] => Some((Charset::Utf16Le, 2)),
        [0xFE, 0xFF, ..] => Some((Charset::Utf16Be, 2)),
        _ => None,
    }
}

/// Response-side decode state, one per flow
#[derive(Debug, Clone)]
pub struct UtfDecodeState {
    charset: Charset,
    bom_checked: bool,
    /// Incomplete unit from the end of the previous section
    pending: [u8; 4],
    pending_len: usize,
}

/// A section split at code unit boundaries
#[derive(Debug, PartialEq, Eq)]
pub struct UtfSection<'a> {
    /// Unit completed from the previous section's leftover, if any
    pub carried: Option<Vec<u8>>,
    /// Whole units from this section
    pub body: &'a [u8],
}

impl UtfDecodeState {
    pub fn new(declared: Charset) -> Self {
        Self {
            charset: declared,
            bom_checked: false,
            pending: [0u8; 4],
            pending_len: 0,
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    /// Split the next body section. A byte order mark at the very start
    /// of the body overrides the declared charset and is stripped.
    pub fn feed<'a>(&mut self, section: &'a [u8]) -> UtfSection<'a> {
        let mut section = section;

        if !self.bom_checked && !section.is_empty() {
            self.bom_checked = true;
            if let Some((charset, len)) = detect_bom(section) {
                self.charset = charset;
                section = &section[len..];
            }
        }

        match self.charset.unit_width() {
            Some(width) => self.feed_fixed(section, width),
            None if self.charset == Charset::Utf8 => self.feed_utf8(section),
            None => UtfSection {
                carried: None,
                body: section,
            },
        }
    }

    fn feed_fixed<'a>(&mut self, section: &'a [u8], width: usize) -> UtfSection<'a> {
        let mut start = 0;
        let mut carried = None;

        if self.pending_len > 0 {
            let needed = width - self.pending_len;
            if section.len() < needed {
                self.stash(section);
                return UtfSection {
                    carried: None,
                    body: &[],
                };
            }
            let mut unit = self.pending[..self.pending_len].to_vec();
            unit.extend_from_slice(&section[..needed]);
            carried = Some(unit);
            start = needed;
            self.pending_len = 0;
        }

        let rest = &section[start..];
        let whole = rest.len() - rest.len() % width;
        self.stash(&rest[whole..]);

        UtfSection {
            carried,
            body: &rest[..whole],
        }
    }

    fn feed_utf8<'a>(&mut self, section: &'a [u8]) -> UtfSection<'a> {
        let mut start = 0;
        let mut carried = None;

        if self.pending_len > 0 {
            let expected = sequence_length(self.pending[0]);
            let needed = expected.saturating_sub(self.pending_len);
            let continuation = section
                .iter()
                .take(needed)
                .take_while(|&&b| is_continuation(b))
                .count();

            if continuation == section.len() && continuation < needed {
                // Still incomplete, keep waiting
                self.stash(section);
                return UtfSection {
                    carried: None,
                    body: &[],
                };
            }

            if continuation == needed {
                let mut seq = self.pending[..self.pending_len].to_vec();
                seq.extend_from_slice(&section[..needed]);
                if std::str::from_utf8(&seq).is_ok() {
                    carried = Some(seq);
                }
            }
            // Broken sequences are dropped along with their stray
            // continuation bytes
            start = continuation;
            self.pending_len = 0;
        }

        let rest = &section[start..];
        let end = incomplete_tail_start(rest);
        self.stash(&rest[end..]);

        UtfSection {
            carried,
            body: &rest[..end],
        }
    }

    fn stash(&mut self, bytes: &[u8]) {
        let room = self.pending.len() - self.pending_len;
        let len = bytes.len().min(room);
        self.pending[self.pending_len..self.pending_len + len].copy_from_slice(&bytes[..len]);
        self.pending_len += len;
    }
}

/// Check if byte is a UTF-8 continuation byte (10xxxxxx)
#[inline]
fn is_continuation(byte: u8) -> bool {
    (byte & 0b1100_0000) == 0b1000_0000
}

#[inline]
fn sequence_length(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Offset where an incomplete trailing UTF-8 sequence begins, or the
/// slice length when the slice ends on a boundary
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let floor = bytes.len().saturating_sub(4);
    let mut i = bytes.len();
    while i > floor {
        i -= 1;
        if !is_continuation(bytes[i]) {
            if bytes.len() - i < sequence_length(bytes[i]) {
                return i;
            }
            break;
        }
    }
    bytes.len()
}
