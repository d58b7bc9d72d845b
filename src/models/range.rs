//! Client `Range` header parsing.

use crate::models::object::{ByteSpan, ObjectRange};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("range header is not valid text")]
    NotText,
    #[error("range header `{0}` does not match bytes=<start>-<end>")]
    Malformed(String),
    #[error("range end {end} precedes start {start}")]
    Inverted { start: u64, end: u64 },
}

/// A single inclusive byte range requested by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// `None` means "to the end of the object".
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse `bytes=<start>-<end>?`. Only ASCII digits are accepted and only a
    /// single range; suffix ranges (`bytes=-N`) are rejected.
    pub fn parse(value: &str) -> Result<Self, RangeParseError> {
        let malformed = || RangeParseError::Malformed(value.to_string());

        let spec = value.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
        let (start, end) = spec.split_once('-').ok_or_else(malformed)?;

        let start = parse_digits(start).ok_or_else(malformed)?;
        let end = if end.is_empty() {
            None
        } else {
            Some(parse_digits(end).ok_or_else(malformed)?)
        };

        if let Some(end) = end {
            if end < start {
                return Err(RangeParseError::Inverted { start, end });
            }
        }
        Ok(Self { start, end })
    }

    /// Offset/length form used when a store rejects the raw header. An end
    /// too large to express as a length reads to the end of the object.
    pub fn to_object_range(self) -> ObjectRange {
        ObjectRange::Offset {
            offset: self.start,
            length: self
                .end
                .and_then(|end| end.checked_sub(self.start))
                .and_then(|span| span.checked_add(1)),
        }
    }

    /// Resolve against a known object size, clamping the end to the last byte.
    pub fn span(self, total: u64) -> ByteSpan {
        let last = total.saturating_sub(1);
        let end = self.end.map(|end| end.min(last)).unwrap_or(last);
        ByteSpan {
            offset: self.start,
            length: (end + 1).saturating_sub(self.start),
        }
    }
}

fn parse_digits(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
