//! `Range` header parsing.

use thiserror::Error;

/// An inclusive byte range within an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for an asset of `size` bytes.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    /// Not a byte range we understand; the header is ignored.
    #[error("malformed range header")]
    Malformed,
    /// Well-formed but nothing in the asset can satisfy it.
    #[error("range not satisfiable")]
    Unsatisfiable,
}

fn parse_bound(value: &str) -> Result<u64, RangeError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed);
    }
    // Absurdly large values saturate and get clamped below.
    Ok(value.parse().unwrap_or(u64::MAX))
}

/// Resolve a `Range` header against an asset of `size` bytes.
///
/// Supported forms: `bytes=a-b`, `bytes=a-` and `bytes=-n`. Bounds are
/// clamped into `[0, size - 1]`; a suffix longer than the asset covers the
/// whole asset. Only the first range of a multi-range request is honored.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let header = header.trim();
    let spec = header
        .get(..6)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
        .map(|_| &header[6..])
        .ok_or(RangeError::Malformed)?;
    let first = spec.split(',').next().unwrap_or_default().trim();
    let (start, end) = first.split_once('-').ok_or(RangeError::Malformed)?;

    let (start, end) = match (start.trim().is_empty(), end.trim().is_empty()) {
        (true, true) => return Err(RangeError::Malformed),
        (true, false) => {
            let suffix = parse_bound(end)?;
            if suffix == 0 || size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            (size.saturating_sub(suffix), size - 1)
        }
        (false, true) => {
            let start = parse_bound(start)?;
            if size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            (start.min(size - 1), size - 1)
        }
        (false, false) => {
            let start = parse_bound(start)?;
            let end = parse_bound(end)?;
            if end < start {
                return Err(RangeError::Malformed);
            }
            if size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            let start = start.min(size - 1);
            (start, end.clamp(start, size - 1))
        }
    };

    Ok(ByteRange { start, end })
}
