//! Byte ranges.
//!
//! A [`ByteRange`] represents a byte range relative to the start or end of a byte sequence.
//! A byte range has an offset and optional length, which if omitted means to read all remaining bytes.
//!
//! Virtual references point at a window (`offset`, `length`) inside a larger target object.
//! [`ByteRange::within`] maps a range relative to such a window onto the target object.

use std::ops::Range;

use bytes::Bytes;
use thiserror::Error;

/// A byte offset.
pub type ByteOffset = u64;

/// A byte length.
pub type ByteLength = u64;

/// A byte range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ByteRange {
    /// A byte range from the start.
    ///
    /// If the byte length is [`None`], reads to the end of the value.
    FromStart(ByteOffset, Option<ByteLength>),
    /// A byte range from the end.
    ///
    /// If the byte length is [`None`], reads to the start of the value.
    FromEnd(ByteOffset, Option<ByteLength>),
}

impl ByteRange {
    /// A byte range covering an entire value.
    pub const ALL: Self = Self::FromStart(0, None);

    /// Return the start of a byte range. `size` is the size of the entire bytes.
    #[must_use]
    pub fn start(&self, size: u64) -> u64 {
        match self {
            Self::FromStart(offset, _) => *offset,
            Self::FromEnd(offset, length) => {
                length.as_ref().map_or(0, |length| size - *offset - *length)
            }
        }
    }

    /// Return the exclusive end of a byte range. `size` is the size of the entire bytes.
    #[must_use]
    pub fn end(&self, size: u64) -> u64 {
        match self {
            Self::FromStart(offset, length) => {
                length.as_ref().map_or(size, |length| offset + length)
            }
            Self::FromEnd(offset, _) => size - offset,
        }
    }

    /// Return the internal offset of the byte range (which can be at its start or end).
    #[must_use]
    pub const fn offset(&self) -> u64 {
        let (Self::FromStart(offset, _) | Self::FromEnd(offset, _)) = self;
        *offset
    }

    /// Return the length of a byte range. `size` is the size of the entire bytes.
    #[must_use]
    pub fn length(&self, size: u64) -> u64 {
        match self {
            Self::FromStart(offset, None) | Self::FromEnd(offset, None) => size - offset,
            Self::FromStart(_, Some(length)) | Self::FromEnd(_, Some(length)) => *length,
        }
    }

    /// Convert the byte range to a [`Range<u64>`].
    #[must_use]
    pub fn to_range(&self, size: u64) -> Range<u64> {
        self.start(size)..self.end(size)
    }

    /// Convert the byte range to a [`Range<usize>`].
    ///
    /// # Errors
    /// Returns [`InvalidByteRangeError`] if the byte range exceeds [`usize::MAX`].
    pub fn to_range_usize(&self, size: u64) -> Result<Range<usize>, InvalidByteRangeError> {
        let start = usize::try_from(self.start(size)).map_err(|_| InvalidByteRangeError(*self, size))?;
        let end = usize::try_from(self.end(size)).map_err(|_| InvalidByteRangeError(*self, size))?;
        Ok(start..end)
    }

    /// Shrink the byte range so that it does not extend beyond `size`.
    ///
    /// A range starting beyond `size` becomes empty.
    #[must_use]
    pub fn clamp(&self, size: u64) -> Self {
        match *self {
            Self::FromStart(offset, length) => {
                let offset = offset.min(size);
                let available = size - offset;
                Self::FromStart(offset, Some(length.map_or(available, |l| l.min(available))))
            }
            Self::FromEnd(offset, length) => {
                let offset = offset.min(size);
                let available = size - offset;
                Self::FromEnd(offset, Some(length.map_or(available, |l| l.min(available))))
            }
        }
    }

    /// Map a byte range relative to the window `offset..offset + length` of a larger value to an absolute byte range of that value.
    ///
    /// # Errors
    /// Returns [`InvalidByteRangeError`] if the byte range does not fit inside the window.
    pub fn within(
        &self,
        offset: ByteOffset,
        length: ByteLength,
    ) -> Result<Self, InvalidByteRangeError> {
        validate_byte_ranges(std::slice::from_ref(self), length)?;
        Ok(Self::FromStart(
            offset + self.start(length),
            Some(self.length(length)),
        ))
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Self::FromStart(offset, length) => write!(
                f,
                "{}..{}",
                if offset == &0 {
                    String::new()
                } else {
                    offset.to_string()
                },
                length.map_or(String::new(), |length| (offset + length).to_string())
            ),
            Self::FromEnd(offset, length) => write!(
                f,
                "{}..{}",
                length.map_or(String::new(), |length| format!("-{}", offset + length)),
                if offset == &0 {
                    String::new()
                } else {
                    format!("-{offset}")
                }
            ),
        }
    }
}

/// An invalid byte range error.
#[derive(Copy, Clone, Debug, Error)]
#[error("invalid byte range {0} for bytes of length {1}")]
pub struct InvalidByteRangeError(ByteRange, u64);

impl InvalidByteRangeError {
    /// Create a new [`InvalidByteRangeError`].
    #[must_use]
    pub fn new(byte_range: ByteRange, bytes_len: u64) -> Self {
        Self(byte_range, bytes_len)
    }
}

/// Check that all `byte_ranges` lie within a value of length `bytes_len`.
///
/// # Errors
/// Returns [`InvalidByteRangeError`] for the first byte range extending beyond `bytes_len`.
pub fn validate_byte_ranges(
    byte_ranges: &[ByteRange],
    bytes_len: u64,
) -> Result<(), InvalidByteRangeError> {
    for byte_range in byte_ranges {
        let valid = match byte_range {
            ByteRange::FromStart(offset, length) | ByteRange::FromEnd(offset, length) => {
                offset + length.unwrap_or(0) <= bytes_len
            }
        };
        if !valid {
            return Err(InvalidByteRangeError(*byte_range, bytes_len));
        }
    }
    Ok(())
}

/// Extract byte ranges from bytes.
///
/// The output shares the allocation of `bytes`.
///
/// # Errors
/// Returns [`InvalidByteRangeError`] if any bytes are requested beyond the end of `bytes`.
pub fn extract_byte_ranges(
    bytes: &Bytes,
    byte_ranges: &[ByteRange],
) -> Result<Vec<Bytes>, InvalidByteRangeError> {
    let size = bytes.len() as u64;
    validate_byte_ranges(byte_ranges, size)?;
    byte_ranges
        .iter()
        .map(|byte_range| Ok(bytes.slice(byte_range.to_range_usize(size)?)))
        .collect()
}
