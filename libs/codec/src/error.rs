//! Frame decoding errors
//!
//! Both variants are recoverable: the caller drops (or holds) the bytes it
//! passed in and waits for more data from the stream. A checksum mismatch is
//! deliberately not an error; it is reported through
//! [`Packet::integrity_valid`](crate::Packet::integrity_valid) so the caller
//! can return the packet to its pool.

use std::fmt;
use thiserror::Error;

/// Which part of the frame ran past the end of the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSection {
    Header,
    Body,
    Foot,
}

impl fmt::Display for FrameSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameSection::Header => "header",
            FrameSection::Body => "body",
            FrameSection::Foot => "foot",
        };
        f.write_str(name)
    }
}

/// Reasons a byte range did not yield a frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// No syncword anywhere in the scanned bytes
    #[error("Syncword not found in {scanned} bytes")]
    SyncwordNotFound { scanned: usize },

    /// A syncword was found but the frame behind it is incomplete.
    ///
    /// `need` is the smallest frame length known so far, counted from
    /// `frame_offset`; `got` is how many bytes follow `frame_offset`.
    #[error("Frame truncated in {section}: need {need} bytes from offset {frame_offset}, got {got}")]
    BufferTooShort {
        section: FrameSection,
        frame_offset: usize,
        need: usize,
        got: usize,
    },
}

impl FrameError {
    pub fn syncword_not_found(scanned: usize) -> Self {
        Self::SyncwordNotFound { scanned }
    }

    pub fn buffer_too_short(
        section: FrameSection,
        frame_offset: usize,
        need: usize,
        got: usize,
    ) -> Self {
        Self::BufferTooShort {
            section,
            frame_offset,
            need,
            got,
        }
    }

    /// Offset of the incomplete frame, if one was located
    pub fn partial_frame_offset(&self) -> Option<usize> {
        match self {
            Self::SyncwordNotFound { .. } => None,
            Self::BufferTooShort { frame_offset, .. } => Some(*frame_offset),
        }
    }
}

/// Result type for decoding operations
pub type FrameResult<T> = std::result::Result<T, FrameError>;
