// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Common types used in multiple modules.

use binrw::binrw;
use thiserror::Error;

/// Result type alias that uses the crate-wide [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding an export.
///
/// Only conditions that abort the current file surface here; recoverable conditions (unknown
/// string encodings, unknown tag types, malformed individual cue entries, dangling foreign keys)
/// are logged and decoding continues.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Underlying I/O failure while opening or reading a file.
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    /// A read went past the end of the byte source.
    #[error("unexpected end of data at offset {at:#x} ({needed} more bytes needed)")]
    Truncated {
        /// Offset at which the read started.
        at: u64,
        /// Number of bytes that were missing.
        needed: u64,
    },
    /// The file does not start with the expected magic value.
    #[error("bad magic at offset {at:#x}: {found}")]
    BadMagic {
        /// Offset of the magic value.
        at: u64,
        /// Description of the expected and encountered values.
        found: String,
    },
    /// A table type occurs more than once in the database header.
    #[error("duplicate table of type {page_type}")]
    DuplicateTable {
        /// The offending table type.
        page_type: String,
    },
    /// A page could not be decoded (truncated, cyclic chain, inconsistent header).
    #[error("malformed page {page_index} at offset {at:#x}: {reason}")]
    MalformedPage {
        /// Index of the offending page.
        page_index: u32,
        /// File offset of the page.
        at: u64,
        /// Description of the problem.
        reason: String,
    },
    /// A row could not be decoded (offset out of bounds, overrun, undecodable body).
    #[error("malformed row at offset {at:#x}: {reason}")]
    MalformedRow {
        /// File offset of the row.
        at: u64,
        /// Description of the problem.
        reason: String,
    },
    /// An analysis file section could not be decoded.
    #[error("malformed tag at offset {at:#x}: {reason}")]
    MalformedTag {
        /// File offset of the section.
        at: u64,
        /// Description of the problem.
        reason: String,
    },
}

impl Error {
    pub(crate) fn malformed_page(page_index: u32, at: u64, reason: impl ToString) -> Self {
        Self::MalformedPage {
            page_index,
            at,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed_row(at: u64, reason: impl ToString) -> Self {
        Self::MalformedRow {
            at,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed_tag(at: u64, reason: impl ToString) -> Self {
        Self::MalformedTag {
            at,
            reason: reason.to_string(),
        }
    }
}

impl From<binrw::Error> for Error {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(err) => Self::Io(err),
            binrw::Error::BadMagic { pos, found } => Self::BadMagic {
                at: pos,
                found: format!("{found:?}"),
            },
            err => {
                let at = match &err {
                    binrw::Error::AssertFail { pos, .. }
                    | binrw::Error::Custom { pos, .. }
                    | binrw::Error::NoVariantMatch { pos }
                    | binrw::Error::EnumErrors { pos, .. } => *pos,
                    _ => 0,
                };
                Self::MalformedRow {
                    at,
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Indexed color identifiers used for memory cues and tracks.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum ColorIndex {
    /// No color.
    #[brw(magic = 0u8)]
    None,
    /// Pink color.
    #[brw(magic = 1u8)]
    Pink,
    /// Red color.
    #[brw(magic = 2u8)]
    Red,
    /// Orange color.
    #[brw(magic = 3u8)]
    Orange,
    /// Yellow color.
    #[brw(magic = 4u8)]
    Yellow,
    /// Green color.
    #[brw(magic = 5u8)]
    Green,
    /// Aqua color.
    #[brw(magic = 6u8)]
    Aqua,
    /// Blue color.
    #[brw(magic = 7u8)]
    Blue,
    /// Purple color.
    #[brw(magic = 8u8)]
    Purple,
    /// Color identifier outside the documented palette.
    Unknown(u8),
}
