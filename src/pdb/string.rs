// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! `binrw`-based implementation of the polymorphic string type used throughout the collection
//! database, capable of parsing and serializing [`DeviceSqlString`]s.
//!
//! A leading length-and-kind byte selects one of three encodings: short ASCII (length packed into
//! the kind byte), long ASCII and long UTF-16LE (explicit 16-bit length). A fourth on-disk shape
//! is the mangled ISRC form that shares the UTF-16LE kind byte. Unrecognized kind bytes decode to
//! the empty string with a logged warning instead of failing the row.

use binrw::{binrw, BinResult, NullString};
use std::fmt;

const MAX_SHORTSTR_SIZE: usize = ((u8::MAX >> 1) - 1) as usize;

/// Encapsulates the intrinsics of the string format used by the collection database.
///
/// Once a [`DeviceSqlString`] has been constructed, there is no way to change it.
///
/// ```
/// # pub fn main() -> binrw::BinResult<()> {
/// use deckcrate::pdb::string::DeviceSqlString;
/// use binrw::{BinWrite, BinRead};
/// let string = DeviceSqlString::new("dj".to_owned());
/// let binary = vec![0x7, 0x64, 0x6A];
///
/// let mut writer = binrw::io::Cursor::new(vec![]);
/// string.write(&mut writer)?;
/// assert_eq!(&binary, writer.get_ref());
///
/// let mut reader = binrw::io::Cursor::new(binary);
/// let parsed = DeviceSqlString::read(&mut reader)?;
/// assert_eq!(parsed, string);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
#[binrw]
#[brw(little)]
pub struct DeviceSqlString(DeviceSqlStringImpl);

impl DeviceSqlString {
    /// Initializes a [`DeviceSqlString`] from a plain Rust [`std::string::String`].
    #[must_use]
    pub fn new(string: String) -> Self {
        let len = string.len();
        let only_ascii = string.is_ascii();
        if only_ascii && len <= MAX_SHORTSTR_SIZE {
            Self(DeviceSqlStringImpl::ShortAscii {
                content: string.into_bytes(),
            })
        } else if only_ascii && len <= (i16::MAX as usize) {
            Self(DeviceSqlStringImpl::Long {
                content: LongBody::Ascii(string.into_bytes()),
            })
        } else {
            // The database encoding may only support UCS-2, so characters outside the BMP would
            // need additional filtering here.
            Self(DeviceSqlStringImpl::Long {
                content: LongBody::Ucs2Le(string.encode_utf16().collect()),
            })
        }
    }

    /// Creates a [`DeviceSqlString`] containing an ISRC instead of an ordinary string.
    ///
    /// The database serializes a track's ISRC (International Standard Recording Code) in an
    /// unexpected format: the UTF-16LE kind byte followed by a marker byte and a NUL-terminated
    /// ASCII body. Use this constructor to reproduce that shape.
    #[must_use]
    pub fn new_isrc(string: String) -> Self {
        if string.is_empty() {
            return Self::empty();
        }
        debug_assert!(string.is_ascii());
        debug_assert_eq!(string.len(), 12);
        Self(DeviceSqlStringImpl::Long {
            content: LongBody::Isrc(NullString::from(string)),
        })
    }

    /// Create an empty [`DeviceSqlString`].
    #[must_use]
    pub const fn empty() -> Self {
        Self(DeviceSqlStringImpl::ShortAscii {
            content: Vec::new(),
        })
    }

    /// Decode the string.
    ///
    /// Trailing NUL characters are stripped. Bytes that are not valid for the declared encoding
    /// are replaced with U+FFFD; unknown encodings yield the empty string.
    #[must_use]
    pub fn as_string(&self) -> String {
        let decoded = match &self.0 {
            DeviceSqlStringImpl::ShortAscii { content }
            | DeviceSqlStringImpl::Long {
                content: LongBody::Ascii(content),
            } => String::from_utf8_lossy(content).into_owned(),
            DeviceSqlStringImpl::Long {
                content: LongBody::Isrc(string),
            } => String::from_utf8_lossy(string).into_owned(),
            DeviceSqlStringImpl::Long {
                content: LongBody::Ucs2Le(units),
            } => String::from_utf16_lossy(units),
            DeviceSqlStringImpl::Unknown { .. } => String::new(),
        };
        match decoded.find('\0') {
            Some(_) => decoded.trim_end_matches('\0').to_string(),
            None => decoded,
        }
    }

    /// Extract the Rust string, consuming the [`DeviceSqlString`].
    #[must_use]
    pub fn into_string(self) -> String {
        self.as_string()
    }

    /// Returns `true` if the decoded string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            DeviceSqlStringImpl::ShortAscii { content } => content.is_empty(),
            DeviceSqlStringImpl::Long { content } => content.byte_count() == 0,
            DeviceSqlStringImpl::Unknown { .. } => true,
        }
    }
}

impl fmt::Display for DeviceSqlString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

#[binrw::parser(reader)]
fn parse_unknown_kind() -> BinResult<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    tracing::warn!(
        kind = byte[0],
        "unknown device string encoding, decoding as empty string"
    );
    Ok(byte[0])
}

/// The on-disk shapes of a string value.
///
/// This implementation forces them to be immutable for now.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
enum DeviceSqlStringImpl {
    /// Short-string optimization case.
    ShortAscii {
        // To differentiate between the variants, we test the LSB of the first byte (`header`
        // here, `flags` in Long). If it is set, the string being parsed is of the short ASCII
        // kind, otherwise it is one of the long forms.
        #[br(temp, assert(header & 0b1 == 1 && header >= 3))]
        #[bw(calc = (((content.len() + 1) << 1) | 1) as u8)]
        header: u8,

        #[br(count = (header >> 1) - 1)]
        content: Vec<u8>,
    },
    /// Regular long form strings, containing possibly different encodings.
    Long {
        #[br(temp)]
        #[br(assert(flags & 0b1 == 0))]
        #[bw(calc = content.flags())]
        flags: u8,

        #[br(temp, assert(length >= 4))]
        #[bw(calc = content.byte_count() + 4)]
        length: u16,

        #[brw(magic(0u8))] // padding
        #[br(args(flags, length - 4))]
        content: LongBody,
    },
    /// Unrecognized length-and-kind byte. Decodes to the empty string.
    Unknown {
        #[br(parse_with = parse_unknown_kind)]
        kind: u8,
    },
}

#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
#[br(import(flags: u8, len: u16))]
enum LongBody {
    // Ordering is important: otherwise UCS-2 strings could be parsed instead of the stricter
    // ISRC form, which shares the 0x90 kind byte.
    #[br(pre_assert(flags == 0x90))]
    Isrc(#[brw(magic = 0x3u8)] NullString),
    #[br(pre_assert(flags == 0x40))]
    Ascii(#[br(count = len)] Vec<u8>),
    #[br(pre_assert(flags == 0x90))]
    #[br(pre_assert(len % 2 == 0))]
    Ucs2Le(#[br(count = len / 2)] Vec<u16>),
}

impl LongBody {
    fn byte_count(&self) -> u16 {
        match self {
            // ISRC offset compensates for the trailing NUL byte and the 0x3 marker byte.
            Self::Isrc(null_str) => null_str.len() + 2,
            Self::Ascii(buf) => buf.len(),
            Self::Ucs2Le(buf) => buf.len() * 2,
        }
        .try_into()
        .unwrap()
    }

    fn flags(&self) -> u8 {
        match self {
            Self::Ucs2Le(_) | Self::Isrc(_) => 0x90,
            Self::Ascii(_) => 0x40,
        }
    }
}

impl Default for DeviceSqlString {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::testing::test_roundtrip;
    use binrw::{BinRead, BinWrite};

    #[test]
    fn default_string() {
        test_roundtrip(&[0x3], DeviceSqlString::default());
    }

    #[test]
    fn short_ascii_string() {
        test_roundtrip(
            &[0x9, 0x63, 0x75, 0x65],
            DeviceSqlString::new("cue".to_owned()),
        );
    }

    #[test]
    fn long_ascii_string() {
        // 138 characters, too long for the short-string optimization.
        let long_string = "The quick brown fox jumps over the lazy dog while the band plays a steady four to the floor beat and the crowd keeps dancing until sunrise";
        assert_eq!(long_string.len(), 138);
        let mut serialized = vec![0x40, 0x8E, 0x00, 0x00];
        serialized.extend_from_slice(long_string.as_bytes());
        test_roundtrip(&serialized, DeviceSqlString::new(long_string.to_owned()));
    }

    #[test]
    fn non_ascii() {
        let serialized = [
            0x90, 0x0E, 0x00, 0x00, 0x44, 0x00, 0x4A, 0x00, 0x20, 0x00, 0xFB, 0x96, 0xCA, 0x8E,
        ];
        test_roundtrip(&serialized, DeviceSqlString::new("DJ 電車".to_string()));
    }

    #[test]
    fn utf16_consumes_length_bytes() {
        // "Hi" + NUL as UTF-16LE: 1 kind byte, 2 length bytes, 1 pad byte, 8 body bytes.
        let serialized = [
            0x90, 0x0C, 0x00, 0x00, 0x48, 0x00, 0x69, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let mut cursor = binrw::io::Cursor::new(serialized.as_slice());
        let parsed = DeviceSqlString::read(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 12);
        // The trailing NUL units are preserved on disk but stripped by the accessor.
        assert_eq!(parsed.as_string(), "Hi");
    }

    #[test]
    fn isrc_edge_case() {
        let serialized = [
            0x90, 0x12, 0x00, 0x00, 0x03, 0x55, 0x53, 0x4D, 0x43, 0x31, 0x38, 0x36, 0x32, 0x30,
            0x34, 0x35, 0x39, 0x00,
        ];
        test_roundtrip(
            &serialized,
            DeviceSqlString::new_isrc("USMC18620459".to_string()),
        );
        test_roundtrip(&[0x3], DeviceSqlString::new_isrc("".to_string()));
    }

    #[test]
    fn unknown_kind_yields_empty_string() {
        let serialized = [0x20, 0xFF, 0xFF];
        let mut cursor = binrw::io::Cursor::new(serialized.as_slice());
        let parsed = DeviceSqlString::read(&mut cursor).unwrap();
        assert_eq!(parsed.as_string(), "");
        assert!(parsed.is_empty());
        // Only the kind byte is consumed, and it is preserved when re-encoding.
        assert_eq!(cursor.position(), 1);
        let mut writer = binrw::io::Cursor::new(vec![]);
        parsed.write(&mut writer).unwrap();
        assert_eq!(writer.get_ref().as_slice(), &[0x20]);
    }
}
