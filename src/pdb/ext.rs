// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Row types of the extension database (`exportExt.pdb`).
//!
//! The extension database shares the page format of the main database but uses its own table
//! type codes. Only two of its tables have been studied: tags (which double as tag categories)
//! and the junction table linking tags to tracks.

use crate::pdb::string::DeviceSqlString;
use crate::pdb::{current_offset, TrackId};
use binrw::{binread, binrw, io::SeekFrom, BinRead, BinResult};

/// Identifies a tag or tag category.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct TagId(pub u32);

/// The type of pages found inside a `Table` of the extension database.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ExtPageType {
    /// Holds rows of tags and tag categories, for categorizing tracks.
    #[brw(magic = 3u32)]
    Tags,
    /// Holds the associations between tags and tracks.
    #[brw(magic = 4u32)]
    TagTracks,
    /// Unknown page type.
    Unknown(u32),
}

/// Read the three string offsets of a tag row, whose width depends on the row subtype.
#[binrw::parser(reader, endian)]
fn parse_tag_offsets(subtype: u16) -> BinResult<[u16; 3]> {
    let mut offsets = [0u16; 3];
    for offset in &mut offsets {
        *offset = if subtype == 0x60 {
            u16::from(u8::read_options(reader, endian, ())?)
        } else {
            u16::read_options(reader, endian, ())?
        };
    }
    Ok(offsets)
}

/// Read a string at the given offset from the row start, restoring the stream position.
///
/// A slot that points outside the readable range decodes to the empty string instead of failing
/// the row.
#[binrw::parser(reader, endian)]
fn parse_string_at(base: u64, offset: u16) -> BinResult<DeviceSqlString> {
    let position = reader.stream_position()?;
    reader.seek(SeekFrom::Start(base + u64::from(offset)))?;
    let string = match DeviceSqlString::read_options(reader, endian, ()) {
        Ok(string) => string,
        Err(err) => {
            tracing::warn!(offset, %err, "unreadable tag string slot, decoding as empty string");
            DeviceSqlString::empty()
        }
    };
    reader.seek(SeekFrom::Start(position))?;
    Ok(string)
}

/// A tag or tag category that can be assigned to tracks for the purpose of categorization.
///
/// Category rows and tag rows share this layout; [`Tag::is_category`] tells them apart.
#[binread]
#[derive(Debug, PartialEq, Eq, Clone)]
#[br(little)]
pub struct Tag {
    /// Position of the start of this row (needed for offset calculations).
    ///
    /// **Note:** This is a virtual field and not actually read from the file.
    #[br(temp, parse_with = current_offset)]
    base_offset: u64,
    /// Determines if the string offsets are stored as one byte (0x60) or two bytes (0x64).
    pub subtype: u16,
    /// Unknown field, usually incrementing by `0x20` per row.
    pub index_shift: u16,
    /// Unknown field, not always zero.
    pub unknown1: u32,
    /// Unknown field, not always zero.
    pub unknown2: u32,
    /// ID of the category this tag belongs to (zero for category rows).
    pub category_id: TagId,
    /// Zero-based position at which this tag should be displayed within its category.
    ///
    /// If the row represents a category rather than a tag, then this is the zero-based position
    /// of the category itself within the category list.
    pub position: u32,
    /// ID of this row.
    pub id: TagId,
    /// Non-zero if this row represents a category.
    raw_is_category: u32,
    /// Offsets of the string slots, relative to the row start.
    #[br(args(subtype), parse_with = parse_tag_offsets)]
    #[allow(dead_code)]
    offsets: [u16; 3],
    /// Name of the tag or category.
    #[br(args(base_offset, offsets[1]), parse_with = parse_string_at)]
    pub name: DeviceSqlString,
    /// Unknown string slot.
    #[br(args(base_offset, offsets[2]), parse_with = parse_string_at)]
    pub unknown_string: DeviceSqlString,
}

impl Tag {
    /// Indicates whether the row is a category or an ordinary tag.
    #[must_use]
    pub fn is_category(&self) -> bool {
        self.raw_is_category > 0
    }
}

/// M*N junction table between tags and tracks.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct TagTrack {
    /// ID of the tagged track.
    #[brw(magic(0u32))]
    pub track_id: TrackId,
    /// ID of the tag assigned to the track.
    pub tag_id: TagId,
    /// Unknown field, apparently always 3.
    pub unknown_const: u32,
}
