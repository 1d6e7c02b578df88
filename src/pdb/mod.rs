// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Parser for the paginated collection database (`export.pdb` and `exportExt.pdb`).
//!
//! DJ library software writes these files to `/PIONEER/rekordbox/export.pdb` (and
//! `exportExt.pdb` for the extension tables) when exporting a collection to removable media.
//!
//! The file consists of a small header followed by fixed-size pages. Tables are singly linked
//! chains of pages, each page holding rows of a single type. Rows are packed into the page heap
//! and addressed through groups of 16-bit offsets at the page tail, guarded by a presence bitmap
//! (see [`RowGroup`]). This module declares the bit-exact layouts; the page walking and row
//! materialization logic lives in [`io`](crate::pdb::io).

pub mod ext;
pub mod io;
pub mod string;

pub use self::ext::{ExtPageType, Tag, TagId, TagTrack};
pub use self::string::DeviceSqlString;

use crate::util::ColorIndex;
use binrw::{
    binread, binrw,
    io::{Seek, SeekFrom, Write},
    BinResult, BinWrite, Endian, FilePtr16, FilePtr8,
};
use bitflags::bitflags;

/// Do not read anything, but return the current stream position of `reader`.
#[binrw::parser(reader)]
pub(crate) fn current_offset() -> BinResult<u64> {
    Ok(reader.stream_position()?)
}

/// Selects how the table type codes of a database file are interpreted.
///
/// The plain database and the extension database share the page format but assign different
/// meanings to the same numeric table type codes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DatabaseType {
    /// The main collection database (`export.pdb`).
    Plain,
    /// The extension database (`exportExt.pdb`) holding tags and tag-track links.
    Ext,
}

/// The type of pages found inside a `Table` of the plain database.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[brw(little)]
pub enum PlainPageType {
    /// Holds rows of track metadata, such as title, artist, genre, artwork ID, playing time, etc.
    #[brw(magic = 0u32)]
    Tracks,
    /// Holds rows of musical genres, for reference by tracks and searching.
    #[brw(magic = 1u32)]
    Genres,
    /// Holds rows of artists, for reference by tracks and searching.
    #[brw(magic = 2u32)]
    Artists,
    /// Holds rows of albums, for reference by tracks and searching.
    #[brw(magic = 3u32)]
    Albums,
    /// Holds rows of music labels, for reference by tracks and searching.
    #[brw(magic = 4u32)]
    Labels,
    /// Holds rows of musical keys, for reference by tracks, searching, and key matching.
    #[brw(magic = 5u32)]
    Keys,
    /// Holds rows of color labels, for reference by tracks and searching.
    #[brw(magic = 6u32)]
    Colors,
    /// Holds rows that describe the hierarchical tree structure of available playlists and
    /// folders grouping them.
    #[brw(magic = 7u32)]
    PlaylistTree,
    /// Holds rows that link tracks to playlists, in the right order.
    #[brw(magic = 8u32)]
    PlaylistEntries,
    /// Holds rows of history playlists, i.e. playlists that are recorded every time the device
    /// is mounted by a player.
    #[brw(magic = 11u32)]
    HistoryPlaylists,
    /// Holds rows that link tracks to history playlists, in the right order.
    #[brw(magic = 12u32)]
    HistoryEntries,
    /// Holds rows pointing to album artwork images.
    #[brw(magic = 13u32)]
    Artwork,
    /// Contains the metadata categories by which tracks can be browsed.
    #[brw(magic = 16u32)]
    Columns,
    /// Holds information used to synchronize history playlists (not yet studied).
    #[brw(magic = 19u32)]
    History,
    /// Unknown page type.
    Unknown(u32),
}

/// The type of pages found inside a `Table`, qualified by the owning database type.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[brw(little)]
#[br(import(db_type: DatabaseType))]
pub enum PageType {
    /// A table type of the plain database.
    #[br(pre_assert(db_type == DatabaseType::Plain))]
    Plain(PlainPageType),
    /// A table type of the extension database.
    #[br(pre_assert(db_type == DatabaseType::Ext))]
    Ext(ExtPageType),
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageType::Plain(page_type) => write!(f, "{page_type:?}"),
            PageType::Ext(page_type) => write!(f, "Ext{page_type:?}"),
        }
    }
}

/// Points to a table page and can be used to calculate the page's file offset by multiplying it
/// with the page size (found in the file header).
#[binrw]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[brw(little)]
pub struct PageIndex(pub u32);

impl PageIndex {
    /// Calculate the absolute file offset of the page for the given `page_size`.
    #[must_use]
    pub fn offset(&self, page_size: u32) -> u64 {
        u64::from(self.0) * u64::from(page_size)
    }
}

/// Tables are linked lists of pages containing rows of a single type, which are organized
/// into groups.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
#[br(import(db_type: DatabaseType))]
pub struct Table {
    /// Identifies the type of rows that this table contains.
    #[br(args(db_type))]
    pub page_type: PageType,
    /// Unknown field, maybe links to a chain of empty pages if the database is ever garbage
    /// collected.
    empty_candidate: u32,
    /// Index of the first page that belongs to this table.
    ///
    /// *Note:* The first page apparently does not contain any rows. If the table is non-empty,
    /// the actual row data can be found in the pages after.
    pub first_page: PageIndex,
    /// Index of the last page that belongs to this table.
    pub last_page: PageIndex,
}

/// The database file header, including the list of tables.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little, magic = 0u32)]
#[br(import(db_type: DatabaseType))]
pub struct Header {
    /// Size of a single page in bytes.
    ///
    /// The byte offset of a page can be calculated by multiplying a page index with this value.
    pub page_size: u32,
    /// Number of tables.
    #[br(temp)]
    #[bw(calc = tables.len().try_into().expect("too many tables"))]
    num_tables: u32,
    /// Unknown field, not used as any `empty_candidate`, points past the end of the file.
    pub next_unused_page: PageIndex,
    /// Unknown field.
    #[allow(dead_code)]
    unknown: u32,
    /// Always incremented by at least one, sometimes by two or three.
    pub sequence: u32,
    /// The gap seems to be always zero.
    #[br(temp, assert(gap == 0))]
    #[bw(calc = 0u32)]
    gap: u32,
    /// Each table is a linked list of pages containing rows of a particular type.
    #[br(args { count: num_tables as usize, inner: (db_type,) })]
    pub tables: Vec<Table>,
}

bitflags! {
    /// Flags of a table page.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct PageFlags: u8 {
        /// Determines whether the page is a data page.
        const DATA = 0x40;
    }
}

/// A table page.
///
/// Each page consists of a header that contains information about the type, number of rows, etc.,
/// followed by the heap that holds the row data. Each row needs to be located using an offset
/// found in the page footer at the end of the page (see [`RowGroup`] and [`io::DbFile`]).
#[binread]
#[derive(Debug, PartialEq, Eq, Clone)]
#[br(little, magic = 0u32)]
#[br(import(db_type: DatabaseType))]
pub struct Page {
    /// Index of the page.
    ///
    /// Should match the index used for lookup and can be used to verify that the correct page
    /// was loaded.
    pub page_index: PageIndex,
    /// Type of information that the rows of this page contain.
    ///
    /// Should match the page type of the table that this page belongs to.
    #[br(args(db_type))]
    pub page_type: PageType,
    /// Index of the next page with the same page type.
    ///
    /// If this page is the last one of that type, the page index stored in the field will point
    /// past the end of the file.
    pub next_page: PageIndex,
    /// Unknown field.
    #[allow(dead_code)]
    unknown1: u32,
    /// Unknown field.
    #[allow(dead_code)]
    unknown2: u32,
    /// Number of rows in this page (8-bit version).
    ///
    /// Used if the number of rows fits into a single byte.
    pub num_rows_small: u8,
    /// Unknown field, according to earlier structural analysis a bitmask (first track: 32).
    #[allow(dead_code)]
    unknown3: u8,
    /// Unknown field, often 0, sometimes larger, especially for pages with many rows.
    #[allow(dead_code)]
    unknown4: u8,
    /// Page flags.
    #[br(map = PageFlags::from_bits_retain)]
    pub page_flags: PageFlags,
    /// Free space in bytes in the heap of the page (excluding the row offsets in the page
    /// footer).
    pub free_size: u16,
    /// Used space in bytes in the heap of the page.
    pub used_size: u16,
    /// Unknown field.
    #[allow(dead_code)]
    unknown5: u16,
    /// Number of rows in this page (16-bit version).
    ///
    /// Used when the number of rows does not fit into a single byte. In that case,
    /// `num_rows_large` is greater than `num_rows_small`, but is not equal to `0x1FFF`.
    pub num_rows_large: u16,
    /// Unknown field.
    #[allow(dead_code)]
    unknown6: u16,
    /// Unknown field, always 0, except 1 for history pages.
    #[allow(dead_code)]
    unknown7: u16,
}

impl Page {
    /// Size of the page header in bytes.
    pub const HEADER_SIZE: u32 = 0x28;

    /// Returns `true` if the page actually contains row data.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.page_flags.contains(PageFlags::DATA)
    }

    /// Number of rows on this page.
    ///
    /// Note that this number includes rows that have been flagged as missing by their row group.
    #[must_use]
    pub fn num_rows(&self) -> u16 {
        if self.num_rows_large > self.num_rows_small.into() && self.num_rows_large != 0x1fff {
            self.num_rows_large
        } else {
            self.num_rows_small.into()
        }
    }

    /// Number of row groups.
    ///
    /// All row groups except the last one consist of 16 rows (but that number includes rows that
    /// have been flagged as missing by the row group).
    #[must_use]
    pub fn num_row_groups(&self) -> u16 {
        self.num_rows().div_ceil(RowGroup::MAX_ROW_COUNT)
    }
}

/// A group of up to sixteen row offsets, built backwards from the end of the page, along with a
/// bitmap that indicates whether each row is actually present in the table.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RowGroup {
    /// Row offsets relative to the page heap, in ascending slot order.
    offsets: Vec<u16>,
    /// Presence bitmap; bit `i` guards slot `i`.
    presence: u64,
}

impl RowGroup {
    /// Maximum number of rows in a single row group.
    pub const MAX_ROW_COUNT: u16 = 16;

    pub(crate) fn new(offsets: Vec<u16>, presence: u64) -> Self {
        debug_assert!(offsets.len() <= usize::from(Self::MAX_ROW_COUNT));
        Self { offsets, presence }
    }

    /// Number of row slots in this group (present or not).
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if the row in the given slot is present.
    #[must_use]
    pub fn is_present(&self, slot: usize) -> bool {
        slot < self.offsets.len() && (self.presence >> slot) & 1 != 0
    }

    /// The heap-relative offsets of the present rows, in ascending slot order.
    pub fn present_offsets(&self) -> impl Iterator<Item = u16> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .filter(|(slot, _)| (self.presence >> slot) & 1 != 0)
            .map(|(_, offset)| *offset)
    }

    /// Number of present rows in this group.
    #[must_use]
    pub fn num_present(&self) -> usize {
        self.present_offsets().count()
    }
}

/// Identifies a track.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct TrackId(pub u32);

/// Identifies an artwork item.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct ArtworkId(pub u32);

/// Identifies an album.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct AlbumId(pub u32);

/// Identifies an artist.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct ArtistId(pub u32);

/// Identifies a genre.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct GenreId(pub u32);

/// Identifies a key.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct KeyId(pub u32);

/// Identifies a label.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct LabelId(pub u32);

/// Identifies a playlist tree node.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct PlaylistTreeNodeId(pub u32);

/// Identifies a history playlist.
#[binrw]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[brw(little)]
pub struct HistoryPlaylistId(pub u32);

/// Contains the album name, along with an ID of the corresponding artist.
#[binread]
#[derive(Debug, PartialEq, Eq, Clone)]
#[br(little)]
pub struct Album {
    /// Position of the start of this row (needed for offset calculations).
    ///
    /// **Note:** This is a virtual field and not actually read from the file.
    #[br(temp, parse_with = current_offset)]
    base_offset: u64,
    /// Unknown field, usually `80 00`.
    pub unknown1: u16,
    /// Unknown field, usually incrementing by `0x20` per row.
    pub index_shift: u16,
    /// Unknown field.
    pub unknown2: u32,
    /// ID of the artist row associated with this row.
    pub artist_id: ArtistId,
    /// ID of this row.
    pub id: AlbumId,
    /// Unknown field.
    pub unknown3: u32,
    /// Unknown field.
    pub unknown4: u8,
    /// Album name.
    #[br(offset = base_offset, parse_with = FilePtr8::parse)]
    pub name: DeviceSqlString,
}

impl binrw::meta::WriteEndian for Album {
    const ENDIAN: binrw::meta::EndianKind = binrw::meta::EndianKind::Endian(Endian::Little);
}

impl BinWrite for Album {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        // The name is written directly after the one-byte name offset.
        const OFS_NAME: u8 = 22;
        self.unknown1.write_options(writer, endian, ())?;
        self.index_shift.write_options(writer, endian, ())?;
        self.unknown2.write_options(writer, endian, ())?;
        self.artist_id.write_options(writer, endian, ())?;
        self.id.write_options(writer, endian, ())?;
        self.unknown3.write_options(writer, endian, ())?;
        self.unknown4.write_options(writer, endian, ())?;
        OFS_NAME.write_options(writer, endian, ())?;
        self.name.write_options(writer, endian, ())?;
        Ok(())
    }
}

/// Contains the artist name and ID.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Artist {
    /// Determines if the `name` string is located at the 8-bit offset (0x60) or the 16-bit
    /// offset (0x64).
    pub subtype: u16,
    /// Unknown field, usually incrementing by `0x20` per row.
    pub index_shift: u16,
    /// ID of this row.
    pub id: ArtistId,
    /// Unknown field.
    pub unknown1: u8,
    /// One-byte name offset used if `subtype` is `0x60`.
    pub ofs_name_near: u8,
    /// Two-byte name offset used if `subtype` is `0x64`.
    ///
    /// In that case, the value of `ofs_name_near` is ignored.
    #[br(if(subtype == 0x64))]
    pub ofs_name_far: Option<u16>,
    /// Name of this artist.
    #[br(seek_before = Artist::name_seek(ofs_name_near, &ofs_name_far))]
    #[bw(seek_before = Artist::name_seek(*ofs_name_near, ofs_name_far))]
    #[brw(restore_position)]
    pub name: DeviceSqlString,
}

impl Artist {
    /// Seek from the end of the fixed fields to the name string.
    fn name_seek(ofs_near: u8, ofs_far: &Option<u16>) -> SeekFrom {
        let (offset, consumed) = match ofs_far {
            Some(far) => (i64::from(*far), 12),
            None => (i64::from(ofs_near), 10),
        };
        SeekFrom::Current(offset - consumed)
    }
}

/// Contains the artwork path and ID.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Artwork {
    /// ID of this row.
    pub id: ArtworkId,
    /// Path to the album art file.
    pub path: DeviceSqlString,
}

/// Contains a numeric color ID along with its user-defined name.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Color {
    /// Unknown field.
    pub unknown1: u32,
    /// Unknown field.
    pub unknown2: u8,
    /// Numeric color ID.
    pub color: ColorIndex,
    /// Unknown field.
    pub unknown3: u16,
    /// User-defined name of the color.
    pub name: DeviceSqlString,
}

/// Represents a musical genre.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Genre {
    /// ID of this row.
    pub id: GenreId,
    /// Name of the genre.
    pub name: DeviceSqlString,
}

/// Represents a history playlist.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct HistoryPlaylist {
    /// ID of this row.
    pub id: HistoryPlaylistId,
    /// Name of the playlist.
    pub name: DeviceSqlString,
}

/// Represents a track entry in a history playlist.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct HistoryEntry {
    /// ID of the track played at this position in the playlist.
    pub track_id: TrackId,
    /// ID of the history playlist.
    pub playlist_id: HistoryPlaylistId,
    /// Position within the playlist.
    pub entry_index: u32,
}

/// Represents a musical key.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Key {
    /// ID of this row.
    pub id: KeyId,
    /// Apparently a second copy of the row ID.
    pub id2: u32,
    /// Name of the key.
    pub name: DeviceSqlString,
}

/// Represents a record label.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Label {
    /// ID of this row.
    pub id: LabelId,
    /// Name of the record label.
    pub name: DeviceSqlString,
}

/// Represents a node in the playlist tree (either a folder or a playlist).
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct PlaylistTreeNode {
    /// ID of the parent row of this row (which means that the parent is a folder).
    pub parent_id: PlaylistTreeNodeId,
    /// Unknown field.
    pub unknown: u32,
    /// Sort order indicator.
    pub sort_order: u32,
    /// ID of this row.
    pub id: PlaylistTreeNodeId,
    /// Indicates if the node is a folder. Zero if it's a leaf node, i.e. a playlist.
    pub node_is_folder: u32,
    /// Name of this node, as shown when navigating the menu.
    pub name: DeviceSqlString,
}

impl PlaylistTreeNode {
    /// Indicates whether the node is a folder or a playlist.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.node_is_folder > 0
    }
}

/// Represents a track entry in a playlist.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct PlaylistEntry {
    /// Position within the playlist.
    pub entry_index: u32,
    /// ID of the track played at this position in the playlist.
    pub track_id: TrackId,
    /// ID of the playlist.
    pub playlist_id: PlaylistTreeNodeId,
}

/// Contains the metadata categories by which tracks can be browsed.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct ColumnEntry {
    /// Stable ID of the category, possibly used by hardware to identify it.
    pub id: u16,
    /// Unknown field, maybe a bitfield with sort order and visibility information.
    pub unknown0: u16,
    /// Name of the category.
    ///
    /// The contained string is wrapped in the "interlinear annotation" characters U+FFFA and
    /// U+FFFB and uses the long UTF-16LE encoding even when it only contains ASCII.
    pub column_name: DeviceSqlString,
}

/// Contains the track metadata row: foreign keys into the reference tables, numeric metadata,
/// and the string-offset table with the textual fields.
#[binread]
#[derive(Debug, PartialEq, Eq, Clone)]
#[br(little)]
pub struct Track {
    /// Position of the start of this row (needed for offset calculations).
    ///
    /// **Note:** This is a virtual field and not actually read from the file.
    #[br(temp, parse_with = current_offset)]
    base_offset: u64,
    /// Unknown field, usually `24 00`.
    pub unknown1: u16,
    /// Unknown field, usually incrementing by `0x20` per row.
    pub index_shift: u16,
    /// Unknown field, called a bitmask by earlier structural analysis.
    pub bitmask: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Composer of this track as artist row ID (non-zero if set).
    pub composer_id: ArtistId,
    /// File size in bytes.
    pub file_size: u32,
    /// Unknown field (maybe another ID?).
    pub unknown2: u32,
    /// Unknown field ("always 19048?").
    pub unknown3: u16,
    /// Unknown field ("always 30967?").
    pub unknown4: u16,
    /// Artwork row ID for the cover art (non-zero if set).
    pub artwork_id: ArtworkId,
    /// Key row ID for the musical key (non-zero if set).
    pub key_id: KeyId,
    /// Artist row ID of the original performer (non-zero if set).
    pub orig_artist_id: ArtistId,
    /// Label row ID of the record label (non-zero if set).
    pub label_id: LabelId,
    /// Artist row ID of the remixer (non-zero if set).
    pub remixer_id: ArtistId,
    /// Bitrate of the track.
    pub bitrate: u32,
    /// Track number of the track.
    pub track_number: u32,
    /// Track tempo in centi-BPM (= 1/100 BPM).
    pub tempo: u32,
    /// Genre row ID for this track (non-zero if set).
    pub genre_id: GenreId,
    /// Album row ID for this track (non-zero if set).
    pub album_id: AlbumId,
    /// Artist row ID for this track (non-zero if set).
    pub artist_id: ArtistId,
    /// Row ID of this track.
    pub id: TrackId,
    /// Disc number of this track (non-zero if set).
    pub disc_number: u16,
    /// Number of times this track was played.
    pub play_count: u16,
    /// Year this track was released.
    pub year: u16,
    /// Bits per sample of the track audio file.
    pub sample_depth: u16,
    /// Playback duration of this track in seconds (at normal speed).
    pub duration: u16,
    /// Unknown field, apparently always "29".
    pub unknown5: u16,
    /// Color row ID for this track (non-zero if set).
    pub color: ColorIndex,
    /// User rating of this track (0 to 5 stars).
    pub rating: u8,
    /// Unknown field, apparently always "1".
    pub unknown6: u16,
    /// Unknown field (alternating "2" and "3"?).
    pub unknown7: u16,
    /// International Standard Recording Code (ISRC), in mangled format.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub isrc: DeviceSqlString,
    /// Unknown string field, named `texter` by earlier structural analysis.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub texter: DeviceSqlString,
    /// Unknown string field.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string2: DeviceSqlString,
    /// Unknown string field.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string3: DeviceSqlString,
    /// Unknown string field.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string4: DeviceSqlString,
    /// Unknown string field.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub message: DeviceSqlString,
    /// Probably describes whether the track is public on a track-sharing website. The value is
    /// either "ON" or the empty string.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub kuvo_public: DeviceSqlString,
    /// Determines if hot cues should be autoloaded. The value is either "ON" or the empty
    /// string.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub autoload_hotcues: DeviceSqlString,
    /// Unknown string field.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string5: DeviceSqlString,
    /// Unknown string field (usually empty).
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string6: DeviceSqlString,
    /// Date when the track was added to the collection.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub date_added: DeviceSqlString,
    /// Date when the track was released.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub release_date: DeviceSqlString,
    /// Name of the remix (if any).
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub mix_name: DeviceSqlString,
    /// Unknown string field (usually empty).
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string7: DeviceSqlString,
    /// File path of the track analysis file.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub analyze_path: DeviceSqlString,
    /// Date when the track analysis was performed.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub analyze_date: DeviceSqlString,
    /// Track comment.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub comment: DeviceSqlString,
    /// Track title.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub title: DeviceSqlString,
    /// Unknown string field (usually empty).
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub unknown_string8: DeviceSqlString,
    /// Name of the file.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub filename: DeviceSqlString,
    /// Path of the file.
    #[br(offset = base_offset, parse_with = FilePtr16::parse)]
    pub file_path: DeviceSqlString,
}

impl Track {
    /// The track tempo in BPM.
    #[must_use]
    pub fn bpm(&self) -> f64 {
        f64::from(self.tempo) / 100.0
    }
}

// #[bw(little)] on #[binread] types does not seem to work, so the endianness is defined manually
// here.
impl binrw::meta::WriteEndian for Track {
    const ENDIAN: binrw::meta::EndianKind = binrw::meta::EndianKind::Endian(Endian::Little);
}

impl BinWrite for Track {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        debug_assert!(endian == Endian::Little);

        let base_position = writer.stream_position()?;
        self.unknown1.write_options(writer, endian, ())?;
        self.index_shift.write_options(writer, endian, ())?;
        self.bitmask.write_options(writer, endian, ())?;
        self.sample_rate.write_options(writer, endian, ())?;
        self.composer_id.write_options(writer, endian, ())?;
        self.file_size.write_options(writer, endian, ())?;
        self.unknown2.write_options(writer, endian, ())?;
        self.unknown3.write_options(writer, endian, ())?;
        self.unknown4.write_options(writer, endian, ())?;
        self.artwork_id.write_options(writer, endian, ())?;
        self.key_id.write_options(writer, endian, ())?;
        self.orig_artist_id.write_options(writer, endian, ())?;
        self.label_id.write_options(writer, endian, ())?;
        self.remixer_id.write_options(writer, endian, ())?;
        self.bitrate.write_options(writer, endian, ())?;
        self.track_number.write_options(writer, endian, ())?;
        self.tempo.write_options(writer, endian, ())?;
        self.genre_id.write_options(writer, endian, ())?;
        self.album_id.write_options(writer, endian, ())?;
        self.artist_id.write_options(writer, endian, ())?;
        self.id.write_options(writer, endian, ())?;
        self.disc_number.write_options(writer, endian, ())?;
        self.play_count.write_options(writer, endian, ())?;
        self.year.write_options(writer, endian, ())?;
        self.sample_depth.write_options(writer, endian, ())?;
        self.duration.write_options(writer, endian, ())?;
        self.unknown5.write_options(writer, endian, ())?;
        self.color.write_options(writer, endian, ())?;
        self.rating.write_options(writer, endian, ())?;
        self.unknown6.write_options(writer, endian, ())?;
        self.unknown7.write_options(writer, endian, ())?;

        let start_of_string_section = writer.stream_position()?;
        debug_assert_eq!(start_of_string_section - base_position, 0x5e);

        // Skip the offset table, because the actual strings need to be written first.
        let mut string_offsets = [0u16; 21];
        writer.seek(SeekFrom::Current(0x2a))?;
        for (i, string) in [
            &self.isrc,
            &self.texter,
            &self.unknown_string2,
            &self.unknown_string3,
            &self.unknown_string4,
            &self.message,
            &self.kuvo_public,
            &self.autoload_hotcues,
            &self.unknown_string5,
            &self.unknown_string6,
            &self.date_added,
            &self.release_date,
            &self.mix_name,
            &self.unknown_string7,
            &self.analyze_path,
            &self.analyze_date,
            &self.comment,
            &self.title,
            &self.unknown_string8,
            &self.filename,
            &self.file_path,
        ]
        .into_iter()
        .enumerate()
        {
            let current_position = writer.stream_position()?;
            let offset: u16 = current_position
                .checked_sub(base_position)
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| binrw::Error::AssertFail {
                    pos: current_position,
                    message: "Wraparound while calculating row offset".to_string(),
                })?;
            string_offsets[i] = offset;
            string.write_options(writer, endian, ())?;
        }

        let end_of_row = writer.stream_position()?;
        writer.seek(SeekFrom::Start(start_of_string_section))?;
        string_offsets.write_options(writer, endian, ())?;
        writer.seek(SeekFrom::Start(end_of_row))?;

        Ok(())
    }
}

/// A table row contains the actual data.
#[binread]
#[derive(Debug, PartialEq, Eq, Clone)]
#[br(little)]
#[br(import(page_type: PageType))]
// The large enum size is unfortunate, but since users of this library will probably use iterators
// to consume the results on demand, we can live with this. The alternative of using a `Box` would
// require a heap allocation per row, which is arguably worse. Hence, the warning is disabled for
// this enum.
#[allow(clippy::large_enum_variant)]
pub enum Row {
    /// Contains the album name, along with an ID of the corresponding artist.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Albums)))]
    Album(Album),
    /// Contains the artist name and ID.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Artists)))]
    Artist(Artist),
    /// Contains the artwork path and ID.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Artwork)))]
    Artwork(Artwork),
    /// Contains a numeric color ID.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Colors)))]
    Color(Color),
    /// Represents a musical genre.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Genres)))]
    Genre(Genre),
    /// Represents a history playlist.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::HistoryPlaylists)))]
    HistoryPlaylist(HistoryPlaylist),
    /// Represents a track entry in a history playlist.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::HistoryEntries)))]
    HistoryEntry(HistoryEntry),
    /// Represents a musical key.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Keys)))]
    Key(Key),
    /// Represents a record label.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Labels)))]
    Label(Label),
    /// Represents a node in the playlist tree (either a folder or a playlist).
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::PlaylistTree)))]
    PlaylistTreeNode(PlaylistTreeNode),
    /// Represents a track entry in a playlist.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::PlaylistEntries)))]
    PlaylistEntry(PlaylistEntry),
    /// Contains the metadata categories by which tracks can be browsed.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Columns)))]
    ColumnEntry(ColumnEntry),
    /// Contains the track metadata.
    #[br(pre_assert(page_type == PageType::Plain(PlainPageType::Tracks)))]
    Track(Track),
    /// A tag or tag category of the extension database.
    #[br(pre_assert(page_type == PageType::Ext(ExtPageType::Tags)))]
    Tag(Tag),
    /// A tag-track link of the extension database.
    #[br(pre_assert(page_type == PageType::Ext(ExtPageType::TagTracks)))]
    TagTrack(TagTrack),
    /// The row format (and also its size) is unknown, which means it can't be parsed.
    #[br(pre_assert(matches!(
        page_type,
        PageType::Plain(PlainPageType::History | PlainPageType::Unknown(_))
            | PageType::Ext(ExtPageType::Unknown(_))
    )))]
    Unknown,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::testing::{test_roundtrip, test_roundtrip_with_args};
    use binrw::BinRead;

    #[test]
    fn empty_header() {
        let header = Header {
            page_size: 8192,
            next_unused_page: PageIndex(2),
            unknown: 0,
            sequence: 5,
            tables: vec![],
        };
        test_roundtrip_with_args(
            &[
                0, 0, 0, 0, 0, 32, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0,
                0,
            ],
            header,
            (DatabaseType::Plain,),
            (),
        );
    }

    #[test]
    fn multi_table_header() {
        let header = Header {
            page_size: 4096,
            next_unused_page: PageIndex(10),
            unknown: 0,
            sequence: 12,
            tables: [
                Table {
                    page_type: PageType::Plain(PlainPageType::Tracks),
                    empty_candidate: 9,
                    first_page: PageIndex(1),
                    last_page: PageIndex(2),
                },
                Table {
                    page_type: PageType::Plain(PlainPageType::Genres),
                    empty_candidate: 0,
                    first_page: PageIndex(3),
                    last_page: PageIndex(3),
                },
                Table {
                    page_type: PageType::Plain(PlainPageType::Artists),
                    empty_candidate: 0,
                    first_page: PageIndex(4),
                    last_page: PageIndex(5),
                },
                Table {
                    page_type: PageType::Plain(PlainPageType::Albums),
                    empty_candidate: 0,
                    first_page: PageIndex(6),
                    last_page: PageIndex(6),
                },
                Table {
                    page_type: PageType::Plain(PlainPageType::PlaylistTree),
                    empty_candidate: 0,
                    first_page: PageIndex(7),
                    last_page: PageIndex(7),
                },
                Table {
                    page_type: PageType::Plain(PlainPageType::History),
                    empty_candidate: 0,
                    first_page: PageIndex(8),
                    last_page: PageIndex(9),
                },
            ]
            .to_vec(),
        };

        test_roundtrip_with_args(
            &[
                0, 0, 0, 0, 0, 16, 0, 0, 6, 0, 0, 0, 10, 0, 0, 0, 0, 0, 0, 0, 12, 0, 0, 0, 0, 0,
                0, 0, 0, 0, 0, 0, 9, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 3,
                0, 0, 0, 3, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 5, 0, 0, 0, 3, 0, 0, 0,
                0, 0, 0, 0, 6, 0, 0, 0, 6, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 7, 0, 0, 0, 7, 0, 0,
                0, 19, 0, 0, 0, 0, 0, 0, 0, 8, 0, 0, 0, 9, 0, 0, 0,
            ],
            header,
            (DatabaseType::Plain,),
            (),
        );
    }

    #[test]
    fn track_row() {
        let row = Track {
            unknown1: 36,
            index_shift: 32,
            bitmask: 0,
            sample_rate: 48000,
            composer_id: ArtistId(0),
            file_size: 9417241,
            unknown2: 1,
            unknown3: 19048,
            unknown4: 30967,
            artwork_id: ArtworkId(3),
            key_id: KeyId(11),
            orig_artist_id: ArtistId(0),
            label_id: LabelId(27),
            remixer_id: ArtistId(0),
            bitrate: 256,
            track_number: 7,
            tempo: 12650,
            genre_id: GenreId(5),
            album_id: AlbumId(14),
            artist_id: ArtistId(12),
            id: TrackId(88),
            disc_number: 1,
            play_count: 4,
            year: 2019,
            sample_depth: 24,
            duration: 421,
            unknown5: 41,
            color: ColorIndex::Green,
            rating: 4,
            unknown6: 1,
            unknown7: 2,
            isrc: DeviceSqlString::new_isrc("".to_string()),
            texter: DeviceSqlString::empty(),
            unknown_string2: DeviceSqlString::new("2".to_string()),
            unknown_string3: DeviceSqlString::new("2".to_string()),
            unknown_string4: DeviceSqlString::empty(),
            message: DeviceSqlString::empty(),
            kuvo_public: DeviceSqlString::new("ON".to_string()),
            autoload_hotcues: DeviceSqlString::new("ON".to_string()),
            unknown_string5: DeviceSqlString::empty(),
            unknown_string6: DeviceSqlString::empty(),
            date_added: DeviceSqlString::new("2019-11-05".to_string()),
            release_date: DeviceSqlString::empty(),
            mix_name: DeviceSqlString::empty(),
            unknown_string7: DeviceSqlString::empty(),
            analyze_path: DeviceSqlString::new(
                "/PIONEER/USBANLZ/P023/00012FE6/ANLZ0000.DAT".to_string(),
            ),
            analyze_date: DeviceSqlString::new("2019-11-06".to_string()),
            comment: DeviceSqlString::new("Purchased at Beatport.com".to_string()),
            title: DeviceSqlString::new("Midnight Drive".to_string()),
            unknown_string8: DeviceSqlString::empty(),
            filename: DeviceSqlString::new("Midnight Drive.flac".to_string()),
            file_path: DeviceSqlString::new(
                "/Contents/Carl Cox/Night Tales/Midnight Drive.flac".to_string(),
            ),
        };
        assert_eq!(row.bpm(), 126.5);
        test_roundtrip(
            &[
                // fixed fields
                36, 0, 32, 0, 0, 0, 0, 0, 128, 187, 0, 0, 0, 0, 0, 0, 25, 178, 143, 0, 1, 0, 0,
                0, 104, 74, 247, 120, 3, 0, 0, 0, 11, 0, 0, 0, 0, 0, 0, 0, 27, 0, 0, 0, 0, 0, 0,
                0, 0, 1, 0, 0, 7, 0, 0, 0, 106, 49, 0, 0, 5, 0, 0, 0, 14, 0, 0, 0, 12, 0, 0, 0,
                88, 0, 0, 0, 1, 0, 4, 0, 227, 7, 24, 0, 165, 1, 41, 0, 5, 4, 1, 0, 2, 0,
                // string offset table
                136, 0, 137, 0, 138, 0, 140, 0, 142, 0, 143, 0, 144, 0, 147, 0, 150, 0, 151, 0,
                152, 0, 163, 0, 164, 0, 165, 0, 166, 0, 210, 0, 221, 0, 247, 0, 6, 1, 7, 1, 27, 1,
                // string bodies
                3, 3, 5, 50, 5, 50, 3, 3, 7, 79, 78, 7, 79, 78, 3, 3, 23, 50, 48, 49, 57, 45, 49,
                49, 45, 48, 53, 3, 3, 3, 89, 47, 80, 73, 79, 78, 69, 69, 82, 47, 85, 83, 66, 65,
                78, 76, 90, 47, 80, 48, 50, 51, 47, 48, 48, 48, 49, 50, 70, 69, 54, 47, 65, 78,
                76, 90, 48, 48, 48, 48, 46, 68, 65, 84, 23, 50, 48, 49, 57, 45, 49, 49, 45, 48,
                54, 53, 80, 117, 114, 99, 104, 97, 115, 101, 100, 32, 97, 116, 32, 66, 101, 97,
                116, 112, 111, 114, 116, 46, 99, 111, 109, 31, 77, 105, 100, 110, 105, 103, 104,
                116, 32, 68, 114, 105, 118, 101, 3, 41, 77, 105, 100, 110, 105, 103, 104, 116,
                32, 68, 114, 105, 118, 101, 46, 102, 108, 97, 99, 103, 47, 67, 111, 110, 116,
                101, 110, 116, 115, 47, 67, 97, 114, 108, 32, 67, 111, 120, 47, 78, 105, 103,
                104, 116, 32, 84, 97, 108, 101, 115, 47, 77, 105, 100, 110, 105, 103, 104, 116,
                32, 68, 114, 105, 118, 101, 46, 102, 108, 97, 99,
            ],
            row,
        );
    }

    #[test]
    fn artist_row() {
        let row = Artist {
            subtype: 0x60,
            index_shift: 64,
            id: ArtistId(12),
            unknown1: 3,
            ofs_name_near: 10,
            ofs_name_far: None,
            name: DeviceSqlString::new("Carl Cox".to_string()),
        };
        test_roundtrip(
            &[
                96, 0, 64, 0, 12, 0, 0, 0, 3, 10, 19, 67, 97, 114, 108, 32, 67, 111, 120,
            ],
            row,
        );
    }

    #[test]
    fn artist_row_far_offset() {
        let row = Artist {
            subtype: 0x64,
            index_shift: 96,
            id: ArtistId(33),
            unknown1: 3,
            ofs_name_near: 0,
            ofs_name_far: Some(12),
            name: DeviceSqlString::new("Moby".to_string()),
        };
        test_roundtrip(
            &[100, 0, 96, 0, 33, 0, 0, 0, 3, 0, 12, 0, 11, 77, 111, 98, 121],
            row,
        );
    }

    #[test]
    fn album_row() {
        let row = Album {
            unknown1: 0x80,
            index_shift: 32,
            unknown2: 0,
            artist_id: ArtistId(1),
            id: AlbumId(1),
            unknown3: 0,
            unknown4: 0,
            name: DeviceSqlString::new("Loops".to_string()),
        };
        let bin = [
            128, 0, 32, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 22, 13, 76, 111,
            111, 112, 115,
        ];
        let mut writer = binrw::io::Cursor::new(vec![]);
        row.write(&mut writer).unwrap();
        assert_eq!(writer.get_ref().as_slice(), &bin);
        let mut reader = binrw::io::Cursor::new(bin.as_slice());
        let parsed = Album::read(&mut reader).unwrap();
        assert_eq!(parsed, row);
    }

    #[test]
    fn label_row() {
        let row = Label {
            id: LabelId(27),
            name: DeviceSqlString::new("Defected".to_string()),
        };
        test_roundtrip(
            &[27, 0, 0, 0, 19, 68, 101, 102, 101, 99, 116, 101, 100],
            row,
        );
    }

    #[test]
    fn key_row() {
        let row = Key {
            id: KeyId(9),
            id2: 9,
            name: DeviceSqlString::new("F#m".to_string()),
        };
        test_roundtrip(&[9, 0, 0, 0, 9, 0, 0, 0, 9, 70, 35, 109], row);
    }

    #[test]
    fn color_row() {
        let row = Color {
            unknown1: 0,
            unknown2: 1,
            color: ColorIndex::Aqua,
            unknown3: 0,
            name: DeviceSqlString::new("Aqua".to_string()),
        };
        test_roundtrip(&[0, 0, 0, 0, 1, 6, 0, 0, 11, 65, 113, 117, 97], row);
    }

    #[test]
    fn playlist_entry_row() {
        let row = PlaylistEntry {
            entry_index: 3,
            track_id: TrackId(42),
            playlist_id: PlaylistTreeNodeId(7),
        };
        test_roundtrip(&[3, 0, 0, 0, 42, 0, 0, 0, 7, 0, 0, 0], row);
    }

    #[test]
    fn playlist_tree_row() {
        let row = PlaylistTreeNode {
            parent_id: PlaylistTreeNodeId(0),
            unknown: 0,
            sort_order: 1,
            id: PlaylistTreeNodeId(7),
            node_is_folder: 0,
            name: DeviceSqlString::new("House".to_string()),
        };
        assert!(!row.is_folder());
        test_roundtrip(
            &[
                0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 13, 72, 111, 117,
                115, 101,
            ],
            row,
        );
    }

    #[test]
    fn column_entry() {
        let row = ColumnEntry {
            id: 2,
            unknown0: 0x81,
            column_name: DeviceSqlString::new("\u{fffa}ARTIST\u{fffb}".into()),
        };
        let bin = &[
            0x02, 0x00, 0x81, 0x00, 0x90, 0x14, 0x00, 0x00, 0xfa, 0xff, 0x41, 0x00, 0x52, 0x00,
            0x54, 0x00, 0x49, 0x00, 0x53, 0x00, 0x54, 0x00, 0xfb, 0xff,
        ];
        test_roundtrip(bin, row);
    }

    #[test]
    fn row_group_presence() {
        let group = RowGroup::new(vec![0, 40, 80, 120], 0b1011);
        assert_eq!(group.num_slots(), 4);
        assert_eq!(group.num_present(), 3);
        assert!(group.is_present(0));
        assert!(group.is_present(1));
        assert!(!group.is_present(2));
        assert!(group.is_present(3));
        assert_eq!(group.present_offsets().collect::<Vec<_>>(), vec![0, 40, 120]);
    }

    #[test]
    fn empty_row_group() {
        let group = RowGroup::new(vec![0, 40], 0);
        assert_eq!(group.num_present(), 0);
        assert_eq!(group.present_offsets().count(), 0);
    }
}
