// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Parser for track analysis files, which can be found inside nested subdirectories of the
//! `PIONEER/USBANLZ` directory and have the extensions `.DAT`, `.EXT` or `.2EX`.
//!
//! These files contain additional data (such as beat grids, hot cues, waveforms and song
//! structure information) that is not part of the collection database.
//!
//! The file is divided into sections, where each section consists of a four-character tag, a
//! header, and content. With the evolution of the player hardware line, new section types were
//! added (e.g. for high-resolution colored waveforms). To avoid issues with older hardware that
//! cannot handle the additional data due to their memory limitations, the new sections were only
//! added to a copy of the original file (`.DAT`) and saved with another extension (`.EXT`).
//!
//! All multi-byte integers in analysis files are big-endian, and strings are UTF-16BE.

use crate::source::ByteSource;
use crate::util::{ColorIndex, Error, Result};
use crate::xor::{song_structure_key, XorStream};
use binrw::io::{Cursor, Seek, SeekFrom};
use binrw::{binread, binrw, BinRead, BinResult, BinWrite, Endian};
use modular_bitfield::prelude::*;
use parse_display::Display;

/// Options controlling how an analysis file is decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnlzOptions {
    /// Skip the XOR unmasking of song structure tags.
    ///
    /// Files sourced from the "shared" library sub-folder are written without the mask, so the
    /// unmasking pass must be suppressed for them.
    pub unmasked: bool,
}

/// The kind of section, identified by its four-character tag code.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ContentKind {
    /// File section that contains all other sections.
    #[brw(magic = b"PMAI")]
    File,
    /// All beats found in the track.
    #[brw(magic = b"PQTZ")]
    BeatGrid,
    /// Either memory points and loops or hot cues and hot loops of the track.
    ///
    /// *Note:* Since the second generation of network-capable players, there also exists the
    /// `ExtendedCueList` section which can carry additional information.
    #[brw(magic = b"PCOB")]
    CueList,
    /// Extended version of the `CueList` section.
    #[brw(magic = b"PCO2")]
    ExtendedCueList,
    /// Single cue entry inside a `CueList` section.
    #[brw(magic = b"PCPT")]
    Cue,
    /// Single cue entry inside a `ExtendedCueList` section.
    #[brw(magic = b"PCP2")]
    ExtendedCue,
    /// File path of the audio file.
    #[brw(magic = b"PPTH")]
    Path,
    /// Seek information for variable bitrate files.
    #[brw(magic = b"PVBR")]
    Vbr,
    /// Fixed-width monochrome preview of the track waveform.
    #[brw(magic = b"PWAV")]
    WaveformPreview,
    /// Smaller version of the fixed-width monochrome preview of the track waveform.
    #[brw(magic = b"PWV2")]
    TinyWaveformPreview,
    /// Variable-width large monochrome version of the track waveform.
    ///
    /// Used in `.EXT` files.
    #[brw(magic = b"PWV3")]
    WaveformDetail,
    /// Fixed-width colored version of the track waveform.
    ///
    /// Used in `.EXT` files.
    #[brw(magic = b"PWV4")]
    WaveformColorPreview,
    /// Variable-width large colored version of the track waveform.
    ///
    /// Used in `.EXT` files.
    #[brw(magic = b"PWV5")]
    WaveformColorDetail,
    /// Fixed-width three-band version of the track waveform.
    ///
    /// Used in `.2EX` files.
    #[brw(magic = b"PWV6")]
    Waveform3BandPreview,
    /// Variable-width large three-band version of the track waveform.
    ///
    /// Used in `.2EX` files.
    #[brw(magic = b"PWV7")]
    Waveform3BandDetail,
    /// Describes the structure of a song (intro, chorus, verse, etc.).
    ///
    /// Used in `.EXT` files.
    #[brw(magic = b"PSSI")]
    SongStructure,
    /// Unknown tag code.
    Unknown([u8; 4]),
}

/// Header of a section that contains type and size information.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SectionHeader {
    /// Kind of content in this section.
    pub kind: ContentKind,
    /// Length of the section header in bytes (including `kind`, `size` and `total_size`).
    pub size: u32,
    /// Total length of the section in bytes (including the header).
    pub total_size: u32,
}

impl SectionHeader {
    /// Number of header bytes after the three fixed fields.
    #[must_use]
    pub fn remaining_size(&self) -> u32 {
        self.size.saturating_sub(12)
    }

    /// Number of content bytes after the header.
    #[must_use]
    pub fn content_size(&self) -> u32 {
        self.total_size.saturating_sub(self.size)
    }
}

/// A single beat inside the beat grid.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Beat {
    /// Beat number inside the bar (1-4).
    pub beat_number: u16,
    /// Current tempo in centi-BPM (= 1/100 BPM).
    pub tempo: u16,
    /// Time in milliseconds after which this beat would occur (at normal playback speed).
    pub time: u32,
}

/// Describes the types of entries found in a cue list section.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CueListType {
    /// Memory cues or loops.
    #[brw(magic = 0u32)]
    MemoryCues,
    /// Hot cues or loops.
    #[brw(magic = 1u32)]
    HotCues,
    /// Unknown type.
    Unknown(u32),
}

/// Indicates if the cue is a point or a loop.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CueType {
    /// Cue is a single point.
    #[brw(magic = 1u8)]
    Point,
    /// Cue is a loop.
    #[brw(magic = 2u8)]
    Loop,
    /// Unknown type.
    Unknown(u8),
}

/// A memory or hot cue (or loop).
#[binread]
#[br(big)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Cue {
    /// Cue entry header.
    pub header: SectionHeader,
    /// Hot cue number: `0` if this is not a hot cue, `1` for hot cue A, `2` for B, etc.
    pub hot_cue: u32,
    /// Loop status. `4` if this cue is an active loop, `0` otherwise.
    pub status: u32,
    /// Unknown field. Seems to always have the value `0x00100000`.
    pub unknown1: u32,
    /// Somehow used for sorting cues: the first cue has the value `0xFFFF`.
    pub order_first: u16,
    /// Somehow used for sorting cues: the last cue has the value `0xFFFF`.
    pub order_last: u16,
    /// Type of this cue (point or loop).
    pub cue_type: CueType,
    /// Unknown field. Seems to always have the value `0`.
    pub unknown2: u8,
    /// Unknown field. Seems to always have the value `0x03E8` (= decimal 1000).
    pub unknown3: u16,
    /// Time in milliseconds after which this cue would occur (at normal playback speed).
    pub time: u32,
    /// Time in milliseconds after which the loop would jump back to `time` (at normal playback
    /// speed).
    pub loop_time: u32,
    /// Unknown field.
    pub unknown4: u32,
    /// Unknown field.
    pub unknown5: u32,
    /// Unknown field.
    pub unknown6: u32,
    /// Unknown field.
    pub unknown7: u32,
}

/// A memory or hot cue (or loop) of the extended cue list.
///
/// Entries written by older software versions may be truncated before the comment or the color
/// fields; the affected fields decode as `None`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ExtendedCue {
    /// Cue entry header.
    pub header: SectionHeader,
    /// Hot cue number: `0` if this is not a hot cue, `1` for hot cue A, `2` for B, etc.
    pub hot_cue: u32,
    /// Type of this cue (point or loop).
    pub cue_type: CueType,
    /// Unknown field. Seems to always have the value `0`.
    pub unknown1: u8,
    /// Unknown field. Seems to always have the value `0x03E8` (= decimal 1000).
    pub unknown2: u16,
    /// Time in milliseconds after which this cue would occur (at normal playback speed).
    pub time: u32,
    /// Time in milliseconds after which the loop would jump back to `time` (at normal playback
    /// speed).
    pub loop_time: Option<u32>,
    /// Color assigned to this cue.
    ///
    /// Only used by memory cues; hot cues use the fields below instead.
    pub color: Option<ColorIndex>,
    /// Represents the loop size numerator (if this is a quantized loop).
    pub loop_numerator: Option<u16>,
    /// Represents the loop size denominator (if this is a quantized loop).
    pub loop_denominator: Option<u16>,
    /// An UTF-16BE encoded comment.
    pub comment: Option<String>,
    /// Hot cue color index as shown in the library software.
    ///
    /// `0x00` means no color (green on older players).
    pub hot_cue_color_index: Option<u8>,
    /// Hot cue color RGB value.
    ///
    /// This color is possibly used to illuminate the RGB LEDs of pads in a player that has
    /// loaded the cue. If no color is associated with this hot cue, the value is `(0, 0, 0)`.
    pub hot_cue_color_rgb: Option<(u8, u8, u8)>,
}

impl ExtendedCue {
    /// Decode an extended cue entry from the body bytes after its header, tolerating bodies
    /// truncated before the comment or the color fields.
    fn from_body(header: SectionHeader, body: &[u8]) -> Self {
        fn take<T>(cursor: &mut Cursor<&[u8]>) -> Option<T>
        where
            T: for<'a> BinRead<Args<'a> = ()>,
        {
            T::read_be(cursor).ok()
        }

        let mut cursor = Cursor::new(body);
        let hot_cue = take::<u32>(&mut cursor).unwrap_or_default();
        let cue_type = take::<CueType>(&mut cursor).unwrap_or(CueType::Unknown(0));
        let unknown1 = take::<u8>(&mut cursor).unwrap_or_default();
        let unknown2 = take::<u16>(&mut cursor).unwrap_or_default();
        let time = take::<u32>(&mut cursor).unwrap_or_default();
        let loop_time = take::<u32>(&mut cursor);
        let color = take::<ColorIndex>(&mut cursor);
        let _unknown3 = take::<u8>(&mut cursor);
        let _unknown4 = take::<u16>(&mut cursor);
        let _unknown5 = take::<u32>(&mut cursor);
        let loop_numerator = take::<u16>(&mut cursor);
        let loop_denominator = take::<u16>(&mut cursor);

        let comment = take::<u32>(&mut cursor).and_then(|len_comment| {
            let mut units = Vec::with_capacity((len_comment / 2) as usize);
            for _ in 0..len_comment / 2 {
                units.push(take::<u16>(&mut cursor)?);
            }
            while units.last() == Some(&0) {
                units.pop();
            }
            Some(String::from_utf16_lossy(&units))
        });

        let hot_cue_color_index = take::<u8>(&mut cursor);
        let hot_cue_color_rgb = take::<u8>(&mut cursor).and_then(|red| {
            let green = take::<u8>(&mut cursor)?;
            let blue = take::<u8>(&mut cursor)?;
            Some((red, green, blue))
        });

        Self {
            header,
            hot_cue,
            cue_type,
            unknown1,
            unknown2,
            time,
            loop_time,
            color,
            loop_numerator,
            loop_denominator,
            comment,
            hot_cue_color_index,
            hot_cue_color_rgb,
        }
    }
}

/// Single column value in a waveform preview.
///
/// Each byte encodes one column: the low 5 bits are the column height, the high 3 bits its
/// whiteness.
#[bitfield]
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[br(big, map = Self::from_bytes)]
#[bw(big, map = |x: &WaveformPreviewColumn| x.into_bytes())]
pub struct WaveformPreviewColumn {
    /// Height of the column in pixels.
    pub height: B5,
    /// Shade of white.
    pub whiteness: B3,
}

/// Single column value in a tiny waveform preview.
#[bitfield]
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[br(big, map = Self::from_bytes)]
#[bw(big, map = |x: &TinyWaveformPreviewColumn| x.into_bytes())]
pub struct TinyWaveformPreviewColumn {
    /// Height of the column in pixels.
    pub height: B4,
    #[skip]
    __: B4,
}

/// Single column value in a color waveform preview.
///
/// Each column is six bytes, of which only the low 7 bits are significant: two values that
/// somehow encode the whiteness of the column, followed by the sound energy in the bottom half,
/// bottom third, middle third and top third of the frequency range.
#[bitfield]
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[br(big, map = Self::from_bytes)]
#[bw(big, map = |x: &WaveformColorPreviewColumn| x.into_bytes())]
pub struct WaveformColorPreviewColumn {
    /// Unknown field (somehow encodes the "whiteness").
    pub unknown1: B7,
    #[skip]
    __: B1,
    /// Unknown field (somehow encodes the "whiteness").
    pub unknown2: B7,
    #[skip]
    __: B1,
    /// Sound energy in the bottom half of the frequency range (below 10 KHz).
    pub energy_bottom_half: B7,
    #[skip]
    __: B1,
    /// Sound energy in the bottom third of the frequency range.
    pub energy_bottom_third: B7,
    #[skip]
    __: B1,
    /// Sound energy in the middle third of the frequency range.
    pub energy_middle_third: B7,
    #[skip]
    __: B1,
    /// Sound energy in the top third of the frequency range.
    pub energy_top_third: B7,
    #[skip]
    __: B1,
}

/// Single column value in a color waveform detail.
///
/// Each entry is a 16-bit big-endian value packing, from the most significant bit down: red (3
/// bits), green (3 bits), blue (3 bits), height (5 bits) and two unused bits.
#[bitfield]
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[br(big, map = |x: u16| Self::from_bytes(x.to_le_bytes()))]
#[bw(big, map = |x: &WaveformColorDetailColumn| u16::from_le_bytes(x.into_bytes()))]
pub struct WaveformColorDetailColumn {
    #[skip]
    __: B2,
    /// Height of the column in pixels.
    pub height: B5,
    /// Blue color component.
    pub blue: B3,
    /// Green color component.
    pub green: B3,
    /// Red color component.
    pub red: B3,
}

/// Single column value in a three-band waveform.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Waveform3BandColumn {
    /// Height of the mid-range frequency band.
    pub mid: u8,
    /// Height of the high frequency band.
    pub high: u8,
    /// Height of the low frequency band.
    pub low: u8,
}

/// Overall mood of the track, as determined by the phrase analysis.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mood {
    /// "High" mood: phrases are labeled Intro, Up, Down, Chorus and Outro.
    #[brw(magic = 1u16)]
    High,
    /// "Mid" mood: phrases are labeled Intro, Verse 1-6, Bridge, Chorus and Outro.
    #[brw(magic = 2u16)]
    Mid,
    /// "Low" mood: like "mid", but verse phrases collapse to Verse 1 and Verse 2.
    #[brw(magic = 3u16)]
    Low,
    /// Unknown mood value, preserved verbatim.
    Unknown(u16),
}

/// Stylistic bank assigned to the track for lighting effects.
#[derive(Debug, Display, PartialEq, Eq, Clone, Copy)]
pub enum Bank {
    /// Default bank.
    Default,
    /// "Cool" bank.
    Cool,
    /// "Natural" bank.
    Natural,
    /// "Hot" bank.
    Hot,
    /// "Subtle" bank.
    Subtle,
    /// "Warm" bank.
    Warm,
    /// "Vivid" bank.
    Vivid,
    /// "Club 1" bank.
    #[display("Club 1")]
    Club1,
    /// "Club 2" bank.
    #[display("Club 2")]
    Club2,
}

impl Bank {
    /// Resolve the raw bank byte into a bank label.
    ///
    /// Values outside the documented 0-8 range (`0xf3` and `0xf9` have been observed in the
    /// wild) yield `None`.
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Default),
            1 => Some(Self::Cool),
            2 => Some(Self::Natural),
            3 => Some(Self::Hot),
            4 => Some(Self::Subtle),
            5 => Some(Self::Warm),
            6 => Some(Self::Vivid),
            7 => Some(Self::Club1),
            8 => Some(Self::Club2),
            _ => None,
        }
    }
}

/// Human-readable label of a phrase, resolved from the track mood and the phrase kind.
#[derive(Debug, Display, PartialEq, Eq, Clone, Copy)]
pub enum PhraseLabel {
    /// Intro phrase.
    Intro,
    /// Up phrase (high mood only).
    Up,
    /// Down phrase (high mood only).
    Down,
    /// Numbered verse phrase.
    #[display("Verse {0}")]
    Verse(u8),
    /// Bridge phrase.
    Bridge,
    /// Chorus phrase.
    Chorus,
    /// Outro phrase.
    Outro,
}

/// A single phrase of the song structure analysis.
#[binrw]
#[brw(big)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Phrase {
    /// One-based index of the phrase.
    pub index: u16,
    /// Beat number at which the phrase starts.
    pub beat: u16,
    /// Raw phrase kind; the human-readable label also depends on the track mood.
    pub kind: u16,
    /// Unknown field.
    pub unknown1: u8,
    /// Phrase flag, modifies the label of some high-mood phrases.
    pub k1: u8,
    /// Unknown field.
    pub unknown2: u8,
    /// Phrase flag, modifies the label of some high-mood phrases.
    pub k2: u8,
    /// Unknown field.
    pub unknown3: u8,
    /// Indicates that `beat2`, `beat3` and `beat4` hold beat numbers of "Up 3" phrase parts.
    pub b: u8,
    /// Beat number of an additional phrase part.
    pub beat2: u16,
    /// Beat number of an additional phrase part.
    pub beat3: u16,
    /// Beat number of an additional phrase part.
    pub beat4: u16,
    /// Unknown field.
    pub unknown4: u8,
    /// Phrase flag, modifies the label of some high-mood phrases.
    pub k3: u8,
    /// Unknown field.
    pub unknown5: u8,
    /// Non-zero if the phrase ends with a fill-in.
    pub fill: u8,
    /// Beat number at which the fill-in starts.
    pub beat_fill: u16,
}

impl Phrase {
    /// Resolve the phrase label for the given track mood.
    ///
    /// Unmapped kind values yield `None`; the raw `kind` field stays available either way.
    #[must_use]
    pub fn label(&self, mood: Mood) -> Option<PhraseLabel> {
        match mood {
            Mood::High => match self.kind {
                1 => Some(PhraseLabel::Intro),
                2 => Some(PhraseLabel::Up),
                3 => Some(PhraseLabel::Down),
                5 => Some(PhraseLabel::Chorus),
                6 => Some(PhraseLabel::Outro),
                _ => None,
            },
            Mood::Mid => match self.kind {
                1 => Some(PhraseLabel::Intro),
                kind @ 2..=7 => Some(PhraseLabel::Verse((kind - 1) as u8)),
                8 => Some(PhraseLabel::Bridge),
                9 => Some(PhraseLabel::Chorus),
                10 => Some(PhraseLabel::Outro),
                _ => None,
            },
            Mood::Low => match self.kind {
                1 => Some(PhraseLabel::Intro),
                2..=4 => Some(PhraseLabel::Verse(1)),
                5..=7 => Some(PhraseLabel::Verse(2)),
                8 => Some(PhraseLabel::Bridge),
                9 => Some(PhraseLabel::Chorus),
                10 => Some(PhraseLabel::Outro),
                _ => None,
            },
            Mood::Unknown(_) => None,
        }
    }
}

/// Body of a song structure tag, past the phrase count.
///
/// Recent library versions write everything after the phrase count XOR-masked with a key derived
/// from the phrase count; the unknown header fields are preserved verbatim to enable later
/// investigation.
#[binread]
#[br(big, import(len_entries: u16))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SongStructureData {
    /// Mood of the track.
    pub mood: Mood,
    /// Unknown field.
    pub unknown1: [u8; 6],
    /// Beat number at which the last phrase ends.
    pub end_beat: u16,
    /// Unknown field.
    pub unknown2: [u8; 2],
    /// Raw stylistic bank byte; see [`SongStructureData::bank`] for the resolved label.
    pub raw_bank: u8,
    /// Unknown field.
    pub unknown3: u8,
    /// The phrases of the track.
    #[br(count = len_entries)]
    pub phrases: Vec<Phrase>,
}

impl SongStructureData {
    /// Resolve the stylistic bank label, if the raw byte is within the documented range.
    #[must_use]
    pub fn bank(&self) -> Option<Bank> {
        Bank::from_raw(self.raw_bank)
    }
}

#[binrw::parser(reader, endian)]
fn parse_song_structure_body(
    header: SectionHeader,
    len_entries: u16,
    unmasked: bool,
) -> BinResult<SongStructureData> {
    // Everything after the two-byte phrase count is masked: 12 header bytes, the four-byte entry
    // size and the count itself have been consumed at this point.
    let body_len = header.total_size.saturating_sub(18);
    let mut raw = vec![0u8; body_len as usize];
    reader.read_exact(&mut raw)?;
    if unmasked {
        SongStructureData::read_options(&mut Cursor::new(&raw), endian, (len_entries,))
    } else {
        let key = song_structure_key(len_entries);
        let mut stream = XorStream::with_key(Cursor::new(&raw), key);
        SongStructureData::read_options(&mut stream, endian, (len_entries,))
    }
}

#[binrw::parser(reader, endian)]
fn parse_cues(len_cues: u16) -> BinResult<Vec<Cue>> {
    let mut cues = Vec::new();
    for _ in 0..len_cues {
        let entry_start = reader.stream_position()?;
        match Cue::read_options(reader, endian, ()) {
            Ok(cue) if cue.header.kind == ContentKind::Cue && cue.header.total_size >= 12 => {
                let next = entry_start + u64::from(cue.header.total_size);
                reader.seek(SeekFrom::Start(next))?;
                cues.push(cue);
            }
            Ok(cue) => {
                tracing::warn!(
                    offset = entry_start,
                    kind = ?cue.header.kind,
                    "skipping cue entry with unexpected header"
                );
                if cue.header.total_size < 12 {
                    break;
                }
                reader.seek(SeekFrom::Start(entry_start + u64::from(cue.header.total_size)))?;
            }
            Err(err) => {
                tracing::warn!(offset = entry_start, %err, "skipping malformed cue entry");
                reader.seek(SeekFrom::Start(entry_start))?;
                match SectionHeader::read_options(reader, endian, ()) {
                    Ok(header) if header.total_size >= 12 => {
                        reader
                            .seek(SeekFrom::Start(entry_start + u64::from(header.total_size)))?;
                    }
                    _ => break,
                }
            }
        }
    }
    Ok(cues)
}

#[binrw::parser(reader, endian)]
fn parse_extended_cues(len_cues: u16) -> BinResult<Vec<ExtendedCue>> {
    let mut cues = Vec::new();
    for _ in 0..len_cues {
        let entry_start = reader.stream_position()?;
        let header = match SectionHeader::read_options(reader, endian, ()) {
            Ok(header) => header,
            Err(err) => {
                tracing::warn!(offset = entry_start, %err, "truncated extended cue entry");
                break;
            }
        };
        if header.kind != ContentKind::ExtendedCue || header.total_size < 12 {
            tracing::warn!(
                offset = entry_start,
                kind = ?header.kind,
                "skipping extended cue entry with unexpected header"
            );
            if header.total_size < 12 {
                break;
            }
            reader.seek(SeekFrom::Start(entry_start + u64::from(header.total_size)))?;
            continue;
        }
        let mut body = vec![0u8; (header.total_size - 12) as usize];
        if let Err(err) = reader.read_exact(&mut body) {
            tracing::warn!(offset = entry_start, %err, "truncated extended cue entry");
            break;
        }
        cues.push(ExtendedCue::from_body(header, &body));
    }
    Ok(cues)
}

#[binrw::parser(reader)]
fn parse_utf16be_string(len_bytes: u32) -> BinResult<String> {
    let mut buf = vec![0u8; len_bytes as usize];
    reader.read_exact(&mut buf)?;
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect();
    let mut string = String::from_utf16_lossy(&units);
    while string.ends_with('\0') {
        string.pop();
    }
    Ok(string)
}

/// Section content, which differs depending on the section type.
#[binread]
#[br(big, import(header: SectionHeader, unmasked: bool))]
#[derive(Debug, PartialEq, Clone)]
pub enum Content {
    /// All beats in the track.
    #[br(pre_assert(header.kind == ContentKind::BeatGrid))]
    BeatGrid(BeatGridContent),
    /// List of cue points or loops (either hot cues or memory cues).
    #[br(pre_assert(header.kind == ContentKind::CueList))]
    CueList(CueListContent),
    /// List of cue points or loops (either hot cues or memory cues, extended version).
    #[br(pre_assert(header.kind == ContentKind::ExtendedCueList))]
    ExtendedCueList(ExtendedCueListContent),
    /// Path of the audio file that this analysis belongs to.
    #[br(pre_assert(header.kind == ContentKind::Path))]
    Path(PathContent),
    /// Seek information for variable bitrate files (probably).
    #[br(pre_assert(header.kind == ContentKind::Vbr))]
    Vbr(#[br(args(header))] VbrContent),
    /// Fixed-width monochrome preview of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::WaveformPreview))]
    WaveformPreview(#[br(args(header, WaveformPreviewContent::PREVIEW_LEN))] WaveformPreviewContent),
    /// Smaller version of the fixed-width monochrome preview of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::TinyWaveformPreview))]
    TinyWaveformPreview(
        #[br(args(header, TinyWaveformPreviewContent::PREVIEW_LEN))] TinyWaveformPreviewContent,
    ),
    /// Variable-width large monochrome version of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::WaveformDetail))]
    WaveformDetail(#[br(args(header))] WaveformDetailContent),
    /// Fixed-width colored version of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::WaveformColorPreview))]
    WaveformColorPreview(#[br(args(header))] WaveformColorPreviewContent),
    /// Variable-width large colored version of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::WaveformColorDetail))]
    WaveformColorDetail(#[br(args(header))] WaveformColorDetailContent),
    /// Fixed-width three-band version of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::Waveform3BandPreview))]
    Waveform3BandPreview(#[br(args(header, false))] Waveform3BandContent),
    /// Variable-width large three-band version of the track waveform.
    #[br(pre_assert(header.kind == ContentKind::Waveform3BandDetail))]
    Waveform3BandDetail(#[br(args(header, true))] Waveform3BandContent),
    /// Describes the structure of a song (intro, chorus, verse, etc.).
    #[br(pre_assert(header.kind == ContentKind::SongStructure))]
    SongStructure(#[br(args(header, unmasked))] SongStructureContent),
    /// Unknown content, preserved verbatim.
    #[br(pre_assert(matches!(
        header.kind,
        ContentKind::Unknown(_) | ContentKind::File | ContentKind::Cue | ContentKind::ExtendedCue
    )))]
    Unknown {
        /// Unknown header data.
        #[br(count = header.remaining_size())]
        header_data: Vec<u8>,
        /// Unknown content data.
        #[br(count = header.content_size())]
        content_data: Vec<u8>,
    },
}

/// Content of a beat grid section.
#[binread]
#[br(big)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BeatGridContent {
    /// Unknown field.
    pub unknown1: u32,
    /// Unknown field, apparently always `0x00800000`.
    pub unknown2: u32,
    /// Number of beats in the grid.
    #[br(temp)]
    len_beats: u32,
    /// Beats in this beat grid.
    #[br(count = len_beats)]
    pub beats: Vec<Beat>,
}

/// Content of a legacy cue list section.
#[binread]
#[br(big)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CueListContent {
    /// The type of cues (memory or hot) that this list contains.
    pub list_type: CueListType,
    /// Number of cue entries.
    ///
    /// The two bytes after the count hold garbage in files seen in the wild, so only this 16-bit
    /// field is read; earlier decoders read all four bytes as one count and produced absurd
    /// values.
    #[br(temp)]
    len_cues: u16,
    /// Unknown field.
    pub unknown: u16,
    /// Unknown field, retained but unused.
    pub memory_count: u32,
    /// Cues in this list.
    #[br(args(len_cues), parse_with = parse_cues)]
    pub cues: Vec<Cue>,
}

/// Content of an extended cue list section.
#[binread]
#[br(big)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ExtendedCueListContent {
    /// The type of cues (memory or hot) that this list contains.
    pub list_type: CueListType,
    /// Number of cue entries.
    #[br(temp)]
    len_cues: u16,
    /// Unknown field, apparently always the ASCII bytes `00`.
    pub unknown: u16,
    /// Cues in this list.
    #[br(args(len_cues), parse_with = parse_extended_cues)]
    pub cues: Vec<ExtendedCue>,
}

/// Content of a path section.
#[binread]
#[br(big)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathContent {
    /// Length of the path in bytes, including the trailing NUL.
    #[br(temp)]
    len_path: u32,
    /// Path of the audio file, UTF-16BE encoded.
    #[br(args(len_path), parse_with = parse_utf16be_string)]
    pub path: String,
}

/// Content of a VBR seek index section. The payload is opaque.
#[binread]
#[br(big, import(header: SectionHeader))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VbrContent {
    /// Unknown field.
    pub unknown1: u32,
    /// Unknown data.
    #[br(count = header.content_size())]
    pub data: Vec<u8>,
}

/// Content of a waveform preview section.
#[binread]
#[br(big, import(header: SectionHeader, expected_len: u32))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WaveformPreviewContent {
    /// Unknown field (almost the length of the preview data).
    pub len_preview: u32,
    /// Unknown field (apparently always `0x00100000`).
    pub unknown: u32,
    /// Number of data bytes; must be exact, except for vestigial empty previews.
    #[br(temp, calc = header.content_size())]
    #[br(assert(data_size == expected_len || data_size == 0))]
    data_size: u32,
    /// Waveform preview column data.
    #[br(count = data_size)]
    pub data: Vec<WaveformPreviewColumn>,
}

impl WaveformPreviewContent {
    /// Fixed number of columns in a full-size waveform preview.
    pub const PREVIEW_LEN: u32 = 400;
}

/// Content of a tiny waveform preview section.
#[binread]
#[br(big, import(header: SectionHeader, expected_len: u32))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TinyWaveformPreviewContent {
    /// Unknown field (almost the length of the preview data).
    pub len_preview: u32,
    /// Unknown field.
    pub unknown: u32,
    /// Number of data bytes; must be exact, except for vestigial empty previews.
    #[br(temp, calc = header.content_size())]
    #[br(assert(data_size == expected_len || data_size == 0))]
    data_size: u32,
    /// Waveform preview column data.
    #[br(count = data_size)]
    pub data: Vec<TinyWaveformPreviewColumn>,
}

impl TinyWaveformPreviewContent {
    /// Fixed number of columns in a tiny waveform preview.
    pub const PREVIEW_LEN: u32 = 100;
}

/// Content of a monochrome waveform detail section.
#[binread]
#[br(big, import(header: SectionHeader))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WaveformDetailContent {
    /// Size of a single entry, always 1.
    #[br(temp, assert(len_entry_bytes == 1))]
    len_entry_bytes: u32,
    /// Number of entries in this section.
    #[br(temp)]
    #[br(assert(u64::from(len_entries) * u64::from(len_entry_bytes) == u64::from(header.content_size())))]
    len_entries: u32,
    /// Unknown field.
    pub unknown: u32,
    /// Waveform detail column data.
    #[br(count = len_entries)]
    pub data: Vec<WaveformPreviewColumn>,
}

/// Content of a color waveform preview section.
#[binread]
#[br(big, import(header: SectionHeader))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WaveformColorPreviewContent {
    /// Size of a single entry, always 6.
    #[br(temp, assert(len_entry_bytes == 6))]
    len_entry_bytes: u32,
    /// Number of entries in this section.
    #[br(temp)]
    #[br(assert(u64::from(len_entries) * u64::from(len_entry_bytes) == u64::from(header.content_size())))]
    len_entries: u32,
    /// Unknown field.
    pub unknown: u32,
    /// Color waveform preview column data.
    #[br(count = len_entries)]
    pub data: Vec<WaveformColorPreviewColumn>,
}

/// Content of a color waveform detail section.
#[binread]
#[br(big, import(header: SectionHeader))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WaveformColorDetailContent {
    /// Size of a single entry, always 2.
    #[br(temp, assert(len_entry_bytes == 2))]
    len_entry_bytes: u32,
    /// Number of entries in this section.
    #[br(temp)]
    #[br(assert(u64::from(len_entries) * u64::from(len_entry_bytes) == u64::from(header.content_size())))]
    len_entries: u32,
    /// Unknown field.
    pub unknown: u32,
    /// Color waveform detail column data.
    #[br(count = len_entries)]
    pub data: Vec<WaveformColorDetailColumn>,
}

/// Content of a three-band waveform section (preview or detail).
#[binread]
#[br(big, import(header: SectionHeader, has_unknown: bool))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Waveform3BandContent {
    /// Size of a single entry, always 3.
    #[br(temp, assert(len_entry_bytes == 3))]
    len_entry_bytes: u32,
    /// Number of entries in this section.
    #[br(temp)]
    #[br(assert(u64::from(len_entries) * u64::from(len_entry_bytes) == u64::from(header.content_size())))]
    len_entries: u32,
    /// Unknown field, only present in the detail variant.
    #[br(if(has_unknown))]
    pub unknown: Option<u32>,
    /// Three-band waveform column data.
    #[br(count = len_entries)]
    pub data: Vec<Waveform3BandColumn>,
}

/// Content of a song structure section.
#[binread]
#[br(big, import(header: SectionHeader, unmasked: bool))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SongStructureContent {
    /// Size of a single phrase entry, always 24.
    #[br(temp, assert(len_entry_bytes == 24))]
    len_entry_bytes: u32,
    /// Number of phrase entries.
    #[br(temp)]
    len_entries: u16,
    /// The (possibly unmasked) body of the section.
    #[br(args(header, len_entries, unmasked), parse_with = parse_song_structure_body)]
    pub data: SongStructureData,
}

/// A decoded section of an analysis file.
#[derive(Debug, PartialEq, Clone)]
pub struct Section {
    /// The section header.
    pub header: SectionHeader,
    /// The decoded section content.
    pub content: Content,
}

/// An analysis file, decoded into its sections.
///
/// The file envelope is verified eagerly and all sections are decoded at open time; the byte
/// source is not retained afterwards.
#[derive(Debug)]
pub struct Anlz {
    /// The file envelope header (`PMAI`).
    pub header: SectionHeader,
    /// Unstudied remainder of the envelope header.
    header_data: Vec<u8>,
    /// The decoded sections, in file order.
    sections: Vec<Section>,
}

impl Anlz {
    /// Decode an analysis file with default options.
    pub fn open(source: &ByteSource) -> Result<Self> {
        Self::open_with(source, AnlzOptions::default())
    }

    /// Decode an analysis file.
    pub fn open_with(source: &ByteSource, options: AnlzOptions) -> Result<Self> {
        let mut cursor = source.cursor();
        let header =
            SectionHeader::read(&mut cursor).map_err(|err| Error::malformed_tag(0, err))?;
        if header.kind != ContentKind::File {
            return Err(Error::BadMagic {
                at: 0,
                found: format!("expected `PMAI`, found {:?}", header.kind),
            });
        }
        if header.size < 12 || u64::from(header.size) > source.len() {
            return Err(Error::malformed_tag(0, "file header length out of range"));
        }
        if u64::from(header.total_size) > source.len() {
            return Err(Error::malformed_tag(
                0,
                format!(
                    "file length field ({}) exceeds actual file size ({})",
                    header.total_size,
                    source.len()
                ),
            ));
        }
        let header_data = source
            .read_bytes(12, u64::from(header.remaining_size()))?
            .to_vec();

        let end = u64::from(header.total_size);
        let mut sections = Vec::new();
        let mut position = u64::from(header.size);
        while position + 12 <= end {
            cursor
                .seek(SeekFrom::Start(position))
                .map_err(|err| Error::malformed_tag(position, err))?;
            let section_header = SectionHeader::read(&mut cursor)
                .map_err(|err| Error::malformed_tag(position, err))?;
            if section_header.total_size < 12 || section_header.size < 12 {
                return Err(Error::malformed_tag(
                    position,
                    format!(
                        "section length fields too small (header {}, total {})",
                        section_header.size, section_header.total_size
                    ),
                ));
            }
            if position + u64::from(section_header.total_size) > end {
                return Err(Error::malformed_tag(
                    position,
                    format!(
                        "section of {} bytes exceeds the remaining {} bytes of the file",
                        section_header.total_size,
                        end - position
                    ),
                ));
            }
            if section_header.size > section_header.total_size {
                tracing::warn!(
                    offset = position,
                    kind = ?section_header.kind,
                    "skipping section whose header length exceeds its total length"
                );
                position += u64::from(section_header.total_size);
                continue;
            }

            match Content::read_options(
                &mut cursor,
                Endian::Big,
                (section_header, options.unmasked),
            ) {
                Ok(content) => sections.push(Section {
                    header: section_header,
                    content,
                }),
                Err(err) => {
                    tracing::warn!(
                        offset = position,
                        kind = ?section_header.kind,
                        %err,
                        "skipping undecodable section"
                    );
                }
            }
            position += u64::from(section_header.total_size);
        }
        if position != end {
            tracing::warn!(
                position,
                file_length = end,
                "analysis file has trailing bytes that belong to no section"
            );
        }

        Ok(Self {
            header,
            header_data,
            sections,
        })
    }

    /// The unstudied remainder of the envelope header.
    #[must_use]
    pub fn header_data(&self) -> &[u8] {
        &self.header_data
    }

    /// Iterate over the decoded sections in file order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Find the first section of the given kind.
    #[must_use]
    pub fn find(&self, kind: ContentKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.header.kind == kind)
    }

    /// The decoded beat grid, if the file contains one.
    #[must_use]
    pub fn beat_grid(&self) -> Option<&BeatGridContent> {
        match self.find(ContentKind::BeatGrid) {
            Some(Section {
                content: Content::BeatGrid(content),
                ..
            }) => Some(content),
            _ => None,
        }
    }

    /// The path of the analyzed audio file, if the file contains one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self.find(ContentKind::Path) {
            Some(Section {
                content: Content::Path(content),
                ..
            }) => Some(content.path.as_str()),
            _ => None,
        }
    }

    /// The decoded song structure, if the file contains one.
    #[must_use]
    pub fn song_structure(&self) -> Option<&SongStructureData> {
        match self.find(ContentKind::SongStructure) {
            Some(Section {
                content: Content::SongStructure(content),
                ..
            }) => Some(&content.data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn waveform_preview_column() {
        // height 0b10110 = 22, whiteness 0b101 = 5
        let column = WaveformPreviewColumn::from_bytes([0b1011_0110]);
        assert_eq!(column.height(), 22);
        assert_eq!(column.whiteness(), 5);
    }

    #[test]
    fn tiny_waveform_preview_column() {
        let column = TinyWaveformPreviewColumn::from_bytes([0xf7]);
        assert_eq!(column.height(), 7);
    }

    #[test]
    fn color_detail_column_unpacks_big_endian_view() {
        // From the most significant bit: red = 0b111, everything else zero.
        let value: u16 = 0b1110_0000_0000_0000;
        let column = WaveformColorDetailColumn::from_bytes(value.to_le_bytes());
        assert_eq!(column.red(), 7);
        assert_eq!(column.green(), 0);
        assert_eq!(column.blue(), 0);
        assert_eq!(column.height(), 0);

        // red 0b101, green 0b011, blue 0b110, height 0b10101
        let value: u16 = 0b101_011_110_10101_00;
        let column = WaveformColorDetailColumn::from_bytes(value.to_le_bytes());
        assert_eq!(column.red(), 0b101);
        assert_eq!(column.green(), 0b011);
        assert_eq!(column.blue(), 0b110);
        assert_eq!(column.height(), 0b10101);
    }

    #[test]
    fn color_preview_column_energies() {
        let column = WaveformColorPreviewColumn::from_bytes([0x7f, 0x00, 0x40, 0x20, 0x10, 0x08]);
        assert_eq!(column.unknown1(), 0x7f);
        assert_eq!(column.unknown2(), 0);
        assert_eq!(column.energy_bottom_half(), 0x40);
        assert_eq!(column.energy_bottom_third(), 0x20);
        assert_eq!(column.energy_middle_third(), 0x10);
        assert_eq!(column.energy_top_third(), 0x08);
    }

    #[test]
    fn bank_labels() {
        assert_eq!(Bank::from_raw(0), Some(Bank::Default));
        assert_eq!(Bank::from_raw(7), Some(Bank::Club1));
        assert_eq!(Bank::from_raw(7).unwrap().to_string(), "Club 1");
        assert_eq!(Bank::from_raw(0xf3), None);
        assert_eq!(Bank::from_raw(0xf9), None);
    }

    #[test]
    fn phrase_labels_by_mood() {
        let phrase = |kind: u16| Phrase {
            index: 1,
            beat: 1,
            kind,
            unknown1: 0,
            k1: 0,
            unknown2: 0,
            k2: 0,
            unknown3: 0,
            b: 0,
            beat2: 0,
            beat3: 0,
            beat4: 0,
            unknown4: 0,
            k3: 0,
            unknown5: 0,
            fill: 0,
            beat_fill: 0,
        };
        assert_eq!(phrase(2).label(Mood::High), Some(PhraseLabel::Up));
        assert_eq!(phrase(4).label(Mood::High), None);
        assert_eq!(phrase(3).label(Mood::Mid), Some(PhraseLabel::Verse(2)));
        assert_eq!(phrase(3).label(Mood::Low), Some(PhraseLabel::Verse(1)));
        assert_eq!(phrase(6).label(Mood::Low), Some(PhraseLabel::Verse(2)));
        assert_eq!(phrase(10).label(Mood::Mid), Some(PhraseLabel::Outro));
        assert_eq!(phrase(10).label(Mood::Unknown(7)), None);
        assert_eq!(
            phrase(5).label(Mood::Mid).unwrap().to_string(),
            "Verse 4".to_string()
        );
    }
}
