// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end tests over synthetic analysis files.

use deckcrate::anlz::{
    Anlz, AnlzOptions, Content, ContentKind, CueListType, CueType, Mood, PhraseLabel,
};
use deckcrate::source::ByteSource;
use deckcrate::util::ColorIndex;
use deckcrate::Error;
use pretty_assertions::assert_eq;

/// Assemble one section: tag, header length, total length, remaining header bytes, content.
fn section(fourcc: &[u8; 4], header_rest: &[u8], content: &[u8]) -> Vec<u8> {
    let size = 12 + header_rest.len() as u32;
    let total_size = size + content.len() as u32;
    let mut buf = Vec::with_capacity(total_size as usize);
    buf.extend_from_slice(fourcc);
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(&total_size.to_be_bytes());
    buf.extend_from_slice(header_rest);
    buf.extend_from_slice(content);
    buf
}

/// Assemble a whole analysis file from its sections.
fn anlz_file(sections: &[Vec<u8>]) -> Vec<u8> {
    let body_len: usize = sections.iter().map(Vec::len).sum();
    let total = 0x1c + body_len;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(b"PMAI");
    buf.extend_from_slice(&0x1cu32.to_be_bytes());
    buf.extend_from_slice(&(total as u32).to_be_bytes());
    buf.extend_from_slice(&[0; 0x10]);
    for section in sections {
        buf.extend_from_slice(section);
    }
    buf
}

fn open(buf: Vec<u8>) -> Anlz {
    Anlz::open(&ByteSource::from_vec(buf)).unwrap()
}

fn utf16be(string: &str) -> Vec<u8> {
    string
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_be_bytes())
        .collect()
}

fn path_section(path: &str) -> Vec<u8> {
    let body = utf16be(path);
    section(b"PPTH", &(body.len() as u32).to_be_bytes(), &body)
}

#[test]
fn path_only_file() {
    let anlz = open(anlz_file(&[path_section("/USB/TEST.mp3")]));
    assert_eq!(anlz.sections().count(), 1);
    let found = anlz.find(ContentKind::Path).unwrap();
    match &found.content {
        Content::Path(content) => assert_eq!(content.path, "/USB/TEST.mp3"),
        content => panic!("unexpected content {content:?}"),
    }
    assert_eq!(anlz.path(), Some("/USB/TEST.mp3"));
}

#[test]
fn section_lengths_sum_to_file_length() {
    let buf = anlz_file(&[
        path_section("/USB/TEST.mp3"),
        section(b"XXXX", &[1, 2, 3, 4], b"opaque"),
    ]);
    let file_len = buf.len() as u64;
    let anlz = open(buf);
    let sum: u64 = anlz
        .sections()
        .map(|s| u64::from(s.header.total_size))
        .sum();
    assert_eq!(u64::from(anlz.header.size) + sum, file_len);
    // The unknown section is preserved verbatim rather than dropped.
    match &anlz.find(ContentKind::Unknown(*b"XXXX")).unwrap().content {
        Content::Unknown {
            header_data,
            content_data,
        } => {
            assert_eq!(header_data, &[1, 2, 3, 4]);
            assert_eq!(content_data, b"opaque");
        }
        content => panic!("unexpected content {content:?}"),
    }
}

#[test]
fn beat_grid_decodes() {
    let mut body = Vec::new();
    for (number, time) in [(1u16, 0u32), (2, 468), (3, 937), (4, 1406)] {
        body.extend_from_slice(&number.to_be_bytes());
        body.extend_from_slice(&12800u16.to_be_bytes());
        body.extend_from_slice(&time.to_be_bytes());
    }
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&0u32.to_be_bytes());
    header_rest.extend_from_slice(&0x0080_0000u32.to_be_bytes());
    header_rest.extend_from_slice(&4u32.to_be_bytes());
    let anlz = open(anlz_file(&[section(b"PQTZ", &header_rest, &body)]));

    let grid = anlz.beat_grid().unwrap();
    assert_eq!(grid.beats.len(), 4);
    assert_eq!(grid.beats[1].beat_number, 2);
    assert_eq!(grid.beats[1].tempo, 12800);
    assert!(grid
        .beats
        .windows(2)
        .all(|pair| pair[0].time <= pair[1].time));
}

fn cue_entry(hot_cue: u32, cue_type: u8, time: u32, loop_time: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&hot_cue.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes()); // status
    body.extend_from_slice(&0x0010_0000u32.to_be_bytes());
    body.extend_from_slice(&0xffffu16.to_be_bytes()); // order_first
    body.extend_from_slice(&1u16.to_be_bytes()); // order_last
    body.push(cue_type);
    body.push(0);
    body.extend_from_slice(&0x03e8u16.to_be_bytes());
    body.extend_from_slice(&time.to_be_bytes());
    body.extend_from_slice(&loop_time.to_be_bytes());
    body.extend_from_slice(&[0; 16]);
    section(b"PCPT", &[], &body)
}

fn cue_list_header(list_type: u32, num_cues: u16, garbage: u16) -> Vec<u8> {
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&list_type.to_be_bytes());
    header_rest.extend_from_slice(&num_cues.to_be_bytes());
    header_rest.extend_from_slice(&garbage.to_be_bytes());
    header_rest.extend_from_slice(&0u32.to_be_bytes()); // memory_count
    header_rest
}

#[test]
fn cue_list_reads_16_bit_count() {
    // The four bytes after the list type are `00 04 00 00`: a 32-bit read would see 0x00040000
    // cues, the correct 16-bit read sees 4.
    let entries: Vec<u8> = (0..4).flat_map(|i| cue_entry(i, 1, i * 1000, 0)).collect();
    let anlz = open(anlz_file(&[section(
        b"PCOB",
        &cue_list_header(1, 4, 0),
        &entries,
    )]));
    match &anlz.find(ContentKind::CueList).unwrap().content {
        Content::CueList(list) => {
            assert_eq!(list.list_type, CueListType::HotCues);
            assert_eq!(list.cues.len(), 4);
            assert_eq!(list.cues[2].time, 2000);
            assert_eq!(list.cues[2].cue_type, CueType::Point);
        }
        content => panic!("unexpected content {content:?}"),
    }
}

#[test]
fn empty_cue_list_is_not_an_error() {
    let anlz = open(anlz_file(&[section(
        b"PCOB",
        &cue_list_header(0, 0, 0),
        &[],
    )]));
    match &anlz.find(ContentKind::CueList).unwrap().content {
        Content::CueList(list) => {
            assert_eq!(list.list_type, CueListType::MemoryCues);
            assert!(list.cues.is_empty());
        }
        content => panic!("unexpected content {content:?}"),
    }
}

fn extended_cue_full(hot_cue: u32, time: u32, comment: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&hot_cue.to_be_bytes());
    body.push(1); // cue_type: point
    body.push(0);
    body.extend_from_slice(&0x03e8u16.to_be_bytes());
    body.extend_from_slice(&time.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes()); // loop_time
    body.push(0); // color
    body.push(0);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes()); // loop_numerator
    body.extend_from_slice(&0u16.to_be_bytes()); // loop_denominator
    let comment_bytes = utf16be(comment);
    body.extend_from_slice(&(comment_bytes.len() as u32).to_be_bytes());
    body.extend_from_slice(&comment_bytes);
    body.push(0x01); // hot cue color index
    body.extend_from_slice(&[0x30, 0x5a, 0xff]); // hot cue color rgb
    body.extend_from_slice(&[0; 20]);
    section(b"PCP2", &[], &body)
}

/// An extended cue entry truncated right after `time`, as written by older software.
fn extended_cue_truncated(hot_cue: u32, time: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&hot_cue.to_be_bytes());
    body.push(1);
    body.push(0);
    body.extend_from_slice(&0x03e8u16.to_be_bytes());
    body.extend_from_slice(&time.to_be_bytes());
    body
}

#[test]
fn extended_cue_list_tolerates_truncated_entries() {
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&1u32.to_be_bytes());
    header_rest.extend_from_slice(&2u16.to_be_bytes());
    header_rest.extend_from_slice(b"00");
    let entries: Vec<u8> = [
        extended_cue_full(1, 5000, "drop"),
        extended_cue_truncated(2, 9000),
    ]
    .concat();
    let anlz = open(anlz_file(&[section(b"PCO2", &header_rest, &entries)]));

    match &anlz.find(ContentKind::ExtendedCueList).unwrap().content {
        Content::ExtendedCueList(list) => {
            assert_eq!(list.cues.len(), 2);

            let full = &list.cues[0];
            assert_eq!(full.hot_cue, 1);
            assert_eq!(full.time, 5000);
            assert_eq!(full.comment.as_deref(), Some("drop"));
            assert_eq!(full.color, Some(ColorIndex::None));
            assert_eq!(full.hot_cue_color_index, Some(0x01));
            assert_eq!(full.hot_cue_color_rgb, Some((0x30, 0x5a, 0xff)));

            let partial = &list.cues[1];
            assert_eq!(partial.header.total_size, 0x18);
            assert_eq!(partial.hot_cue, 2);
            assert_eq!(partial.cue_type, CueType::Point);
            assert_eq!(partial.time, 9000);
            assert_eq!(partial.loop_time, None);
            assert_eq!(partial.color, None);
            assert_eq!(partial.comment, None);
            assert_eq!(partial.hot_cue_color_index, None);
            assert_eq!(partial.hot_cue_color_rgb, None);
        }
        content => panic!("unexpected content {content:?}"),
    }
}

fn waveform_preview_section(data: &[u8]) -> Vec<u8> {
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&(data.len() as u32).to_be_bytes());
    header_rest.extend_from_slice(&0x0010_0000u32.to_be_bytes());
    section(b"PWAV", &header_rest, data)
}

#[test]
fn waveform_preview_length_rules() {
    // A full-size preview decodes.
    let data = vec![0b0110_0101u8; 400];
    let anlz = open(anlz_file(&[waveform_preview_section(&data)]));
    match &anlz.find(ContentKind::WaveformPreview).unwrap().content {
        Content::WaveformPreview(preview) => {
            assert_eq!(preview.data.len(), 400);
            assert_eq!(preview.data[0].height(), 0b00101);
            assert_eq!(preview.data[0].whiteness(), 0b011);
        }
        content => panic!("unexpected content {content:?}"),
    }

    // A vestigial empty preview is accepted.
    let anlz = open(anlz_file(&[waveform_preview_section(&[])]));
    assert!(anlz.find(ContentKind::WaveformPreview).is_some());

    // Any other length is rejected: the section is skipped but the file still opens.
    let anlz = open(anlz_file(&[
        waveform_preview_section(&vec![0u8; 300]),
        path_section("/USB/TEST.mp3"),
    ]));
    assert!(anlz.find(ContentKind::WaveformPreview).is_none());
    assert_eq!(anlz.path(), Some("/USB/TEST.mp3"));
}

#[test]
fn color_detail_waveform_decodes() {
    // Two entries; the first has red = 7, the second full height.
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&2u32.to_be_bytes()); // len_entry_bytes
    header_rest.extend_from_slice(&2u32.to_be_bytes()); // len_entries
    header_rest.extend_from_slice(&0u32.to_be_bytes());
    let body = [0xe0, 0x00, 0x00, 0x7c];
    let anlz = open(anlz_file(&[section(b"PWV5", &header_rest, &body)]));
    match &anlz.find(ContentKind::WaveformColorDetail).unwrap().content {
        Content::WaveformColorDetail(detail) => {
            assert_eq!(detail.data.len(), 2);
            assert_eq!(detail.data[0].red(), 7);
            assert_eq!(detail.data[0].height(), 0);
            assert_eq!(detail.data[1].red(), 0);
            assert_eq!(detail.data[1].height(), 0b11111);
        }
        content => panic!("unexpected content {content:?}"),
    }
}

const MASK_BASE: [u8; 19] = [
    0xCB, 0xE1, 0xEE, 0xFA, 0xE5, 0xEE, 0xAD, 0xEE, 0xE9, 0xD2, 0xE9, 0xEB, 0xE1, 0xE9, 0xF3,
    0xE8, 0xE9, 0xF4, 0xE1,
];

fn phrase_entry(index: u16, beat: u16, kind: u16) -> Vec<u8> {
    let mut entry = Vec::with_capacity(24);
    entry.extend_from_slice(&index.to_be_bytes());
    entry.extend_from_slice(&beat.to_be_bytes());
    entry.extend_from_slice(&kind.to_be_bytes());
    entry.extend_from_slice(&[0; 6]); // unknown1, k1, unknown2, k2, unknown3, b
    entry.extend_from_slice(&[0; 6]); // beat2, beat3, beat4
    entry.extend_from_slice(&[0; 4]); // unknown4, k3, unknown5, fill
    entry.extend_from_slice(&0u16.to_be_bytes()); // beat_fill
    entry
}

fn song_structure_section(mood: u16, bank: u8, phrases: &[Vec<u8>], masked: bool) -> Vec<u8> {
    let len_entries = phrases.len() as u16;
    // Everything after the two-byte entry count is maskable.
    let mut maskable = Vec::new();
    maskable.extend_from_slice(&mood.to_be_bytes());
    maskable.extend_from_slice(&[0; 6]); // unknown1
    maskable.extend_from_slice(&128u16.to_be_bytes()); // end_beat
    maskable.extend_from_slice(&[0; 2]); // unknown2
    maskable.push(bank);
    maskable.push(0); // unknown3
    for phrase in phrases {
        maskable.extend_from_slice(phrase);
    }
    if masked {
        for (i, byte) in maskable.iter_mut().enumerate() {
            *byte ^= MASK_BASE[i % 19].wrapping_add(len_entries as u8);
        }
    }

    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&24u32.to_be_bytes()); // len_entry_bytes
    header_rest.extend_from_slice(&len_entries.to_be_bytes());
    header_rest.extend_from_slice(&maskable[..14]);
    section(b"PSSI", &header_rest, &maskable[14..])
}

#[test]
fn masked_song_structure_decodes() {
    let phrases: Vec<Vec<u8>> = (1..=5)
        .map(|i| phrase_entry(i as u16, if i == 1 { 1 } else { i as u16 * 32 }, 2))
        .collect();
    let anlz = open(anlz_file(&[song_structure_section(2, 1, &phrases, true)]));

    let data = anlz.song_structure().unwrap();
    assert_eq!(data.mood, Mood::Mid);
    assert_eq!(data.end_beat, 128);
    assert_eq!(data.bank(), Some(deckcrate::anlz::Bank::Cool));
    assert_eq!(data.phrases.len(), 5);
    assert_eq!(data.phrases[0].index, 1);
    assert_eq!(data.phrases[0].beat, 1);
    assert_eq!(data.phrases[0].label(data.mood), Some(PhraseLabel::Verse(1)));
}

#[test]
fn unmasked_song_structure_with_out_of_range_bank() {
    let phrases = vec![phrase_entry(1, 1, 1)];
    let buf = anlz_file(&[song_structure_section(1, 0xf3, &phrases, false)]);
    let anlz = Anlz::open_with(&ByteSource::from_vec(buf), AnlzOptions { unmasked: true }).unwrap();

    let data = anlz.song_structure().unwrap();
    assert_eq!(data.mood, Mood::High);
    assert_eq!(data.raw_bank, 0xf3);
    assert_eq!(data.bank(), None);
    assert_eq!(data.phrases[0].label(data.mood), Some(PhraseLabel::Intro));

    let phrases = vec![phrase_entry(1, 1, 1)];
    let buf = anlz_file(&[song_structure_section(1, 0xf9, &phrases, false)]);
    let anlz = Anlz::open_with(&ByteSource::from_vec(buf), AnlzOptions { unmasked: true }).unwrap();
    assert_eq!(anlz.song_structure().unwrap().bank(), None);
}

#[test]
fn bad_magic_is_fatal() {
    let mut buf = anlz_file(&[path_section("/USB/TEST.mp3")]);
    buf[0..4].copy_from_slice(b"NOPE");
    assert!(matches!(
        Anlz::open(&ByteSource::from_vec(buf)),
        Err(Error::BadMagic { .. })
    ));
}

#[test]
fn section_past_end_of_file_is_fatal() {
    let mut buf = anlz_file(&[path_section("/USB/TEST.mp3")]);
    // Inflate the section's total length beyond the end of the file.
    let section_total_offset = 0x1c + 8;
    buf[section_total_offset..section_total_offset + 4]
        .copy_from_slice(&0x1000u32.to_be_bytes());
    assert!(matches!(
        Anlz::open(&ByteSource::from_vec(buf)),
        Err(Error::MalformedTag { .. })
    ));
}

#[test]
fn vbr_payload_is_preserved() {
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&0u32.to_be_bytes());
    let payload = vec![0xAA; 32];
    let anlz = open(anlz_file(&[section(b"PVBR", &header_rest, &payload)]));
    match &anlz.find(ContentKind::Vbr).unwrap().content {
        Content::Vbr(vbr) => assert_eq!(vbr.data, payload),
        content => panic!("unexpected content {content:?}"),
    }
}

#[test]
fn three_band_waveforms_decode() {
    // PWV6 has no unknown header field, PWV7 has one.
    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&3u32.to_be_bytes());
    header_rest.extend_from_slice(&2u32.to_be_bytes());
    let body = [10, 20, 30, 40, 50, 60];
    let anlz = open(anlz_file(&[section(b"PWV6", &header_rest, &body)]));
    match &anlz
        .find(ContentKind::Waveform3BandPreview)
        .unwrap()
        .content
    {
        Content::Waveform3BandPreview(waveform) => {
            assert_eq!(waveform.data.len(), 2);
            assert_eq!(waveform.data[0].mid, 10);
            assert_eq!(waveform.data[0].high, 20);
            assert_eq!(waveform.data[0].low, 30);
        }
        content => panic!("unexpected content {content:?}"),
    }

    let mut header_rest = Vec::new();
    header_rest.extend_from_slice(&3u32.to_be_bytes());
    header_rest.extend_from_slice(&1u32.to_be_bytes());
    header_rest.extend_from_slice(&0u32.to_be_bytes());
    let body = [1, 2, 3];
    let anlz = open(anlz_file(&[section(b"PWV7", &header_rest, &body)]));
    assert!(anlz.find(ContentKind::Waveform3BandDetail).is_some());
}
