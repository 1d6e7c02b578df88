// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Wrapper types for dealing with XOR obfuscation.

use binrw::io::{Read, Result, Seek, SeekFrom, Write};
use std::iter::Cycle;

/// Base pattern of the 19-byte mask applied to song structure tags.
///
/// The per-file key is derived by adding the tag's phrase count to every byte (mod 256).
const SONG_STRUCTURE_MASK: [u8; 19] = [
    0xCB, 0xE1, 0xEE, 0xFA, 0xE5, 0xEE, 0xAD, 0xEE, 0xE9, 0xD2, 0xE9, 0xEB, 0xE1, 0xE9, 0xF3,
    0xE8, 0xE9, 0xF4, 0xE1,
];

/// Derive the XOR key that masks a song structure tag with `len_entries` phrase entries.
pub(crate) fn song_structure_key(len_entries: u16) -> Vec<u8> {
    let shift = (len_entries & 0xFF) as u8;
    SONG_STRUCTURE_MASK
        .iter()
        .map(|byte| byte.wrapping_add(shift))
        .collect()
}

/// Stream cipher wrapper around another [`Read`]- or [`Write`]-able stream that XOR's all bytes
/// after reading/before writing.
#[derive(Debug)]
pub struct XorStream<T> {
    stream: T,
    key: Cycle<std::vec::IntoIter<u8>>,
    key_size: u64,
}

impl<T> XorStream<T> {
    /// Create a new XOR wrapper around `stream` that XOR's all data with `key` before
    /// forwarding it.
    pub fn with_key(stream: T, key: Vec<u8>) -> Self {
        let key = if key.is_empty() { vec![0] } else { key };
        let key_size = key.len() as u64;
        let key = key.into_iter().cycle();
        Self {
            stream,
            key,
            key_size,
        }
    }
}

impl<R: Read> Read for XorStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let bytes_read = self.stream.read(buf)?;

        for byte in &mut buf[..bytes_read] {
            let key_byte = self.key.next().unwrap_or(0);
            *byte ^= key_byte;
        }

        Ok(bytes_read)
    }
}

impl<W: Write> Write for XorStream<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let encrypted_buffer: Vec<u8> = buf
            .iter()
            .map(|x| {
                let key_byte = self.key.next().unwrap_or(0);
                x ^ key_byte
            })
            .collect();

        self.stream.write(&encrypted_buffer)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()
    }
}

impl<S: Seek> Seek for XorStream<S> {
    fn seek(&mut self, position: SeekFrom) -> Result<u64> {
        let old_position = self.stream.stream_position()?;
        let new_position = self.stream.seek(position)?;

        // Advance the cyclic key iterator so that it stays aligned with the stream position.
        let offset = if new_position > old_position {
            (new_position - old_position) % self.key_size
        } else {
            self.key_size - ((old_position - new_position) % self.key_size)
        };

        for _ in 0..offset {
            self.key.next();
        }

        Ok(new_position)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use binrw::io::Cursor;

    #[test]
    fn roundtrip_through_stream() {
        let plain = b"binary analysis data".to_vec();
        let key = vec![0x13, 0x37, 0x42];

        let mut masked = Vec::new();
        {
            let mut writer = XorStream::with_key(Cursor::new(&mut masked), key.clone());
            writer.write_all(&plain).unwrap();
        }
        assert_ne!(masked, plain);

        let mut reader = XorStream::with_key(Cursor::new(&masked), key);
        let mut unmasked = vec![0; plain.len()];
        reader.read_exact(&mut unmasked).unwrap();
        assert_eq!(unmasked, plain);
    }

    #[test]
    fn key_shift_wraps() {
        let key = song_structure_key(5);
        assert_eq!(key[0], 0xD0);
        assert_eq!(key.len(), 19);
        // 0xFA + 0x10 wraps modulo 256.
        let key = song_structure_key(0x110);
        assert_eq!(key[3], 0x0A);
    }
}
