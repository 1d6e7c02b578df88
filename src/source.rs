// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Random-access byte sources that back the decoders.
//!
//! Both file families are decoded from a [`ByteSource`], a length-known, seekable view over either
//! a memory-mapped file or an in-memory buffer. Views are cheap to clone and to narrow via
//! [`ByteSource::sub`], which makes bounded parsing of pages and sections straightforward.

use crate::util::{Error, Result};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

enum Backing {
    Mmap(Mmap),
    Buffer(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mmap(map) => map,
            Backing::Buffer(buf) => buf,
        }
    }
}

/// A random-access view over a memory-mapped file or an in-memory buffer.
///
/// All read methods take offsets relative to the start of the view and fail with
/// [`Error::Truncated`] when the requested range extends past its end. Cloning a `ByteSource` is
/// cheap (the backing storage is shared), so sub-views handed out by [`ByteSource::sub`] can
/// outlive the view they were created from.
#[derive(Clone)]
pub struct ByteSource {
    data: Arc<Backing>,
    start: usize,
    len: usize,
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

impl ByteSource {
    /// Memory-map the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and the crate never writes through it. Truncation of
        // the underlying file by another process while mapped is outside our control, as with any
        // memory-mapped input.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file)? };
        let len = map.len();
        Ok(Self {
            data: Arc::new(Backing::Mmap(map)),
            start: 0,
            len,
        })
    }

    /// Create a source over an owned buffer.
    #[must_use]
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self {
            data: Arc::new(Backing::Buffer(buf)),
            start: 0,
            len,
        }
    }

    /// Length of the view in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len as u64
    }

    /// Returns `true` if the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of this view.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data.as_slice()[self.start..self.start + self.len]
    }

    /// A [`binrw::io::Cursor`] over the view, for stream-based parsing.
    #[must_use]
    pub fn cursor(&self) -> binrw::io::Cursor<&[u8]> {
        binrw::io::Cursor::new(self.as_slice())
    }

    /// A zero-copy sub-view covering `len` bytes starting at `offset`.
    pub fn sub(&self, offset: u64, len: u64) -> Result<Self> {
        self.check(offset, len)?;
        Ok(Self {
            data: Arc::clone(&self.data),
            start: self.start + offset as usize,
            len: len as usize,
        })
    }

    fn check(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset.checked_add(len).ok_or(Error::Truncated {
            at: offset,
            needed: len,
        })?;
        if end > self.len() {
            return Err(Error::Truncated {
                at: offset,
                needed: end - self.len(),
            });
        }
        Ok(())
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read_bytes(&self, offset: u64, len: u64) -> Result<&[u8]> {
        self.check(offset, len)?;
        let start = self.start + offset as usize;
        Ok(&self.data.as_slice()[start..start + len as usize])
    }

    /// Read a single byte.
    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.read_bytes(offset, 1)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&self, offset: u64) -> Result<u16> {
        let bytes = self.read_bytes(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&self, offset: u64) -> Result<u32> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian `u16`.
    pub fn read_u16_be(&self, offset: u64) -> Result<u16> {
        let bytes = self.read_bytes(offset, 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32_be(&self, offset: u64) -> Result<u32> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read `count` bits (at most 64) from the bit-packed little-endian stream starting at
    /// `offset`, skipping the `bit_offset` least significant bits of the first byte.
    ///
    /// Bits are taken LSB-first within each byte, which is the layout of the row-presence bitmaps
    /// at the tail of database pages: bit `i` of the result corresponds to row slot `i`.
    pub fn read_bits(&self, offset: u64, bit_offset: u32, count: u32) -> Result<u64> {
        debug_assert!(bit_offset < 8);
        debug_assert!(count <= 64);
        if count == 0 {
            return Ok(0);
        }
        let total_bits = u64::from(bit_offset) + u64::from(count);
        let num_bytes = total_bits.div_ceil(8);
        let bytes = self.read_bytes(offset, num_bytes)?;
        let mut acc: u128 = 0;
        for (i, byte) in bytes.iter().enumerate() {
            acc |= u128::from(*byte) << (8 * i);
        }
        let mask = if count == 64 {
            u128::from(u64::MAX)
        } else {
            (1u128 << count) - 1
        };
        Ok(((acc >> bit_offset) & mask) as u64)
    }
}
