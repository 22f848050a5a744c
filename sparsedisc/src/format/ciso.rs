// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

//! GameCube/Wii compact ISO (`.ciso`) images. A fixed 32 KiB header holds a
//! presence map with one byte per logical block. Present blocks are stored in
//! order immediately after the header.

use std::{
    fmt,
    io::{self, Read},
};

use thiserror::Error;
use tracing::debug;
use zerocopy::{FromBytes, FromZeros, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{
        MAX_DISC_SIZE,
        blockmap::{BlockMapTable, TableLayout},
        padding,
    },
    stream::FromReader,
};

pub const MAGIC: [u8; 4] = *b"CISO";

pub const HEADER_SIZE: usize = 0x8000;
const MAP_SIZE: usize = HEADER_SIZE - size_of::<RawPrefix>();

pub const MIN_BLOCK_SIZE: u32 = 32 * 1024;
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

/// Synthesized table value for blocks that are not present.
const EMPTY_BLOCK: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic: {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),
    #[error("Invalid map entry for block {block}: {value:#04x}")]
    InvalidMapEntry { block: u32, value: u8 },
    #[error("Image has no blocks")]
    NoBlocks,
    #[error("Disc size too large: {0}")]
    DiscTooLarge(u64),
    #[error("Failed to read CISO data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the fields preceding the presence map.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawPrefix {
    /// [`MAGIC`].
    magic: [u8; 4],
    block_size: little_endian::U32,
}

/// Raw on-disk layout for the full header.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    prefix: RawPrefix,
    /// One byte per logical block. `1` is present and `0` is empty.
    map: [u8; MAP_SIZE],
}

/// CISO header.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    pub block_size: u32,
    /// Physical index of each logical block, if present. Trailing empty blocks
    /// beyond the last present block are not included.
    pub present: Vec<Option<u32>>,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("block_size", &self.block_size)
            .field("block_count", &self.present.len())
            .field("used_blocks", &self.used_blocks())
            .finish()
    }
}

impl Header {
    pub fn block_count(&self) -> u32 {
        // Bounded by the map size.
        self.present.len() as u32
    }

    pub fn used_blocks(&self) -> u32 {
        self.present.iter().filter(|p| p.is_some()).count() as u32
    }

    pub fn disc_size(&self) -> u64 {
        u64::from(self.block_count()) * u64::from(self.block_size)
    }

    pub fn table_layout(&self) -> TableLayout {
        TableLayout {
            base: HEADER_SIZE as u64,
            shift: self.block_size.trailing_zeros(),
            empty: Some(EMPTY_BLOCK),
        }
    }

    pub fn block_map(&self) -> BlockMapTable {
        BlockMapTable::new(
            self.present.iter().map(|p| p.unwrap_or(EMPTY_BLOCK)),
            self.table_layout(),
        )
    }

    fn check_prefix(prefix: &RawPrefix) -> Result<u32> {
        if prefix.magic != MAGIC {
            return Err(Error::InvalidMagic(prefix.magic));
        }

        let block_size = prefix.block_size.get();
        if !padding::is_pow2_in_range(block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE) {
            return Err(Error::InvalidBlockSize(block_size));
        }

        Ok(block_size)
    }

    fn from_raw(raw: &RawHeader) -> Result<Self> {
        let block_size = Self::check_prefix(&raw.prefix)?;

        let mut present = Vec::with_capacity(MAP_SIZE);
        let mut next_index = 0u32;
        let mut used_len = 0;

        for (block, &value) in raw.map.iter().enumerate() {
            match value {
                0 => present.push(None),
                1 => {
                    present.push(Some(next_index));
                    next_index += 1;
                    used_len = block + 1;
                }
                value => {
                    return Err(Error::InvalidMapEntry {
                        block: block as u32,
                        value,
                    });
                }
            }
        }

        if used_len == 0 {
            return Err(Error::NoBlocks);
        }

        present.truncate(used_len);

        let header = Self {
            block_size,
            present,
        };

        if header.disc_size() > MAX_DISC_SIZE {
            return Err(Error::DiscTooLarge(header.disc_size()));
        }

        Ok(header)
    }
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let mut raw = RawHeader::new_zeroed();

        // Reject other formats sharing the magic before reading the map.
        reader
            .read_exact(raw.prefix.as_mut_bytes())
            .map_err(|e| Error::DataRead("header", e))?;
        Self::check_prefix(&raw.prefix)?;

        reader
            .read_exact(&mut raw.map)
            .map_err(|e| Error::DataRead("block_map", e))?;

        Self::from_raw(&raw)
    }
}

/// Check if the leading bytes of a file look like a CISO image. Only the
/// magic and block size are inspected.
pub fn is_supported(data: &[u8]) -> bool {
    RawPrefix::read_from_prefix(data).is_ok_and(|(p, _)| Header::check_prefix(&p).is_ok())
}

/// Parse the header and build the block table. The reader must be positioned
/// at the start of the file.
pub fn open(reader: impl Read) -> Result<(Header, BlockMapTable)> {
    let header = Header::from_reader(reader)?;
    let table = header.block_map();

    debug!(
        "CISO image: {} blocks of {} bytes, {} used",
        header.block_count(),
        header.block_size,
        header.used_blocks(),
    );

    Ok((header, table))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;
    use crate::format::blockmap::BlockAddr;

    fn header_bytes(block_size: u32, map: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..4].copy_from_slice(&MAGIC);
        data[4..8].copy_from_slice(&block_size.to_le_bytes());
        data[8..8 + map.len()].copy_from_slice(map);
        data
    }

    #[test]
    fn detect() {
        assert!(is_supported(&header_bytes(0x8000, &[])[..8]));
        assert!(!is_supported(&header_bytes(0x8000, &[])[..7]));
        // PSP CISO stores its header size here.
        assert!(!is_supported(&header_bytes(0x18, &[])));
        assert!(!is_supported(&header_bytes(0x2000000, &[])));
    }

    #[test]
    fn sequential_physical_blocks() {
        let data = header_bytes(0x8000, &[1, 0, 1, 1, 0, 0]);
        let (header, table) = open(Cursor::new(&data)).unwrap();

        assert_eq!(header.block_count(), 4);
        assert_eq!(header.used_blocks(), 3);
        assert_eq!(header.disc_size(), 4 * 0x8000);
        assert_eq!(table.get(0), Some(BlockAddr::Data(0x8000)));
        assert_eq!(table.get(1), Some(BlockAddr::Empty));
        assert_eq!(table.get(2), Some(BlockAddr::Data(0x10000)));
        assert_eq!(table.get(3), Some(BlockAddr::Data(0x18000)));
        assert_eq!(table.get(4), None);
    }

    #[test]
    fn reject_bad_maps() {
        let data = header_bytes(0x8000, &[1, 2]);
        assert_matches!(
            open(Cursor::new(&data)),
            Err(Error::InvalidMapEntry { block: 1, value: 2 })
        );

        let data = header_bytes(0x8000, &[]);
        assert_matches!(open(Cursor::new(&data)), Err(Error::NoBlocks));

        let data = header_bytes(0x8000, &[1]);
        assert_matches!(
            open(Cursor::new(&data[..HEADER_SIZE - 1])),
            Err(Error::DataRead("block_map", _))
        );

        // The block size is checked before the map is needed.
        let data = header_bytes(0x18, &[]);
        assert_matches!(
            open(Cursor::new(&data[..32])),
            Err(Error::InvalidBlockSize(0x18))
        );
    }
}
