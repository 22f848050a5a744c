// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

//! NASOS (`.iso.dec`) GameCube and Wii disc images.
//!
//! The header is followed by a flat table of little-endian u32 physical
//! addresses, one per logical block. GameCube images store byte addresses
//! directly. Wii images store addresses divided by 256.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use thiserror::Error;
use tracing::debug;
use zerocopy::{FromBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{
        MAX_DISC_SIZE,
        blockmap::{BlockMapTable, TableLayout},
    },
    stream::FromReader,
};

/// GameCube image magic.
pub const MAGIC_GCML: [u8; 4] = *b"GCML";
/// Single-layer Wii image magic.
pub const MAGIC_WII5: [u8; 4] = *b"WII5";
/// Dual-layer Wii image magic.
pub const MAGIC_WII9: [u8; 4] = *b"WII9";

/// Table value for a block with no data.
pub const EMPTY_BLOCK: u32 = 0xffffffff;

/// GameCube images always cover a full GameCube disc.
pub const GCN_DISC_SIZE: u64 = 1_459_978_240;
const GCN_BLOCK_SIZE: u32 = 2048;
const WII_BLOCK_SIZE: u32 = 1024;
/// Wii block counts and table entries are both stored shifted right by 8.
const WII_SHIFT: u32 = 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic: {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("Image has no blocks")]
    NoBlocks,
    #[error("Disc size too large: {0} blocks of {1} bytes")]
    DiscTooLarge(u32, u32),
    #[error("Block table ({size} bytes) does not fit in {file_size} byte file")]
    TableTruncated { size: u64, file_size: u64 },
    #[error("Failed to read NASOS data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the fields shared by all variants.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    /// One of [`MAGIC_GCML`], [`MAGIC_WII5`], or [`MAGIC_WII9`].
    magic: [u8; 4],
    /// Game ID.
    id4: [u8; 4],
    /// MD5 of the original disc image.
    md5_orig: [u8; 16],
}

/// Raw on-disk layout for the extra Wii fields.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawWiiExtra {
    unknown1: [u8; 48],
    /// Number of blocks, shifted left by 8.
    block_count: little_endian::U32,
    unknown2: [u8; 16],
}

const GCN_HEADER_SIZE: usize = size_of::<RawHeader>();
const WII_HEADER_SIZE: usize = size_of::<RawHeader>() + size_of::<RawWiiExtra>();

/// NASOS image variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    /// `GCML`: GameCube.
    GameCube,
    /// `WII5`: single-layer Wii.
    WiiSingleLayer,
    /// `WII9`: dual-layer Wii.
    WiiDualLayer,
}

impl Variant {
    fn from_magic(magic: [u8; 4]) -> Option<Self> {
        match magic {
            MAGIC_GCML => Some(Self::GameCube),
            MAGIC_WII5 => Some(Self::WiiSingleLayer),
            MAGIC_WII9 => Some(Self::WiiDualLayer),
            _ => None,
        }
    }

    pub fn magic(self) -> [u8; 4] {
        match self {
            Self::GameCube => MAGIC_GCML,
            Self::WiiSingleLayer => MAGIC_WII5,
            Self::WiiDualLayer => MAGIC_WII9,
        }
    }

    pub fn block_size(self) -> u32 {
        match self {
            Self::GameCube => GCN_BLOCK_SIZE,
            Self::WiiSingleLayer | Self::WiiDualLayer => WII_BLOCK_SIZE,
        }
    }

    /// Shift converting table entries to byte addresses.
    pub fn shift(self) -> u32 {
        match self {
            Self::GameCube => 0,
            Self::WiiSingleLayer | Self::WiiDualLayer => WII_SHIFT,
        }
    }

    /// Size of the fixed header preceding the block table.
    pub fn header_size(self) -> usize {
        match self {
            Self::GameCube => GCN_HEADER_SIZE,
            Self::WiiSingleLayer | Self::WiiDualLayer => WII_HEADER_SIZE,
        }
    }
}

/// NASOS header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub variant: Variant,
    /// Game ID.
    pub id4: [u8; 4],
    /// MD5 of the original disc image.
    pub md5_orig: [u8; 16],
    /// Number of logical blocks.
    pub block_count: u32,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("variant", &self.variant)
            .field("id4", &String::from_utf8_lossy(&self.id4))
            .field("md5_orig", &hex::encode(self.md5_orig))
            .field("block_count", &self.block_count)
            .finish()
    }
}

impl Header {
    pub fn block_size(&self) -> u32 {
        self.variant.block_size()
    }

    pub fn disc_size(&self) -> u64 {
        u64::from(self.block_count) * u64::from(self.block_size())
    }

    pub fn table_layout(&self) -> TableLayout {
        TableLayout {
            base: 0,
            shift: self.variant.shift(),
            empty: Some(EMPTY_BLOCK),
        }
    }

    fn from_raw(raw: &RawHeader, wii: Option<&RawWiiExtra>) -> Result<Self> {
        let variant = Variant::from_magic(raw.magic).ok_or(Error::InvalidMagic(raw.magic))?;

        let block_count = match (variant, wii) {
            (Variant::GameCube, _) => (GCN_DISC_SIZE / u64::from(GCN_BLOCK_SIZE)) as u32,
            (_, Some(wii)) => wii.block_count.get() >> WII_SHIFT,
            (_, None) => return Err(Error::InvalidMagic(raw.magic)),
        };

        if block_count == 0 {
            return Err(Error::NoBlocks);
        }

        let header = Self {
            variant,
            id4: raw.id4,
            md5_orig: raw.md5_orig,
            block_count,
        };

        if header.disc_size() > MAX_DISC_SIZE {
            return Err(Error::DiscTooLarge(block_count, header.block_size()));
        }

        Ok(header)
    }
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let raw = RawHeader::read_from_io(&mut reader).map_err(|e| Error::DataRead("header", e))?;

        match Variant::from_magic(raw.magic) {
            Some(Variant::GameCube) => Self::from_raw(&raw, None),
            Some(_) => {
                let wii = RawWiiExtra::read_from_io(&mut reader)
                    .map_err(|e| Error::DataRead("header_wii", e))?;
                Self::from_raw(&raw, Some(&wii))
            }
            None => Err(Error::InvalidMagic(raw.magic)),
        }
    }
}

/// Check if the leading bytes of a file look like a NASOS image. The full fixed
/// header for the variant must be present.
pub fn is_supported(data: &[u8]) -> bool {
    let Ok((raw, remain)) = RawHeader::read_from_prefix(data) else {
        return false;
    };

    match Variant::from_magic(raw.magic) {
        Some(Variant::GameCube) => true,
        Some(_) => RawWiiExtra::read_from_prefix(remain)
            .is_ok_and(|(wii, _)| Header::from_raw(&raw, Some(&wii)).is_ok()),
        None => false,
    }
}

/// Parse the header and block table. The reader is rewound first.
pub fn open(mut reader: impl Read + Seek) -> Result<(Header, BlockMapTable)> {
    let file_size = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::DataRead("file_size", e))?;
    reader
        .rewind()
        .map_err(|e| Error::DataRead("rewind", e))?;

    let header = Header::from_reader(&mut reader)?;

    let table_size = u64::from(header.block_count) * 4;
    let table_end = header.variant.header_size() as u64 + table_size;
    if table_end > file_size {
        return Err(Error::TableTruncated {
            size: table_size,
            file_size,
        });
    }

    let table = BlockMapTable::read_le(&mut reader, header.block_count, header.table_layout())
        .map_err(|e| Error::DataRead("block_table", e))?;

    debug!(
        "NASOS {:?} image: {} blocks, {} used",
        header.variant,
        header.block_count,
        table.data_blocks(),
    );

    Ok((header, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_requires_full_header() {
        let mut data = [0u8; WII_HEADER_SIZE];
        data[..4].copy_from_slice(&MAGIC_WII5);
        data[72..76].copy_from_slice(&(4u32 << 8).to_le_bytes());

        assert!(is_supported(&data));
        assert!(!is_supported(&data[..WII_HEADER_SIZE - 1]));

        data[..4].copy_from_slice(&MAGIC_GCML);
        assert!(is_supported(&data[..GCN_HEADER_SIZE]));
        assert!(!is_supported(&data[..GCN_HEADER_SIZE - 1]));

        data[..4].copy_from_slice(b"GCMX");
        assert!(!is_supported(&data));
    }

    #[test]
    fn detect_rejects_zero_wii_blocks() {
        let mut data = [0u8; WII_HEADER_SIZE];
        data[..4].copy_from_slice(&MAGIC_WII9);
        // Below 256 after shifting.
        data[72..76].copy_from_slice(&0xffu32.to_le_bytes());

        assert!(!is_supported(&data));
    }

    #[test]
    fn gamecube_geometry() {
        let header = Header {
            variant: Variant::GameCube,
            id4: *b"GALE",
            md5_orig: [0; 16],
            block_count: 712_880,
        };

        assert_eq!(header.disc_size(), GCN_DISC_SIZE);
        assert_eq!(header.table_layout().shift, 0);
        assert_eq!(Variant::WiiDualLayer.shift(), 8);
        assert_eq!(Variant::WiiDualLayer.header_size(), 92);
    }
}
