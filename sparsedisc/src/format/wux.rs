// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Wii U `.wux` images. Identical sectors are stored once and shared by
//! repeating their index in the sector table. There is no empty block marker.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use thiserror::Error;
use tracing::debug;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{
        MAX_DISC_SIZE,
        blockmap::{BlockMapTable, TableLayout},
        padding,
    },
    stream::FromReader,
};

pub const MAGIC_0: [u8; 4] = *b"WUX0";
pub const MAGIC_1: [u8; 4] = [0x2e, 0xd0, 0x99, 0x10];

pub const MIN_SECTOR_SIZE: u32 = 256;
pub const MAX_SECTOR_SIZE: u32 = 128 * 1024 * 1024;

pub const HEADER_SIZE: usize = size_of::<RawHeader>();

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic: {0:?}")]
    InvalidMagic([u8; 8]),
    #[error("Invalid sector size: {0}")]
    InvalidSectorSize(u32),
    #[error("Invalid uncompressed size: {0}")]
    InvalidDiscSize(u64),
    #[error("Sector table ({size} bytes) does not fit in {file_size} byte file")]
    TableTruncated { size: u64, file_size: u64 },
    #[error("Failed to read WUX data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    /// [`MAGIC_0`].
    magic0: [u8; 4],
    /// [`MAGIC_1`].
    magic1: [u8; 4],
    sector_size: little_endian::U32,
    reserved1: little_endian::U32,
    uncompressed_size: little_endian::U64,
    flags: little_endian::U32,
    reserved2: little_endian::U32,
}

/// WUX header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Size of each sector. Always a power of two.
    pub sector_size: u32,
    /// Exact size of the logical disc image.
    pub uncompressed_size: u64,
    pub flags: u32,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("sector_size", &self.sector_size)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("flags", &format_args!("{:#010x}", self.flags))
            .finish()
    }
}

impl Header {
    /// Number of entries in the sector table.
    pub fn sector_count(&self) -> u32 {
        // At most 50 GiB / 256 entries.
        padding::block_count(self.uncompressed_size, self.sector_size.into())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(u32::MAX)
    }

    /// Offset of the first data sector, which follows the table after
    /// padding to the sector size.
    pub fn data_offset(&self) -> u64 {
        let table_end = HEADER_SIZE as u64 + u64::from(self.sector_count()) * 4;
        padding::round(table_end, u64::from(self.sector_size)).unwrap_or(u64::MAX)
    }

    pub fn table_layout(&self) -> TableLayout {
        TableLayout {
            base: self.data_offset(),
            shift: self.sector_size.trailing_zeros(),
            empty: None,
        }
    }

    fn from_raw(raw: &RawHeader) -> Result<Self> {
        if raw.magic0 != MAGIC_0 || raw.magic1 != MAGIC_1 {
            let mut magic = [0u8; 8];
            magic.copy_from_slice(&raw.as_bytes()[..8]);
            return Err(Error::InvalidMagic(magic));
        }

        let sector_size = raw.sector_size.get();
        if !padding::is_pow2_in_range(sector_size, MIN_SECTOR_SIZE, MAX_SECTOR_SIZE) {
            return Err(Error::InvalidSectorSize(sector_size));
        }

        let uncompressed_size = raw.uncompressed_size.get();
        if uncompressed_size == 0 || uncompressed_size > MAX_DISC_SIZE {
            return Err(Error::InvalidDiscSize(uncompressed_size));
        }

        Ok(Self {
            sector_size,
            uncompressed_size,
            flags: raw.flags.get(),
        })
    }
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(reader: R) -> Result<Self> {
        let raw = RawHeader::read_from_io(reader).map_err(|e| Error::DataRead("header", e))?;

        Self::from_raw(&raw)
    }
}

/// Check if the leading bytes of a file look like a valid WUX header.
pub fn is_supported(data: &[u8]) -> bool {
    RawHeader::read_from_prefix(data).is_ok_and(|(raw, _)| Header::from_raw(&raw).is_ok())
}

/// Parse the header and sector table. The reader is rewound first.
pub fn open(mut reader: impl Read + Seek) -> Result<(Header, BlockMapTable)> {
    let file_size = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::DataRead("file_size", e))?;
    reader
        .rewind()
        .map_err(|e| Error::DataRead("rewind", e))?;

    let header = Header::from_reader(&mut reader)?;
    let sector_count = header.sector_count();

    let table_size = u64::from(sector_count) * 4;
    if HEADER_SIZE as u64 + table_size > file_size {
        return Err(Error::TableTruncated {
            size: table_size,
            file_size,
        });
    }

    let table = BlockMapTable::read_le(&mut reader, sector_count, header.table_layout())
        .map_err(|e| Error::DataRead("sector_table", e))?;

    debug!(
        "WUX image: {} sectors of {} bytes, data at {:#x}",
        sector_count,
        header.sector_size,
        header.data_offset(),
    );

    Ok((header, table))
}
