// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

//! PlayStation Portable compressed ISO images. This covers CSO (`CISO`
//! versions 0 through 2), ZSO (`ZISO`) and DAX. Every logical block is stored
//! compressed or verbatim and is located through a table of 32-bit offsets.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use thiserror::Error;
use tracing::{debug, trace};
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::padding,
    stream::{FromReader, ReadFullExt},
};

pub const CISO_MAGIC: [u8; 4] = *b"CISO";
pub const ZISO_MAGIC: [u8; 4] = *b"ZISO";
pub const DAX_MAGIC: [u8; 4] = *b"DAX\0";

/// Index entry flag. For CSO v0/v1 and ZSO, the block is stored verbatim. For
/// CSO v2, the block is LZ4 compressed.
pub const INDEX_FLAG: u32 = 1 << 31;

pub const MIN_BLOCK_SIZE: u32 = 2 * 1024;
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;
pub const DAX_BLOCK_SIZE: u32 = 0x2000;
/// CSO and ZSO images cannot describe discs larger than this.
pub const MAX_DATA_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Largest index shift for which shifted offsets still fit in 64 bits.
const MAX_INDEX_SHIFT: u8 = 31;

pub const CSO_HEADER_SIZE: usize = size_of::<RawCsoHeader>();
pub const DAX_HEADER_SIZE: usize = size_of::<RawDaxHeader>();

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic: {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("Invalid header size: {0}")]
    InvalidHeaderSize(u32),
    #[error("Unsupported {kind} version: {version}")]
    UnsupportedVersion { kind: Kind, version: u32 },
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),
    #[error("Invalid index shift: {0}")]
    InvalidIndexShift(u8),
    #[error("Invalid disc size for {block_size} byte blocks: {size}")]
    InvalidDiscSize { size: u64, block_size: u32 },
    #[error("Uncompressed area {start}+{count} exceeds {num_blocks} blocks")]
    InvalidNcArea {
        start: u32,
        count: u32,
        num_blocks: u32,
    },
    #[error("Index tables do not fit in {file_size} byte file")]
    TableTruncated { file_size: u64 },
    #[error("Block #{block} has invalid stored size: {size}")]
    InvalidStoredSize { block: u32, size: u64 },
    #[error("Block #{block} decompressed to wrong size: {size}")]
    DecompressedSize { block: u32, size: usize },
    #[error("Block #{0} is out of range")]
    BlockOutOfRange(u32),
    #[error("Failed to inflate block #{0}")]
    Inflate(u32, #[source] io::Error),
    #[error("Failed to decompress LZ4 block #{0}")]
    Lz4(u32, #[source] lz4_flex::block::DecompressError),
    #[error("Failed to read CSO data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the CSO and ZSO header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawCsoHeader {
    /// [`CISO_MAGIC`] or [`ZISO_MAGIC`].
    magic: [u8; 4],
    /// Either 0 or the size of this struct.
    header_size: little_endian::U32,
    uncompressed_size: little_endian::U64,
    block_size: little_endian::U32,
    version: u8,
    index_shift: u8,
    unused: [u8; 2],
}

/// Raw on-disk layout for the DAX header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawDaxHeader {
    /// [`DAX_MAGIC`].
    magic: [u8; 4],
    uncompressed_size: little_endian::U32,
    version: little_endian::U32,
    nc_areas: little_endian::U32,
    reserved: [little_endian::U32; 4],
}

/// Raw on-disk layout for a DAX run of uncompressed blocks.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawNcArea {
    start: little_endian::U32,
    count: little_endian::U32,
}

/// Container variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Raw deflate, plus LZ4 starting with version 2.
    Cso,
    /// LZ4.
    Zso,
    /// zlib with a separate size table and fixed 8 KiB blocks.
    Dax,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cso => "CSO",
            Self::Zso => "ZSO",
            Self::Dax => "DAX",
        })
    }
}

/// Compression method of a single stored block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflate,
    Zlib,
    Lz4,
}

/// CSO, ZSO or DAX header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: Kind,
    pub version: u32,
    pub uncompressed_size: u64,
    pub block_size: u32,
    /// Index entries are byte offsets shifted right by this amount.
    pub index_shift: u8,
    /// Number of DAX uncompressed areas.
    pub nc_areas: u32,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Header");
        s.field("kind", &self.kind)
            .field("version", &self.version)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("block_size", &self.block_size);

        match self.kind {
            Kind::Cso | Kind::Zso => s.field("index_shift", &self.index_shift),
            Kind::Dax => s.field("nc_areas", &self.nc_areas),
        };

        s.finish()
    }
}

impl Header {
    /// Number of logical blocks. The size is validated to be a non-zero
    /// multiple of the block size.
    pub fn block_count(&self) -> u32 {
        // At most 16 GiB / 2 KiB.
        (self.uncompressed_size / u64::from(self.block_size)) as u32
    }

    /// Number of entries in the offset table. CSO and ZSO store an extra entry
    /// marking the end of the last block.
    pub fn index_len(&self) -> u32 {
        match self.kind {
            Kind::Cso | Kind::Zso => self.block_count() + 1,
            Kind::Dax => self.block_count(),
        }
    }

    pub fn index_offset(&self) -> u64 {
        match self.kind {
            Kind::Cso | Kind::Zso => CSO_HEADER_SIZE as u64,
            Kind::Dax => DAX_HEADER_SIZE as u64,
        }
    }

    fn check_size(size: u64, block_size: u32, max: u64) -> Result<()> {
        if size < u64::from(block_size) || size > max || size % u64::from(block_size) != 0 {
            return Err(Error::InvalidDiscSize { size, block_size });
        }

        Ok(())
    }

    fn from_cso_raw(raw: &RawCsoHeader) -> Result<Self> {
        let kind = match raw.magic {
            CISO_MAGIC => Kind::Cso,
            ZISO_MAGIC => Kind::Zso,
            m => return Err(Error::InvalidMagic(m)),
        };

        let version = u32::from(raw.version);
        let header_size = raw.header_size.get();

        // Only old CSO writers leave the header size unset.
        if header_size == 0 {
            if kind != Kind::Cso || version >= 2 {
                return Err(Error::InvalidHeaderSize(header_size));
            }
        } else if header_size != CSO_HEADER_SIZE as u32 {
            return Err(Error::InvalidHeaderSize(header_size));
        }

        let version_ok = match kind {
            Kind::Zso => version == 1,
            _ => version <= 2,
        };
        if !version_ok {
            return Err(Error::UnsupportedVersion { kind, version });
        }

        let block_size = raw.block_size.get();
        if !padding::is_pow2_in_range(block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE) {
            return Err(Error::InvalidBlockSize(block_size));
        }

        let uncompressed_size = raw.uncompressed_size.get();
        Self::check_size(uncompressed_size, block_size, MAX_DATA_SIZE)?;

        if raw.index_shift > MAX_INDEX_SHIFT {
            return Err(Error::InvalidIndexShift(raw.index_shift));
        }

        Ok(Self {
            kind,
            version,
            uncompressed_size,
            block_size,
            index_shift: raw.index_shift,
            nc_areas: 0,
        })
    }

    fn from_dax_raw(raw: &RawDaxHeader) -> Result<Self> {
        if raw.magic != DAX_MAGIC {
            return Err(Error::InvalidMagic(raw.magic));
        }

        let version = raw.version.get();
        if version > 1 {
            return Err(Error::UnsupportedVersion {
                kind: Kind::Dax,
                version,
            });
        }

        let uncompressed_size = u64::from(raw.uncompressed_size.get());
        Self::check_size(uncompressed_size, DAX_BLOCK_SIZE, u64::from(u32::MAX))?;

        Ok(Self {
            kind: Kind::Dax,
            version,
            uncompressed_size,
            block_size: DAX_BLOCK_SIZE,
            index_shift: 0,
            nc_areas: raw.nc_areas.get(),
        })
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.starts_with(&DAX_MAGIC) {
            let (raw, _) = RawDaxHeader::read_from_prefix(data).map_err(|_| {
                Error::DataRead("header", io::Error::from(io::ErrorKind::UnexpectedEof))
            })?;
            Self::from_dax_raw(&raw)
        } else {
            let (raw, _) = RawCsoHeader::read_from_prefix(data).map_err(|_| {
                Error::DataRead("header", io::Error::from(io::ErrorKind::UnexpectedEof))
            })?;
            Self::from_cso_raw(&raw)
        }
    }
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; DAX_HEADER_SIZE];
        let n = reader
            .read_full(&mut buf)
            .map_err(|e| Error::DataRead("header", e))?;

        Self::from_bytes(&buf[..n])
    }
}

/// Check if the leading bytes of a file look like a valid CSO, ZSO or DAX
/// header.
pub fn is_supported(data: &[u8]) -> bool {
    Header::from_bytes(data).is_ok()
}

/// Where and how a block is stored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StoredBlock {
    /// Absolute offset in the file.
    pub offset: u64,
    /// Number of stored bytes.
    pub size: u32,
    pub compression: Compression,
}

impl fmt::Debug for StoredBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredBlock")
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("size", &self.size)
            .field("compression", &self.compression)
            .finish()
    }
}

/// Block offset table, plus the DAX size and uncompressed area tables.
#[derive(Clone)]
pub struct BlockIndex {
    header: Header,
    entries: Vec<little_endian::U32>,
    sizes: Vec<little_endian::U16>,
    /// Empty unless the DAX image has uncompressed areas.
    uncompressed: Vec<bool>,
}

impl fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIndex")
            .field("len", &self.len())
            .field("uncompressed", &self.uncompressed.iter().filter(|u| **u).count())
            .finish()
    }
}

impl BlockIndex {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        self.header.block_count()
    }

    fn entry_offset(&self, index: u32) -> u64 {
        let entry = self.entries[index as usize].get();

        match self.header.kind {
            Kind::Cso | Kind::Zso => u64::from(entry & !INDEX_FLAG) << self.header.index_shift,
            Kind::Dax => u64::from(entry),
        }
    }

    /// Offset of a block's stored data. Returns [`None`] if the block is out
    /// of range. The offset is not validated until the block is read.
    pub fn offset(&self, block: u32) -> Option<u64> {
        (block < self.len()).then(|| self.entry_offset(block))
    }

    /// Location and compression of a block's stored data. Returns [`None`] if
    /// the block is out of range.
    pub fn get(&self, block: u32) -> Option<Result<StoredBlock>> {
        let offset = self.offset(block)?;
        let block_size = self.header.block_size;
        let flagged = self.entries[block as usize].get() & INDEX_FLAG != 0;

        let size = match self.header.kind {
            Kind::Cso | Kind::Zso => self.entry_offset(block + 1).wrapping_sub(offset),
            Kind::Dax => u64::from(self.sizes[block as usize].get()),
        };

        let compression = match self.header.kind {
            Kind::Cso if self.header.version >= 2 => {
                if size == u64::from(block_size) {
                    Compression::None
                } else if flagged {
                    Compression::Lz4
                } else {
                    Compression::Deflate
                }
            }
            Kind::Cso if flagged => Compression::None,
            Kind::Cso => Compression::Deflate,
            Kind::Zso if flagged => Compression::None,
            Kind::Zso => Compression::Lz4,
            Kind::Dax if self.uncompressed.get(block as usize) == Some(&true) => {
                Compression::None
            }
            Kind::Dax => Compression::Zlib,
        };

        // zlib output can exceed the input when DAX has nowhere to store
        // incompressible blocks verbatim.
        let max_size = if self.header.kind == Kind::Dax && self.uncompressed.is_empty() {
            u64::from(block_size) * 2
        } else {
            u64::from(block_size)
        };

        let valid = match compression {
            Compression::None => size == u64::from(block_size),
            _ => size > 0 && size <= max_size,
        };
        if !valid {
            return Some(Err(Error::InvalidStoredSize { block, size }));
        }

        Some(Ok(StoredBlock {
            offset,
            // Bounded by max_size.
            size: size as u32,
            compression,
        }))
    }

    /// Number of blocks stored compressed. Blocks with invalid sizes are not
    /// counted.
    pub fn compressed_blocks(&self) -> u32 {
        (0..self.len())
            .filter_map(|b| self.get(b)?.ok())
            .filter(|s| s.compression != Compression::None)
            .count() as u32
    }
}

fn read_table<T: FromBytes + IntoBytes>(
    mut reader: impl Read,
    count: u32,
    name: &'static str,
) -> Result<Vec<T>> {
    let mut entries = T::new_vec_zeroed(count as usize).map_err(|_| {
        Error::DataRead(name, io::Error::new(io::ErrorKind::OutOfMemory, "Table too large"))
    })?;

    reader
        .read_exact(entries.as_mut_slice().as_mut_bytes())
        .map_err(|e| Error::DataRead(name, e))?;

    Ok(entries)
}

/// Parse the header and index tables. The reader is rewound first.
pub fn open(mut reader: impl Read + Seek) -> Result<(Header, BlockIndex)> {
    let file_size = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::DataRead("file_size", e))?;
    reader
        .rewind()
        .map_err(|e| Error::DataRead("rewind", e))?;

    let header = Header::from_reader(&mut reader)?;
    let num_blocks = header.block_count();

    let mut tables_size = u64::from(header.index_len()) * 4;
    if header.kind == Kind::Dax {
        tables_size += u64::from(num_blocks) * 2 + u64::from(header.nc_areas) * 8;
    }
    if header.index_offset() + tables_size > file_size {
        return Err(Error::TableTruncated { file_size });
    }

    reader
        .seek(SeekFrom::Start(header.index_offset()))
        .map_err(|e| Error::DataRead("index_seek", e))?;

    let entries = read_table(&mut reader, header.index_len(), "block_offsets")?;
    let mut sizes = vec![];
    let mut uncompressed = vec![];

    if header.kind == Kind::Dax {
        sizes = read_table(&mut reader, num_blocks, "block_sizes")?;

        if header.nc_areas > 0 {
            let areas: Vec<RawNcArea> = read_table(&mut reader, header.nc_areas, "nc_areas")?;
            uncompressed = vec![false; num_blocks as usize];

            for area in areas {
                let (start, count) = (area.start.get(), area.count.get());
                let end = start
                    .checked_add(count)
                    .filter(|e| *e <= num_blocks)
                    .ok_or(Error::InvalidNcArea {
                        start,
                        count,
                        num_blocks,
                    })?;

                uncompressed[start as usize..end as usize].fill(true);
            }
        }
    }

    debug!(
        "{} image: {num_blocks} blocks of {} bytes",
        header.kind, header.block_size,
    );

    Ok((
        header,
        BlockIndex {
            header,
            entries,
            sizes,
            uncompressed,
        },
    ))
}

/// Decompress all of `decoder`'s output into `out`, returning the total size
/// including any output that did not fit.
fn inflate_into(mut decoder: impl Read, out: &mut [u8]) -> io::Result<usize> {
    let size = decoder.read_full(out)?;
    let extra = decoder.read(&mut [0u8; 1])?;

    Ok(size + extra)
}

/// Decoder holding the most recently used block.
pub struct BlockDecoder {
    index: BlockIndex,
    cached: Option<u32>,
    cache: Vec<u8>,
    stored: Vec<u8>,
}

impl fmt::Debug for BlockDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDecoder")
            .field("index", &self.index)
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

impl BlockDecoder {
    pub fn new(index: BlockIndex) -> Self {
        Self {
            index,
            cached: None,
            cache: vec![],
            stored: vec![],
        }
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Get the uncompressed contents of a block, reading it from the file if it
    /// is not already cached. The cache is invalidated on failure.
    pub fn block(&mut self, mut reader: impl Read + Seek, block: u32) -> Result<&[u8]> {
        if self.cached != Some(block) {
            self.cached = None;
            self.load(&mut reader, block)?;
            self.cached = Some(block);
        } else {
            trace!("CSO block #{block} is cached");
        }

        Ok(&self.cache)
    }

    fn load(&mut self, mut reader: impl Read + Seek, block: u32) -> Result<()> {
        let stored = self
            .index
            .get(block)
            .ok_or(Error::BlockOutOfRange(block))??;
        let block_size = self.index.header.block_size as usize;

        trace!("Loading CSO block #{block}: {stored:?}");

        self.cache.resize(block_size, 0);
        self.stored.resize(stored.size as usize, 0);

        reader
            .seek(SeekFrom::Start(stored.offset))
            .map_err(|e| Error::DataRead("block_seek", e))?;
        reader
            .read_exact(&mut self.stored)
            .map_err(|e| Error::DataRead("block_data", e))?;

        let size = match stored.compression {
            Compression::None => {
                self.cache.copy_from_slice(&self.stored);
                block_size
            }
            Compression::Deflate => {
                inflate_into(DeflateDecoder::new(self.stored.as_slice()), &mut self.cache)
                    .map_err(|e| Error::Inflate(block, e))?
            }
            Compression::Zlib => {
                inflate_into(ZlibDecoder::new(self.stored.as_slice()), &mut self.cache)
                    .map_err(|e| Error::Inflate(block, e))?
            }
            Compression::Lz4 => lz4_flex::block::decompress_into(&self.stored, &mut self.cache)
                .map_err(|e| Error::Lz4(block, e))?,
        };

        if size != block_size {
            return Err(Error::DecompressedSize { block, size });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use assert_matches::assert_matches;
    use flate2::{Compression as Level, write::DeflateEncoder};

    use super::*;

    const BLOCK_SIZE: u32 = 2048;

    fn cso_header(version: u8, header_size: u32, uncompressed_size: u64) -> RawCsoHeader {
        RawCsoHeader {
            magic: CISO_MAGIC,
            header_size: header_size.into(),
            uncompressed_size: uncompressed_size.into(),
            block_size: BLOCK_SIZE.into(),
            version,
            index_shift: 0,
            unused: [0; 2],
        }
    }

    #[test]
    fn detect_cso() {
        let raw = cso_header(1, 0x18, 4 * u64::from(BLOCK_SIZE));
        assert!(is_supported(raw.as_bytes()));
        assert!(!is_supported(&raw.as_bytes()[..CSO_HEADER_SIZE - 1]));

        // Header size may only be omitted by old CSO versions.
        assert!(is_supported(cso_header(1, 0, 4096).as_bytes()));
        assert!(!is_supported(cso_header(2, 0, 4096).as_bytes()));
        assert!(!is_supported(cso_header(1, 0x8000, 4096).as_bytes()));
        assert!(!is_supported(cso_header(3, 0x18, 4096).as_bytes()));

        // Size must be a non-zero multiple of the block size.
        assert!(!is_supported(cso_header(1, 0x18, 0).as_bytes()));
        assert!(!is_supported(cso_header(1, 0x18, 3000).as_bytes()));

        let mut zso = cso_header(1, 0x18, 4096);
        zso.magic = ZISO_MAGIC;
        assert!(is_supported(zso.as_bytes()));
        zso.version = 2;
        assert!(!is_supported(zso.as_bytes()));
        zso.version = 1;
        zso.header_size = 0u32.into();
        assert!(!is_supported(zso.as_bytes()));

        let mut shifted = cso_header(1, 0x18, 4096);
        shifted.index_shift = 32;
        assert_matches!(
            Header::from_bytes(shifted.as_bytes()),
            Err(Error::InvalidIndexShift(32))
        );
    }

    #[test]
    fn detect_dax() {
        let raw = RawDaxHeader {
            magic: DAX_MAGIC,
            uncompressed_size: (2 * DAX_BLOCK_SIZE).into(),
            version: 1u32.into(),
            nc_areas: 0u32.into(),
            reserved: [0u32.into(); 4],
        };
        assert!(is_supported(raw.as_bytes()));
        assert!(!is_supported(&raw.as_bytes()[..DAX_HEADER_SIZE - 1]));

        let mut bad = raw;
        bad.version = 2u32.into();
        assert!(!is_supported(bad.as_bytes()));

        let mut bad = raw;
        bad.uncompressed_size = (DAX_BLOCK_SIZE + 1).into();
        assert!(!is_supported(bad.as_bytes()));
    }

    #[test]
    fn decode_v1_blocks() {
        let a: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        let b = vec![0x5a; BLOCK_SIZE as usize];

        let mut encoder = DeflateEncoder::new(vec![], Level::default());
        encoder.write_all(&a).unwrap();
        let compressed = encoder.finish().unwrap();

        let data_offset = CSO_HEADER_SIZE as u32 + 3 * 4;
        let entries = [
            data_offset,
            (data_offset + compressed.len() as u32) | INDEX_FLAG,
            data_offset + compressed.len() as u32 + BLOCK_SIZE,
        ];

        let mut image = cso_header(1, 0x18, 2 * u64::from(BLOCK_SIZE))
            .as_bytes()
            .to_vec();
        for e in entries {
            image.extend_from_slice(&e.to_le_bytes());
        }
        image.extend_from_slice(&compressed);
        image.extend_from_slice(&b);

        let mut reader = Cursor::new(&image);
        let (header, index) = open(&mut reader).unwrap();
        assert_eq!(header.block_count(), 2);
        assert_eq!(index.compressed_blocks(), 1);
        assert_eq!(index.offset(1), Some(u64::from(entries[1] & !INDEX_FLAG)));
        assert_eq!(index.offset(2), None);

        let mut decoder = BlockDecoder::new(index);
        assert_eq!(decoder.block(&mut reader, 0).unwrap(), a.as_slice());
        assert_eq!(decoder.block(&mut reader, 1).unwrap(), b.as_slice());
        assert_matches!(
            decoder.block(&mut reader, 2),
            Err(Error::BlockOutOfRange(2))
        );
    }

    #[test]
    fn stored_block_must_be_full() {
        let data_offset = CSO_HEADER_SIZE as u32 + 2 * 4;
        let entries = [data_offset | INDEX_FLAG, data_offset + 100];

        let mut image = cso_header(1, 0x18, u64::from(BLOCK_SIZE)).as_bytes().to_vec();
        for e in entries {
            image.extend_from_slice(&e.to_le_bytes());
        }
        image.resize(image.len() + 100, 0);

        let (_, index) = open(Cursor::new(&image)).unwrap();
        assert_matches!(
            index.get(0),
            Some(Err(Error::InvalidStoredSize { block: 0, size: 100 }))
        );
    }
}
