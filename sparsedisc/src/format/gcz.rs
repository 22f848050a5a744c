// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Dolphin compressed GameCube/Wii images (`.gcz`). Every logical block is
//! stored either zlib-compressed or verbatim and is addressed through a table
//! of 64-bit pointers. Each stored block has an Adler-32 checksum.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use flate2::read::ZlibDecoder;
use thiserror::Error;
use tracing::trace;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::padding,
    stream::{FromReader, ReadFullExt},
    util,
};

pub const MAGIC: u32 = 0xb10bc001;

pub const MIN_BLOCK_SIZE: u32 = 32 * 1024;
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;
/// GCZ images cannot describe discs larger than this.
pub const MAX_DATA_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Pointer flag indicating that the block is stored without compression.
pub const FLAG_UNCOMPRESSED: u64 = 1 << 63;

pub const HEADER_SIZE: usize = size_of::<RawHeader>();

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid magic: {0:#010x}")]
    InvalidMagic(u32),
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),
    #[error("{num_blocks} blocks of {block_size} bytes do not cover {data_size} bytes")]
    SizeMismatch {
        data_size: u64,
        block_size: u32,
        num_blocks: u32,
    },
    #[error("Image has no blocks")]
    NoBlocks,
    #[error("Disc size too large: {0}")]
    DiscTooLarge(u64),
    #[error("Index tables do not fit in {file_size} byte file")]
    TableTruncated { file_size: u64 },
    #[error("Block #{block} has invalid stored size: {size}")]
    InvalidStoredSize { block: u32, size: u64 },
    #[error("Block #{block} checksum mismatch: expected {expected:#010x}, but have {actual:#010x}")]
    ChecksumMismatch {
        block: u32,
        expected: u32,
        actual: u32,
    },
    #[error("Block #{block} inflated to wrong size: {size}")]
    InflatedSize { block: u32, size: usize },
    #[error("Block #{0} is out of range")]
    BlockOutOfRange(u32),
    #[error("Failed to inflate block #{0}")]
    Inflate(u32, #[source] io::Error),
    #[error("Failed to read GCZ data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    /// [`MAGIC`].
    magic: little_endian::U32,
    sub_type: little_endian::U32,
    compressed_data_size: little_endian::U64,
    data_size: little_endian::U64,
    block_size: little_endian::U32,
    num_blocks: little_endian::U32,
}

/// GCZ header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sub_type: u32,
    /// Total size of the stored block data.
    pub compressed_data_size: u64,
    /// Size of the original disc image.
    pub data_size: u64,
    pub block_size: u32,
    pub num_blocks: u32,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("sub_type", &format_args!("{:#x}", self.sub_type))
            .field("compressed_data_size", &self.compressed_data_size)
            .field("data_size", &self.data_size)
            .field("block_size", &self.block_size)
            .field("num_blocks", &self.num_blocks)
            .finish()
    }
}

impl Header {
    /// Size of the logical disc. This is the original size rounded up to the
    /// block size.
    pub fn disc_size(&self) -> u64 {
        u64::from(self.num_blocks) * u64::from(self.block_size)
    }

    /// Offset of the first stored block, right after the pointer and
    /// checksum tables.
    pub fn data_offset(&self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.num_blocks) * 12
    }

    fn from_raw(raw: &RawHeader) -> Result<Self> {
        let magic = raw.magic.get();
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let block_size = raw.block_size.get();
        if !padding::is_pow2_in_range(block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE) {
            return Err(Error::InvalidBlockSize(block_size));
        }

        let data_size = raw.data_size.get();
        let num_blocks = raw.num_blocks.get();
        let expected = padding::round(data_size, u64::from(block_size));

        if expected != Some(u64::from(block_size) * u64::from(num_blocks)) {
            return Err(Error::SizeMismatch {
                data_size,
                block_size,
                num_blocks,
            });
        }

        let header = Self {
            sub_type: raw.sub_type.get(),
            compressed_data_size: raw.compressed_data_size.get(),
            data_size,
            block_size,
            num_blocks,
        };

        if num_blocks == 0 {
            return Err(Error::NoBlocks);
        } else if header.disc_size() > MAX_DATA_SIZE {
            return Err(Error::DiscTooLarge(header.disc_size()));
        }

        Ok(header)
    }
}

impl<R: Read> FromReader<R> for Header {
    type Error = Error;

    fn from_reader(reader: R) -> Result<Self> {
        let raw = RawHeader::read_from_io(reader).map_err(|e| Error::DataRead("header", e))?;

        Self::from_raw(&raw)
    }
}

/// Check if the leading bytes of a file look like a valid GCZ header.
pub fn is_supported(data: &[u8]) -> bool {
    RawHeader::read_from_prefix(data).is_ok_and(|(raw, _)| Header::from_raw(&raw).is_ok())
}

/// Where and how a block is stored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StoredBlock {
    /// Absolute offset in the file.
    pub offset: u64,
    /// Number of stored bytes.
    pub size: u32,
    pub compressed: bool,
    /// Adler-32 of the stored bytes.
    pub checksum: u32,
}

impl fmt::Debug for StoredBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredBlock")
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("size", &self.size)
            .field("compressed", &self.compressed)
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .finish()
    }
}

/// Block pointer and checksum tables.
#[derive(Clone)]
pub struct BlockIndex {
    header: Header,
    pointers: Vec<little_endian::U64>,
    checksums: Vec<little_endian::U32>,
}

impl fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIndex")
            .field("len", &self.pointers.len())
            .field("data_offset", &format_args!("{:#x}", self.header.data_offset()))
            .finish()
    }
}

impl BlockIndex {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        self.header.num_blocks
    }

    /// Offset of a block's stored data. Returns [`None`] if the block is out
    /// of range. The pointer is not validated until the block is read.
    pub fn offset(&self, block: u32) -> Option<u64> {
        let pointer = self.pointers.get(block as usize)?.get();

        Some(self.header.data_offset() + (pointer & !FLAG_UNCOMPRESSED))
    }

    /// Location of a block's stored data. Returns [`None`] if the block is out
    /// of range.
    pub fn get(&self, block: u32) -> Option<Result<StoredBlock>> {
        let pointer = self.pointers.get(block as usize)?.get();
        let start = pointer & !FLAG_UNCOMPRESSED;

        let end = match self.pointers.get(block as usize + 1) {
            Some(p) => p.get() & !FLAG_UNCOMPRESSED,
            None => self.header.compressed_data_size,
        };

        let size = end
            .checked_sub(start)
            .and_then(|s| u32::try_from(s).ok())
            .filter(|s| *s > 0 && *s <= self.header.block_size);
        let Some(size) = size else {
            return Some(Err(Error::InvalidStoredSize {
                block,
                size: end.wrapping_sub(start),
            }));
        };

        Some(Ok(StoredBlock {
            offset: self.header.data_offset() + start,
            size,
            compressed: pointer & FLAG_UNCOMPRESSED == 0,
            checksum: self.checksums[block as usize].get(),
        }))
    }

    /// Number of blocks stored compressed.
    pub fn compressed_blocks(&self) -> u32 {
        self.pointers
            .iter()
            .filter(|p| p.get() & FLAG_UNCOMPRESSED == 0)
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
    if header.data_offset() > file_size {
        return Err(Error::TableTruncated { file_size });
    }

    let pointers = read_table(&mut reader, header.num_blocks, "block_pointers")?;
    let checksums = read_table(&mut reader, header.num_blocks, "block_checksums")?;

    Ok((
        header,
        BlockIndex {
            header,
            pointers,
            checksums,
        },
    ))
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
            trace!("GCZ block #{block} is cached");
        }

        Ok(&self.cache)
    }

    fn load(&mut self, mut reader: impl Read + Seek, block: u32) -> Result<()> {
        let stored = self
            .index
            .get(block)
            .ok_or(Error::BlockOutOfRange(block))??;
        let block_size = self.index.header.block_size as usize;
        let is_last = block + 1 == self.index.len();

        trace!("Loading GCZ block #{block}: {stored:?}");

        if !stored.compressed && !is_last && stored.size as usize != block_size {
            return Err(Error::InvalidStoredSize {
                block,
                size: stored.size.into(),
            });
        }

        self.cache.resize(block_size, 0);
        self.stored.resize(stored.size as usize, 0);

        reader
            .seek(SeekFrom::Start(stored.offset))
            .map_err(|e| Error::DataRead("block_seek", e))?;

        reader
            .read_exact(&mut self.stored)
            .map_err(|e| Error::DataRead("block_data", e))?;

        let actual = adler2::adler32_slice(&self.stored);
        if actual != stored.checksum {
            return Err(Error::ChecksumMismatch {
                block,
                expected: stored.checksum,
                actual,
            });
        }

        if stored.compressed {
            let mut decoder = ZlibDecoder::new(self.stored.as_slice());
            let size = decoder
                .read_full(&mut self.cache)
                .map_err(|e| Error::Inflate(block, e))?;
            let extra = decoder
                .read(&mut [0u8; 1])
                .map_err(|e| Error::Inflate(block, e))?;

            if size != block_size || extra != 0 {
                return Err(Error::InflatedSize {
                    block,
                    size: size + extra,
                });
            }
        } else {
            // The final block may be stored short.
            let n = self.stored.len();
            self.cache[..n].copy_from_slice(&self.stored);
            util::zero_fill(&mut self.cache[n..]);
        }

        Ok(())
    }
}
