// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Random access to the logical disc inside a sparse or compressed image.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    format::{
        blockmap::{BlockAddr, BlockMapTable},
        ciso, cso, gcz, nasos, wux,
    },
    stream::ReadFullExt,
    util,
};

/// Number of leading bytes inspected when detecting the image format. This is
/// enough for the fixed-size header of every supported format.
pub const DETECT_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unrecognized disc image format")]
    UnknownFormat,
    #[error("NASOS error")]
    Nasos(#[from] nasos::Error),
    #[error("WUX error")]
    Wux(#[from] wux::Error),
    #[error("CISO error")]
    Ciso(#[from] ciso::Error),
    #[error("GCZ error")]
    Gcz(#[from] gcz::Error),
    #[error("CSO error")]
    Cso(#[from] cso::Error),
    #[error("Block #{0} is out of range")]
    BlockOutOfRange(u32),
    #[error("Block #{block} is truncated: expected {expected} bytes, but only read {actual}")]
    ShortRead {
        block: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Failed to read disc data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

impl Error {
    /// The [`io::ErrorKind`] that best describes this error. Errors from the
    /// underlying file keep their original kind.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::DataRead(_, e)
            | Self::Nasos(nasos::Error::DataRead(_, e))
            | Self::Wux(wux::Error::DataRead(_, e))
            | Self::Ciso(ciso::Error::DataRead(_, e))
            | Self::Gcz(gcz::Error::DataRead(_, e))
            | Self::Cso(cso::Error::DataRead(_, e)) => e.kind(),
            Self::ShortRead { .. } => io::ErrorKind::UnexpectedEof,
            Self::UnknownFormat => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::InvalidData,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        Self::new(e.kind(), e)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Supported disc image container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscFormat {
    Nasos,
    Wux,
    Ciso,
    Gcz,
    Cso,
}

impl fmt::Display for DiscFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl DiscFormat {
    /// All formats in detection order.
    pub const ALL: [Self; 5] = [Self::Ciso, Self::Cso, Self::Gcz, Self::Nasos, Self::Wux];

    pub fn name(self) -> &'static str {
        match self {
            Self::Nasos => "NASOS",
            Self::Wux => "WUX",
            Self::Ciso => "CISO",
            Self::Gcz => "GCZ",
            Self::Cso => "CSO",
        }
    }

    /// Check if the leading bytes of a file are a valid header for this
    /// format. This performs no I/O.
    pub fn is_supported(self, header: &[u8]) -> bool {
        match self {
            Self::Nasos => nasos::is_supported(header),
            Self::Wux => wux::is_supported(header),
            Self::Ciso => ciso::is_supported(header),
            Self::Gcz => gcz::is_supported(header),
            Self::Cso => cso::is_supported(header),
        }
    }

    /// Detect the format from the leading bytes of a file.
    pub fn detect(header: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.is_supported(header))
    }
}

/// Format-specific header of an opened image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Header {
    Nasos(nasos::Header),
    Wux(wux::Header),
    Ciso(ciso::Header),
    Gcz(gcz::Header),
    Cso(cso::Header),
}

impl Header {
    pub fn format(&self) -> DiscFormat {
        match self {
            Self::Nasos(_) => DiscFormat::Nasos,
            Self::Wux(_) => DiscFormat::Wux,
            Self::Ciso(_) => DiscFormat::Ciso,
            Self::Gcz(_) => DiscFormat::Gcz,
            Self::Cso(_) => DiscFormat::Cso,
        }
    }

    pub fn block_size(&self) -> u32 {
        match self {
            Self::Nasos(h) => h.block_size(),
            Self::Wux(h) => h.sector_size,
            Self::Ciso(h) => h.block_size,
            Self::Gcz(h) => h.block_size,
            Self::Cso(h) => h.block_size,
        }
    }

    /// Size of the logical disc.
    pub fn disc_size(&self) -> u64 {
        match self {
            Self::Nasos(h) => h.disc_size(),
            Self::Wux(h) => h.uncompressed_size,
            Self::Ciso(h) => h.disc_size(),
            Self::Gcz(h) => h.disc_size(),
            Self::Cso(h) => h.uncompressed_size,
        }
    }
}

/// Logical to physical block mapping for an opened image.
#[derive(Debug)]
pub enum BlockMap {
    /// Blocks are stored verbatim at the address given by a lookup table.
    Table(BlockMapTable),
    /// Blocks are individually compressed with zlib and checksummed.
    Gcz(gcz::BlockDecoder),
    /// Blocks are individually compressed with deflate, zlib or LZ4.
    Cso(cso::BlockDecoder),
}

impl BlockMap {
    pub fn len(&self) -> u32 {
        match self {
            Self::Table(t) => t.len(),
            Self::Gcz(d) => d.index().len(),
            Self::Cso(d) => d.index().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical location of a logical block. Returns [`None`] only if the
    /// block is out of range.
    pub fn get(&self, block: u32) -> Option<BlockAddr> {
        match self {
            Self::Table(t) => t.get(block),
            Self::Gcz(d) => d.index().offset(block).map(BlockAddr::Data),
            Self::Cso(d) => d.index().offset(block).map(BlockAddr::Data),
        }
    }
}

/// Behavior when seeking outside of the logical disc.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeekMode {
    /// Clamp the target position to `[0, size]`.
    #[default]
    Clamp,
    /// Fail with [`io::ErrorKind::InvalidInput`].
    Strict,
}

/// A reader that presents the logical disc contained in a sparse or compressed
/// image as a contiguous stream.
///
/// Reads that fail partway through return the bytes produced so far. The error
/// that interrupted the read is available from [`Self::last_error`]. If no
/// bytes could be produced, the error is returned directly.
pub struct SparseDiscReader<R> {
    inner: R,
    header: Header,
    map: BlockMap,
    block_size: u32,
    disc_size: u64,
    pos: u64,
    seek_mode: SeekMode,
    last_error: Option<io::ErrorKind>,
}

impl<R> fmt::Debug for SparseDiscReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseDiscReader")
            .field("header", &self.header)
            .field("map", &self.map)
            .field("block_size", &self.block_size)
            .field("disc_size", &self.disc_size)
            .field("pos", &self.pos)
            .field("seek_mode", &self.seek_mode)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> SparseDiscReader<R> {
    /// Open an image, detecting its format from the header.
    pub fn new(mut inner: R) -> Result<Self> {
        inner
            .rewind()
            .map_err(|e| Error::DataRead("rewind", e))?;

        let mut head = [0u8; DETECT_SIZE];
        let n = inner
            .read_full(&mut head)
            .map_err(|e| Error::DataRead("detect", e))?;

        let format = DiscFormat::detect(&head[..n]).ok_or(Error::UnknownFormat)?;
        debug!("Detected {format} image");

        Self::with_format(inner, format)
    }

    /// Open an image of a known format.
    pub fn with_format(mut inner: R, format: DiscFormat) -> Result<Self> {
        inner
            .rewind()
            .map_err(|e| Error::DataRead("rewind", e))?;

        let (header, map) = match format {
            DiscFormat::Nasos => {
                let (h, t) = nasos::open(&mut inner)?;
                (Header::Nasos(h), BlockMap::Table(t))
            }
            DiscFormat::Wux => {
                let (h, t) = wux::open(&mut inner)?;
                (Header::Wux(h), BlockMap::Table(t))
            }
            DiscFormat::Ciso => {
                let (h, t) = ciso::open(&mut inner)?;
                (Header::Ciso(h), BlockMap::Table(t))
            }
            DiscFormat::Gcz => {
                let (h, i) = gcz::open(&mut inner)?;
                (Header::Gcz(h), BlockMap::Gcz(gcz::BlockDecoder::new(i)))
            }
            DiscFormat::Cso => {
                let (h, i) = cso::open(&mut inner)?;
                (Header::Cso(h), BlockMap::Cso(cso::BlockDecoder::new(i)))
            }
        };

        let block_size = header.block_size();
        let disc_size = header.disc_size();

        debug!(
            "Opened {format} image: {} blocks of {block_size} bytes, {disc_size} bytes total",
            map.len(),
        );

        Ok(Self {
            inner,
            header,
            map,
            block_size,
            disc_size,
            pos: 0,
            seek_mode: SeekMode::default(),
            last_error: None,
        })
    }

    /// Copy the part of `block` starting at `offset` into `buf`. The number of
    /// bytes is only less than `buf.len()` if the underlying file is truncated.
    fn read_block_segment(&mut self, block: u32, offset: u32, buf: &mut [u8]) -> Result<usize> {
        match &mut self.map {
            BlockMap::Table(table) => match table.get(block) {
                Some(BlockAddr::Empty) => {
                    trace!("Block #{block} is empty");
                    util::zero_fill(buf);
                    Ok(buf.len())
                }
                Some(BlockAddr::Data(addr)) => {
                    let phys = addr + u64::from(offset);
                    trace!("Block #{block}: reading {} bytes at {phys:#x}", buf.len());

                    self.inner
                        .seek(SeekFrom::Start(phys))
                        .map_err(|e| Error::DataRead("block_seek", e))?;
                    self.inner
                        .read_full(buf)
                        .map_err(|e| Error::DataRead("block_data", e))
                }
                None => Err(Error::BlockOutOfRange(block)),
            },
            BlockMap::Gcz(decoder) => {
                let data = decoder.block(&mut self.inner, block)?;
                let offset = offset as usize;
                buf.copy_from_slice(&data[offset..offset + buf.len()]);
                Ok(buf.len())
            }
            BlockMap::Cso(decoder) => {
                let data = decoder.block(&mut self.inner, block)?;
                let offset = offset as usize;
                buf.copy_from_slice(&data[offset..offset + buf.len()]);
                Ok(buf.len())
            }
        }
    }
}

impl<R> SparseDiscReader<R> {
    pub fn format(&self) -> DiscFormat {
        self.header.format()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn block_map(&self) -> &BlockMap {
        &self.map
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.map.len()
    }

    /// Size of the logical disc.
    pub fn size(&self) -> u64 {
        self.disc_size
    }

    /// Current position in the logical disc.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Physical location of a logical block. For compressed images, this is
    /// the start of the stored block data as recorded in the index. It is not
    /// validated until the block is read, so a corrupt index entry surfaces as
    /// a read error rather than [`None`]. Returns [`None`] only if the block is
    /// out of range. This performs no I/O.
    pub fn phys_block_addr(&self, block: u32) -> Option<BlockAddr> {
        self.map.get(block)
    }

    /// Kind of the error that interrupted the most recent partial read.
    pub fn last_error(&self) -> Option<io::ErrorKind> {
        self.last_error
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn seek_mode(&self) -> SeekMode {
        self.seek_mode
    }

    pub fn set_seek_mode(&mut self, mode: SeekMode) {
        self.seek_mode = mode;
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for SparseDiscReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let to_read = (buf.len() as u64).min(self.disc_size - self.pos) as usize;
        let block_size = u64::from(self.block_size);
        let mut total = 0;
        let mut error = None;

        while total < to_read {
            // Both fit in u32 because the block map is indexed by u32.
            let block = (self.pos / block_size) as u32;
            let offset = (self.pos % block_size) as u32;
            let n = (to_read - total).min((self.block_size - offset) as usize);

            match self.read_block_segment(block, offset, &mut buf[total..total + n]) {
                Ok(actual) => {
                    total += actual;
                    self.pos += actual as u64;

                    if actual < n {
                        error = Some(Error::ShortRead {
                            block,
                            expected: n,
                            actual,
                        });
                        break;
                    }
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = error {
            debug!("Read stopped at {:#x} after {total} bytes: {e}", self.pos);
            self.last_error = Some(e.kind());

            if total == 0 {
                return Err(e.into());
            }
        }

        Ok(total)
    }
}

impl<R> Seek for SparseDiscReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => i128::from(o),
            SeekFrom::End(o) => i128::from(self.disc_size) + i128::from(o),
            SeekFrom::Current(o) => i128::from(self.pos) + i128::from(o),
        };

        let clamped = target.clamp(0, i128::from(self.disc_size));
        if self.seek_mode == SeekMode::Strict && clamped != target {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Seek target {target} is outside of disc (0..={})", self.disc_size),
            ));
        }

        // Within [0, disc_size].
        self.pos = clamped as u64;

        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}
