// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read},
    ops::Range,
};

use zerocopy::{FromZeros, IntoBytes, byteorder::little_endian};

/// Physical location of a logical block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BlockAddr {
    /// The block has no backing data and reads as zeros.
    Empty,
    /// Byte offset of the block's data in the backing file.
    Data(u64),
}

impl fmt::Debug for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Data(addr) => f
                .debug_tuple("Data")
                .field(&format_args!("{addr:#x}"))
                .finish(),
        }
    }
}

/// Parameters for converting a compact table entry into a byte offset:
/// `base + (entry << shift)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Byte offset added to every shifted entry.
    pub base: u64,
    /// Left shift applied to an entry before adding [`Self::base`].
    pub shift: u32,
    /// Entry value marking a block with no data. Formats that only
    /// deduplicate blocks have no sentinel.
    pub empty: Option<u32>,
}

impl fmt::Debug for TableLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLayout")
            .field("base", &format_args!("{:#x}", self.base))
            .field("shift", &self.shift)
            .field("empty", &self.empty.map(|e| format!("{e:#010x}")))
            .finish()
    }
}

/// Half-open range of logical blocks.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockBounds {
    /// Starting block (inclusive).
    pub start: u32,
    /// Ending block (exclusive).
    pub end: u32,
}

impl fmt::Debug for BlockBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl IntoIterator for BlockBounds {
    type Item = u32;

    type IntoIter = Range<u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.start..self.end
    }
}

impl BlockBounds {
    /// Length in blocks.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }
}

/// A run of logical blocks that are either all empty or stored back-to-back
/// in the backing file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockRun {
    pub bounds: BlockBounds,
    /// For data runs, the physical address of the first block.
    pub addr: BlockAddr,
}

impl fmt::Debug for BlockRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} => {:?}", self.bounds, self.addr)
    }
}

/// Logical to physical block translation table. This is immutable once built.
/// Entries are kept in their on-disk little-endian form and converted on
/// lookup.
#[derive(Clone)]
pub struct BlockMapTable {
    entries: Vec<little_endian::U32>,
    layout: TableLayout,
}

impl fmt::Debug for BlockMapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockMapTable")
            .field("len", &self.entries.len())
            .field("layout", &self.layout)
            .finish()
    }
}

impl BlockMapTable {
    pub fn new(entries: impl IntoIterator<Item = u32>, layout: TableLayout) -> Self {
        debug_assert!(layout.shift < 32);

        Self {
            entries: entries.into_iter().map(little_endian::U32::new).collect(),
            layout,
        }
    }

    /// Read `count` little-endian u32 entries. The caller is responsible for
    /// bounding `count` since the whole table is allocated up front.
    pub fn read_le(mut reader: impl Read, count: u32, layout: TableLayout) -> io::Result<Self> {
        debug_assert!(layout.shift < 32);

        let mut entries = little_endian::U32::new_vec_zeroed(count as usize)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "Block map too large"))?;

        reader.read_exact(entries.as_mut_slice().as_mut_bytes())?;

        Ok(Self { entries, layout })
    }

    /// Number of logical blocks.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        // Tables are built from u32 counts.
        self.entries.len() as u32
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    /// Raw table entry for the block.
    pub fn entry(&self, block: u32) -> Option<u32> {
        self.entries.get(block as usize).map(|e| e.get())
    }

    /// Resolve the physical location of a block. Returns [`None`] if the block
    /// is out of range.
    pub fn get(&self, block: u32) -> Option<BlockAddr> {
        let entry = self.entry(block)?;

        if self.layout.empty == Some(entry) {
            return Some(BlockAddr::Empty);
        }

        Some(BlockAddr::Data(
            self.layout.base + (u64::from(entry) << self.layout.shift),
        ))
    }

    /// Number of blocks that have backing data.
    pub fn data_blocks(&self) -> u32 {
        match self.layout.empty {
            Some(empty) => self.entries.iter().filter(|e| e.get() != empty).count() as u32,
            None => self.len(),
        }
    }

    /// Collapse the table into runs of blocks. Adjacent data blocks belong to
    /// the same run only if they are also physically adjacent.
    pub fn runs(&self, block_size: u32) -> Vec<BlockRun> {
        let mut result: Vec<BlockRun> = vec![];
        let mut next_addr = None;

        for block in 0..self.len() {
            // In bounds by construction.
            let Some(addr) = self.get(block) else {
                break;
            };

            let extends = match (result.last(), addr) {
                (Some(run), BlockAddr::Empty) => run.addr == BlockAddr::Empty,
                (Some(_), BlockAddr::Data(a)) => next_addr == Some(a),
                (None, _) => false,
            };

            if extends {
                if let Some(run) = result.last_mut() {
                    run.bounds.end = block + 1;
                }
            } else {
                result.push(BlockRun {
                    bounds: BlockBounds {
                        start: block,
                        end: block + 1,
                    },
                    addr,
                });
            }

            next_addr = match addr {
                BlockAddr::Empty => None,
                BlockAddr::Data(a) => a.checked_add(block_size.into()),
            };
        }

        result
    }
}
