/*
 * SPDX-FileCopyrightText: 2025 The sparsedisc Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

// Each test binary only uses a subset of these.
#![allow(dead_code)]

use std::{
    cell::RefCell,
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    rc::Rc,
};

use flate2::{
    Compression,
    write::{DeflateEncoder, ZlibEncoder},
};
use sparsedisc::format::{ciso, cso, gcz, nasos, wux};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub seeks: usize,
    pub reads: usize,
}

/// Reader that records how many seeks and non-empty reads were issued.
pub struct CountingReader<R> {
    inner: R,
    counts: Rc<RefCell<Counts>>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> (Self, Rc<RefCell<Counts>>) {
        let counts = Rc::new(RefCell::new(Counts::default()));

        (
            Self {
                inner,
                counts: counts.clone(),
            },
            counts,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.counts.borrow_mut().reads += 1;
        }

        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.counts.borrow_mut().seeks += 1;

        self.inner.seek(pos)
    }
}

pub fn reset(counts: &RefCell<Counts>) {
    *counts.borrow_mut() = Counts::default();
}

/// Deterministic non-zero filler for block `index`.
pub fn block_pattern(index: u32, size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(index.wrapping_mul(97) + 1) as u8 | 1)
        .collect()
}

/// Build a GameCube NASOS image. `blocks` maps logical block numbers to their
/// contents. Data is stored in the reverse order of `blocks` so that logical
/// and physical order differ.
pub fn nasos_gcn(blocks: &[(u32, Vec<u8>)]) -> Vec<u8> {
    const BLOCK_COUNT: usize = 712_880;

    let mut image = vec![];
    image.extend_from_slice(&nasos::MAGIC_GCML);
    image.extend_from_slice(b"GALE");
    image.extend_from_slice(&[0u8; 16]);

    let table_offset = image.len();
    image.resize(table_offset + BLOCK_COUNT * 4, 0xff);

    for (block, data) in blocks.iter().rev() {
        let addr = image.len() as u32;
        let entry = table_offset + *block as usize * 4;
        image[entry..entry + 4].copy_from_slice(&addr.to_le_bytes());
        image.extend_from_slice(data);
    }

    image
}

/// Build a Wii NASOS image with `block_count` 1024-byte blocks. Data is
/// aligned to 256 bytes since the table stores shifted addresses.
pub fn nasos_wii(magic: [u8; 4], block_count: u32, blocks: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut image = vec![0u8; 92];
    image[..4].copy_from_slice(&magic);
    image[4..8].copy_from_slice(b"RSPE");
    image[72..76].copy_from_slice(&(block_count << 8).to_le_bytes());

    let table_offset = image.len();
    image.resize(table_offset + block_count as usize * 4, 0xff);

    for (block, data) in blocks {
        image.resize(image.len().next_multiple_of(256), 0);

        let entry = (image.len() >> 8) as u32;
        let offset = table_offset + *block as usize * 4;
        image[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
        image.extend_from_slice(data);
    }

    image
}

/// Build a WUX image. `indices` is the sector table and `sectors` holds the
/// physical sector data.
pub fn wux(sector_size: u32, size: u64, indices: &[u32], sectors: &[Vec<u8>]) -> Vec<u8> {
    let mut image = vec![];
    image.extend_from_slice(&wux::MAGIC_0);
    image.extend_from_slice(&wux::MAGIC_1);
    image.extend_from_slice(&sector_size.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&size.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());

    for index in indices {
        image.extend_from_slice(&index.to_le_bytes());
    }

    image.resize(image.len().next_multiple_of(sector_size as usize), 0);

    for sector in sectors {
        assert_eq!(sector.len(), sector_size as usize);
        image.extend_from_slice(sector);
    }

    image
}

/// Build a CISO image. `None` entries are empty blocks.
pub fn ciso(block_size: u32, blocks: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut image = vec![0u8; ciso::HEADER_SIZE];
    image[..4].copy_from_slice(&ciso::MAGIC);
    image[4..8].copy_from_slice(&block_size.to_le_bytes());

    for (i, block) in blocks.iter().enumerate() {
        if let Some(data) = block {
            image[8 + i] = 1;
            image.extend_from_slice(data);
        }
    }

    image
}

/// Build a GCZ image. Each block is compressed unless `compress` is false for
/// it. The last block may be shorter than the block size if it is stored
/// uncompressed.
pub fn gcz(block_size: u32, data_size: u64, blocks: &[(Vec<u8>, bool)]) -> Vec<u8> {
    let mut pointers = vec![];
    let mut checksums = vec![];
    let mut data = vec![];

    for (contents, compress) in blocks {
        let stored = if *compress {
            zlib(contents)
        } else {
            contents.clone()
        };

        let flag = if *compress { 0 } else { gcz::FLAG_UNCOMPRESSED };
        pointers.push(data.len() as u64 | flag);
        checksums.push(adler2::adler32_slice(&stored));
        data.extend_from_slice(&stored);
    }

    let mut image = vec![];
    image.extend_from_slice(&gcz::MAGIC.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&(data.len() as u64).to_le_bytes());
    image.extend_from_slice(&data_size.to_le_bytes());
    image.extend_from_slice(&block_size.to_le_bytes());
    image.extend_from_slice(&(blocks.len() as u32).to_le_bytes());

    for p in pointers {
        image.extend_from_slice(&p.to_le_bytes());
    }
    for c in checksums {
        image.extend_from_slice(&c.to_le_bytes());
    }

    image.extend_from_slice(&data);
    image
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(vec![], Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(vec![], Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// How a CSO or ZSO block is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsoBlock {
    Stored,
    Deflate,
    Lz4,
}

/// Build a CSO or ZSO image. Stored blocks are aligned to `1 << index_shift`
/// bytes. The disc size is always `blocks.len()` full blocks, even if the
/// contents of a block are shorter.
pub fn cso(
    magic: [u8; 4],
    version: u8,
    block_size: u32,
    index_shift: u8,
    blocks: &[(Vec<u8>, CsoBlock)],
) -> Vec<u8> {
    let align = 1usize << index_shift;

    let mut image = vec![];
    image.extend_from_slice(&magic);
    image.extend_from_slice(&(cso::CSO_HEADER_SIZE as u32).to_le_bytes());
    image.extend_from_slice(&(blocks.len() as u64 * u64::from(block_size)).to_le_bytes());
    image.extend_from_slice(&block_size.to_le_bytes());
    image.push(version);
    image.push(index_shift);
    image.extend_from_slice(&[0u8; 2]);

    let table_offset = image.len();
    image.resize(table_offset + (blocks.len() + 1) * 4, 0);

    // CSO v2 flags LZ4 blocks. Everything else flags verbatim blocks.
    let flag_lz4 = magic == cso::CISO_MAGIC && version >= 2;
    let mut entries = vec![];

    for (contents, mode) in blocks {
        image.resize(image.len().next_multiple_of(align), 0);

        let stored = match mode {
            CsoBlock::Stored => contents.clone(),
            CsoBlock::Deflate => deflate(contents),
            CsoBlock::Lz4 => lz4_flex::block::compress(contents),
        };
        let flagged = if flag_lz4 {
            *mode == CsoBlock::Lz4
        } else {
            *mode == CsoBlock::Stored
        };

        let mut entry = (image.len() >> index_shift) as u32;
        if flagged {
            entry |= cso::INDEX_FLAG;
        }
        entries.push(entry);
        image.extend_from_slice(&stored);
    }

    image.resize(image.len().next_multiple_of(align), 0);
    entries.push((image.len() >> index_shift) as u32);

    for (i, entry) in entries.iter().enumerate() {
        let offset = table_offset + i * 4;
        image[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
    }

    image
}

/// Build a DAX image. Blocks are zlib compressed unless `compress` is false
/// for them, in which case each one gets its own uncompressed area.
pub fn dax(blocks: &[(Vec<u8>, bool)]) -> Vec<u8> {
    let nc_areas: Vec<u32> = blocks
        .iter()
        .enumerate()
        .filter(|(_, (_, compress))| !compress)
        .map(|(i, _)| i as u32)
        .collect();

    let mut image = vec![];
    image.extend_from_slice(&cso::DAX_MAGIC);
    image.extend_from_slice(&(blocks.len() as u32 * cso::DAX_BLOCK_SIZE).to_le_bytes());
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&(nc_areas.len() as u32).to_le_bytes());
    image.extend_from_slice(&[0u8; 16]);

    let stored: Vec<Vec<u8>> = blocks
        .iter()
        .map(|(contents, compress)| if *compress { zlib(contents) } else { contents.clone() })
        .collect();

    let mut offset = (image.len() + blocks.len() * 6 + nc_areas.len() * 8) as u32;
    for data in &stored {
        image.extend_from_slice(&offset.to_le_bytes());
        offset += data.len() as u32;
    }
    for data in &stored {
        image.extend_from_slice(&(data.len() as u16).to_le_bytes());
    }
    for start in nc_areas {
        image.extend_from_slice(&start.to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes());
    }
    for data in stored {
        image.extend_from_slice(&data);
    }

    image
}

pub fn counting(image: Vec<u8>) -> (CountingReader<Cursor<Vec<u8>>>, Rc<RefCell<Counts>>) {
    CountingReader::new(Cursor::new(image))
}
