/*
 * SPDX-FileCopyrightText: 2025 The sparsedisc Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

mod common;

use std::{
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    sync::Arc,
    thread,
};

use assert_matches::assert_matches;
use sparsedisc::{
    format::{
        cso, nasos,
        sparse::{self, DiscFormat, DETECT_SIZE, SeekMode, SparseDiscReader},
    },
    stream::{MutexFile, UserPosFile},
};

fn sample_images() -> Vec<(DiscFormat, Vec<u8>)> {
    vec![
        (
            DiscFormat::Nasos,
            common::nasos_wii(nasos::MAGIC_WII5, 8, &[(3, common::block_pattern(3, 1024))]),
        ),
        (
            DiscFormat::Wux,
            common::wux(256, 2048, &[0; 8], &[common::block_pattern(0, 256)]),
        ),
        (
            DiscFormat::Ciso,
            common::ciso(0x8000, &[None, Some(common::block_pattern(1, 0x8000))]),
        ),
        (
            DiscFormat::Gcz,
            common::gcz(0x8000, 0x8000, &[(common::block_pattern(0, 0x8000), true)]),
        ),
        (
            DiscFormat::Cso,
            common::cso(
                cso::CISO_MAGIC,
                1,
                2048,
                0,
                &[(common::block_pattern(0, 2048), common::CsoBlock::Deflate)],
            ),
        ),
    ]
}

#[test]
fn detect_each_format() {
    for (format, image) in sample_images() {
        let head = &image[..image.len().min(DETECT_SIZE)];

        assert_eq!(DiscFormat::detect(head), Some(format), "{format}");
        for other in DiscFormat::ALL {
            assert_eq!(other.is_supported(head), other == format, "{other} vs {format}");
        }

        let reader = SparseDiscReader::new(Cursor::new(&image)).unwrap();
        assert_eq!(reader.format(), format);
        assert_eq!(reader.header().format(), format);
    }
}

#[test]
fn detect_rejects_garbage() {
    assert_eq!(DiscFormat::detect(&[]), None);
    assert_eq!(DiscFormat::detect(b"WUX0"), None);
    assert_eq!(DiscFormat::detect(&[0xffu8; DETECT_SIZE]), None);

    assert_matches!(
        SparseDiscReader::new(Cursor::new(b"not a disc image")),
        Err(sparse::Error::UnknownFormat)
    );

    let err = io::Error::from(sparse::Error::UnknownFormat);
    assert_eq!(err.kind(), io::ErrorKind::Unsupported);
}

#[test]
fn size_matches_read_length() {
    for (format, image) in sample_images() {
        let mut reader = SparseDiscReader::new(Cursor::new(&image)).unwrap();

        let mut data = vec![];
        reader.read_to_end(&mut data).unwrap();

        assert_eq!(data.len() as u64, reader.size(), "{format}");
        assert_eq!(reader.tell(), reader.size(), "{format}");
        assert_eq!(reader.last_error(), None, "{format}");
    }
}

#[test]
fn seek_clamps_by_default() {
    let (_, image) = sample_images().swap_remove(0);
    let mut reader = SparseDiscReader::new(Cursor::new(image)).unwrap();

    assert_eq!(reader.seek_mode(), SeekMode::Clamp);
    assert_eq!(reader.seek(SeekFrom::Start(u64::MAX)).unwrap(), 8192);
    assert_eq!(reader.seek(SeekFrom::Current(i64::MIN)).unwrap(), 0);
    assert_eq!(reader.seek(SeekFrom::End(i64::MAX)).unwrap(), 8192);
    assert_eq!(reader.stream_position().unwrap(), 8192);

    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn seek_strict() {
    let (_, image) = sample_images().swap_remove(0);
    let mut reader = SparseDiscReader::new(Cursor::new(image)).unwrap();
    reader.set_seek_mode(SeekMode::Strict);

    reader.seek(SeekFrom::Start(100)).unwrap();

    for pos in [SeekFrom::Start(8193), SeekFrom::Current(-101), SeekFrom::End(1)] {
        let err = reader.seek(pos).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(reader.tell(), 100);
    }

    assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), 8192);
}

#[test]
fn into_inner_returns_source() {
    let (_, image) = sample_images().swap_remove(1);
    let reader = SparseDiscReader::new(Cursor::new(image.clone())).unwrap();

    assert_eq!(reader.into_inner().into_inner(), image);
}

fn read_all<R: Read + Seek>(reader: &mut SparseDiscReader<R>) -> Vec<u8> {
    let mut data = vec![];
    reader.rewind().unwrap();
    reader.read_to_end(&mut data).unwrap();
    data
}

#[test]
fn shared_source_with_independent_positions() {
    let (_, image) = sample_images().swap_remove(0);
    let expected = {
        let mut reader = SparseDiscReader::new(Cursor::new(&image)).unwrap();
        read_all(&mut reader)
    };

    let shared = Arc::new(MutexFile::new(Cursor::new(image)));
    let mut a = SparseDiscReader::new(UserPosFile::new(shared.clone())).unwrap();
    let mut b = SparseDiscReader::new(UserPosFile::new(shared.clone())).unwrap();

    // Interleaved reads must not disturb each other's positions.
    let mut buf_a = [0u8; 1000];
    let mut buf_b = [0u8; 1000];
    b.seek(SeekFrom::Start(3000)).unwrap();
    a.read_exact(&mut buf_a).unwrap();
    b.read_exact(&mut buf_b).unwrap();
    a.read_exact(&mut buf_a).unwrap();

    assert_eq!(buf_a.as_slice(), &expected[1000..2000]);
    assert_eq!(buf_b.as_slice(), &expected[3000..4000]);

    let handles = [a, b].map(|mut reader| thread::spawn(move || read_all(&mut reader)));

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn shared_file_handle() {
    let (_, image) = sample_images().swap_remove(3);
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&image).unwrap();

    let expected = {
        let mut reader = SparseDiscReader::new(Cursor::new(&image)).unwrap();
        read_all(&mut reader)
    };

    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                let mut reader = SparseDiscReader::new(UserPosFile::new(&file)).unwrap();
                assert_eq!(read_all(&mut reader), expected);
            });
        }
    });
}
