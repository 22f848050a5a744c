// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsStr,
    fmt,
    fs::File,
    io::{self, BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use md5::{Digest, Md5};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{
    cli::args::Cli,
    format::{
        blockmap::{BlockAddr, BlockRun},
        cso, gcz,
        sparse::{self, BlockMap, DiscFormat, Header, SparseDiscReader},
    },
    stream::{self, HashingReader, ReadFullExt},
    util::{self, NumBytes},
};

struct CompactView<'a, T>(&'a [T]);

impl<T: fmt::Debug> fmt::Debug for CompactView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();

        for item in self.0 {
            // No alternate mode for no inner newlines.
            list.entry(&format_args!("{item:?}"));
        }

        list.finish()
    }
}

struct Metadata<'a> {
    header: &'a Header,
    disc_size: u64,
    block_size: u32,
    block_count: u32,
}

impl fmt::Debug for Metadata<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("format", &self.header.format())
            .field("header", self.header)
            .field("disc_size", &NumBytes(self.disc_size))
            .field("block_size", &NumBytes(self.block_size))
            .field("block_count", &self.block_count)
            .finish()
    }
}

impl<'a> Metadata<'a> {
    fn new<R>(reader: &'a SparseDiscReader<R>) -> Self {
        Self {
            header: reader.header(),
            disc_size: reader.size(),
            block_size: reader.block_size(),
            block_count: reader.block_count(),
        }
    }
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open for reading: {path:?}"))
}

fn open_reader(path: &Path) -> Result<SparseDiscReader<File>> {
    let file = open_file(path)?;

    SparseDiscReader::new(file).with_context(|| format!("Failed to read disc image: {path:?}"))
}

/// Create a temporary file next to `output`. It is only moved into place by
/// [`persist_output`] once fully written.
fn create_temp_output(output: &Path) -> Result<NamedTempFile> {
    NamedTempFile::with_prefix_in(
        output
            .file_name()
            .unwrap_or_else(|| OsStr::new("sparsedisc.tmp")),
        util::parent_path(output),
    )
    .with_context(|| format!("Failed to create temporary file for: {output:?}"))
}

fn persist_output(temp: NamedTempFile, output: &Path) -> Result<()> {
    let temp_path = temp.path().to_owned();

    temp.persist(output).with_context(|| {
        format!("Failed to move temporary file to output path: {temp_path:?} -> {output:?}")
    })?;

    Ok(())
}

pub fn detect_subcommand(cli: &DetectCli) -> Result<()> {
    let mut file = open_file(&cli.input)?;
    let mut header = [0u8; sparse::DETECT_SIZE];
    let n = file
        .read_full(&mut header)
        .with_context(|| format!("Failed to read header: {:?}", cli.input))?;

    match DiscFormat::detect(&header[..n]) {
        Some(format) => println!("{format}"),
        None => bail!("Unrecognized disc image format: {:?}", cli.input),
    }

    Ok(())
}

pub fn info_subcommand(cli: &Cli, info_cli: &InfoCli) -> Result<()> {
    let reader = open_reader(&info_cli.input)?;

    if !cli.quiet {
        println!("{:#?}", Metadata::new(&reader));
    }

    Ok(())
}

pub fn map_subcommand(cli: &Cli, map_cli: &MapCli) -> Result<()> {
    let reader = open_reader(&map_cli.input)?;

    if !cli.quiet {
        println!("{:#?}", Metadata::new(&reader));
    }

    match reader.block_map() {
        BlockMap::Table(table) => {
            let runs: Vec<BlockRun> = table.runs(reader.block_size());
            println!("{:#?}", CompactView(&runs));
        }
        BlockMap::Gcz(decoder) => {
            let index = decoder.index();
            let blocks = (0..index.len())
                .filter_map(|b| index.get(b))
                .collect::<Result<Vec<gcz::StoredBlock>, _>>()
                .with_context(|| format!("Invalid block index: {:?}", map_cli.input))?;
            println!("{:#?}", CompactView(&blocks));
        }
        BlockMap::Cso(decoder) => {
            let index = decoder.index();
            let blocks = (0..index.len())
                .filter_map(|b| index.get(b))
                .collect::<Result<Vec<cso::StoredBlock>, _>>()
                .with_context(|| format!("Invalid block index: {:?}", map_cli.input))?;
            println!("{:#?}", CompactView(&blocks));
        }
    }

    Ok(())
}

pub fn unpack_subcommand(
    cli: &Cli,
    unpack_cli: &UnpackCli,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let mut reader = open_reader(&unpack_cli.input)?;
    let disc_size = reader.size();

    if !cli.quiet {
        println!("{:#?}", Metadata::new(&reader));
    }

    let temp = create_temp_output(&unpack_cli.output)?;
    let mut writer = BufWriter::new(temp);

    let runs = match reader.block_map() {
        BlockMap::Table(table) if unpack_cli.sparse => table.runs(reader.block_size()),
        _ => vec![],
    };

    if runs.is_empty() {
        stream::copy_n(&mut reader, &mut writer, disc_size, cancel_signal).with_context(|| {
            format!(
                "Failed to copy data: {:?} -> {:?}",
                unpack_cli.input, unpack_cli.output,
            )
        })?;
    } else {
        let block_size = u64::from(reader.block_size());

        for run in runs {
            let start = u64::from(run.bounds.start) * block_size;
            // The last block may be partial.
            let end = (u64::from(run.bounds.end) * block_size).min(disc_size);

            match run.addr {
                BlockAddr::Empty => {
                    writer
                        .seek(SeekFrom::Start(end))
                        .with_context(|| format!("Failed to seek file: {:?}", unpack_cli.output))?;
                }
                BlockAddr::Data(_) => {
                    reader.seek(SeekFrom::Start(start)).with_context(|| {
                        format!("Failed to seek disc image: {:?}", unpack_cli.input)
                    })?;

                    stream::copy_n(&mut reader, &mut writer, end - start, cancel_signal)
                        .with_context(|| {
                            format!(
                                "Failed to copy data: {:?} -> {:?}",
                                unpack_cli.input, unpack_cli.output,
                            )
                        })?;
                }
            }
        }
    }

    let temp = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush output: {:?}", unpack_cli.output))?;

    // Trailing holes are not backed by any writes.
    temp.as_file()
        .set_len(disc_size)
        .with_context(|| format!("Failed to set file size: {:?}", unpack_cli.output))?;

    persist_output(temp, &unpack_cli.output)?;

    info!(
        "Unpacked {:?} to {:?}",
        NumBytes(disc_size),
        unpack_cli.output
    );

    Ok(())
}

pub fn dump_subcommand(cli: &DumpCli, cancel_signal: &AtomicBool) -> Result<()> {
    let mut reader = open_reader(&cli.input)?;
    let disc_size = reader.size();

    if cli.offset > disc_size {
        bail!("Offset {} is beyond end of disc ({disc_size})", cli.offset);
    }

    let length = match cli.length {
        Some(length) => length.min(disc_size - cli.offset),
        None => disc_size - cli.offset,
    };

    reader
        .seek(SeekFrom::Start(cli.offset))
        .with_context(|| format!("Failed to seek disc image: {:?}", cli.input))?;

    match &cli.output {
        Some(output) => {
            let temp = create_temp_output(output)?;
            let mut writer = BufWriter::new(temp);

            stream::copy_n(&mut reader, &mut writer, length, cancel_signal)
                .with_context(|| format!("Failed to copy data: {:?} -> {output:?}", cli.input))?;

            let temp = writer
                .into_inner()
                .map_err(|e| e.into_error())
                .with_context(|| format!("Failed to flush output: {output:?}"))?;

            persist_output(temp, output)?;
        }
        None => {
            let mut writer = io::stdout().lock();

            stream::copy_n(&mut reader, &mut writer, length, cancel_signal)
                .with_context(|| format!("Failed to copy data to stdout: {:?}", cli.input))?;

            writer.flush().context("Failed to flush stdout")?;
        }
    }

    Ok(())
}

pub fn verify_subcommand(
    cli: &Cli,
    verify_cli: &VerifyCli,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let reader = open_reader(&verify_cli.input)?;
    let disc_size = reader.size();

    if !cli.quiet {
        println!("{:#?}", Metadata::new(&reader));
    }

    let expected = match reader.header() {
        Header::Nasos(h) if h.md5_orig != [0u8; 16] => Some(h.md5_orig),
        Header::Nasos(_) => {
            warn!("Image does not contain an MD5 digest of the original disc");
            None
        }
        _ => None,
    };

    let mut hashing_reader = HashingReader::new(reader, Md5::new());

    stream::copy_n(&mut hashing_reader, io::sink(), disc_size, cancel_signal)
        .with_context(|| format!("Failed to read disc image: {:?}", verify_cli.input))?;

    let (_, digest) = hashing_reader.finish();
    let actual = digest.finalize();

    info!("MD5: {}", hex::encode(actual));

    if let Some(expected) = expected {
        if actual.as_slice() != expected {
            bail!(
                "Expected MD5 {}, but have {}",
                hex::encode(expected),
                hex::encode(actual),
            );
        }

        info!("MD5 matches original disc");
    }

    info!("Successfully read {:?}", NumBytes(disc_size));

    Ok(())
}

/// Print the detected disc image format.
#[derive(Debug, Parser)]
pub struct DetectCli {
    /// Path to input disc image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,
}

/// Display disc image metadata.
#[derive(Debug, Parser)]
pub struct InfoCli {
    /// Path to input disc image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,
}

/// Display the logical to physical block mapping.
///
/// Blocks that are empty or stored back-to-back in the image are collapsed
/// into runs. For compressed images, every stored block is listed.
#[derive(Debug, Parser)]
pub struct MapCli {
    /// Path to input disc image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,
}

/// Unpack a disc image to a raw disc.
#[derive(Debug, Parser)]
pub struct UnpackCli {
    /// Path to input disc image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output raw disc.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: PathBuf,

    /// Leave empty blocks as holes in the output file.
    ///
    /// This has no effect for formats without empty blocks.
    #[arg(long)]
    pub sparse: bool,
}

/// Copy a byte range of the raw disc.
#[derive(Debug, Parser)]
pub struct DumpCli {
    /// Path to input disc image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output file.
    ///
    /// If unspecified, the data is written to stdout.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: Option<PathBuf>,

    /// Starting offset in the raw disc.
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to copy.
    ///
    /// If unspecified or too large, everything until the end of the disc is
    /// copied.
    #[arg(long, value_name = "BYTES")]
    pub length: Option<u64>,
}

/// Read the entire disc image and check its integrity.
///
/// For NASOS images, the MD5 digest of the raw disc is compared against the
/// digest stored in the header. For GCZ images, every block's checksum is
/// verified as it is read. For CSO images, every block must decompress to
/// exactly the block size.
#[derive(Debug, Parser)]
pub struct VerifyCli {
    /// Path to input disc image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,
}
