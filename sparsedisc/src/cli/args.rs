/*
 * SPDX-FileCopyrightText: 2025 The sparsedisc Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::cli::{completion, disc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Detect(disc::DetectCli),
    Info(disc::InfoCli),
    Map(disc::MapCli),
    Unpack(disc::UnpackCli),
    Dump(disc::DumpCli),
    Verify(disc::VerifyCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value_t, value_enum)]
    pub log_level: LogLevel,

    /// Don't print image metadata.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

fn init_logging(log_level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_max_level(Level::from(log_level))
        .init();
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level);
    logging_initialized.store(true, Ordering::SeqCst);

    match &cli.command {
        Command::Detect(c) => disc::detect_subcommand(c),
        Command::Info(c) => disc::info_subcommand(&cli, c),
        Command::Map(c) => disc::map_subcommand(&cli, c),
        Command::Unpack(c) => disc::unpack_subcommand(&cli, c, cancel_signal),
        Command::Dump(c) => disc::dump_subcommand(c, cancel_signal),
        Command::Verify(c) => disc::verify_subcommand(&cli, c, cancel_signal),
        Command::Completion(c) => completion::completion_main(c),
    }
}
