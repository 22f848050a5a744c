/*
 * SPDX-FileCopyrightText: 2025 The sparsedisc Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Readers for sparse and compressed GameCube, Wii, and Wii U disc images.
//!
//! The semver versioning covers the CLI only. The CLI source files use
//! concrete types wherever possible for simplicity, while the library source
//! files aim to be generic over [`std::io::Read`] and [`std::io::Seek`].

pub mod cli;
pub mod format;
pub mod stream;
pub mod util;
