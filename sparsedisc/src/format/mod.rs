/*
 * SPDX-FileCopyrightText: 2025 The sparsedisc Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod blockmap;
pub mod ciso;
pub mod cso;
pub mod gcz;
pub mod nasos;
pub mod padding;
pub mod sparse;
pub mod wux;

/// Upper bound on the logical size of any disc image.
pub const MAX_DISC_SIZE: u64 = 50 * 1024 * 1024 * 1024;
