/*
 * SPDX-FileCopyrightText: 2025 The sparsedisc Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod args;
pub mod completion;
pub mod disc;
