// SPDX-FileCopyrightText: 2025 The sparsedisc Authors
// SPDX-License-Identifier: GPL-3.0-only

use num_traits::PrimInt;

/// Calculate the amount of padding that needs to be added to align the
/// specified offset to a block boundary.
pub fn calc<N: PrimInt>(offset: N, block_size: N) -> N {
    let r = offset % block_size;
    if r == N::zero() {
        N::zero()
    } else {
        block_size - r
    }
}

/// Round up to the next multiple of the block size.
pub fn round<N: PrimInt>(offset: N, block_size: N) -> Option<N> {
    let remain = calc(offset, block_size);
    offset.checked_add(&remain)
}

/// Number of blocks needed to hold `size` bytes.
pub fn block_count<N: PrimInt>(size: N, block_size: N) -> Option<N> {
    round(size, block_size).map(|s| s / block_size)
}

/// Check that `value` is a power of two within `min..=max`.
pub fn is_pow2_in_range(value: u32, min: u32, max: u32) -> bool {
    value.is_power_of_two() && (min..=max).contains(&value)
}
