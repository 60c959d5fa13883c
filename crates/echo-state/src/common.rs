//! Shared constants and small numeric helpers.

/// Number of 64-sample blocks processed per second at 16 kHz.
pub const NUM_BLOCKS_PER_SECOND: usize = 250;

pub const FFT_LENGTH_BY_2: usize = 64;
pub const FFT_LENGTH_BY_2_PLUS_1: usize = FFT_LENGTH_BY_2 + 1;
pub(crate) const FFT_LENGTH_BY_2_MINUS_1: usize = FFT_LENGTH_BY_2 - 1;
pub(crate) const FFT_LENGTH_BY_2_LOG2: usize = 6;

/// Samples per channel and band in one block.
pub const BLOCK_SIZE: usize = FFT_LENGTH_BY_2;
pub(crate) const BLOCK_SIZE_LOG2: usize = FFT_LENGTH_BY_2_LOG2;

/// Render power per bin below which a band counts as weakly excited
/// (white noise at about -46 dBFS).
pub(crate) const X2_BAND_ENERGY_THRESHOLD: f32 = 44015068.0;

/// Blocks an ERLE update is held before onset tracking may lower it again.
pub(crate) const BLOCKS_TO_HOLD_ERLE: i32 = 100;

/// Number of time-domain coefficients of a filter with the given number of
/// partitions.
pub(crate) const fn time_domain_length(filter_length_blocks: usize) -> usize {
    filter_length_blocks * FFT_LENGTH_BY_2
}

/// Bit-trick approximation of `log2(input)` for positive inputs.
pub(crate) fn fast_approx_log2f(input: f32) -> f32 {
    debug_assert!(input > 0.0);
    input.to_bits() as f32 * 1.1920929e-7 - 126.942695
}

pub fn log2_to_db(in_log2: f32) -> f32 {
    3.0102999566398121 * in_log2
}
