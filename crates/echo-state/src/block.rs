//! Multi-band, multi-channel audio block.

use crate::common::BLOCK_SIZE;

/// One block of audio, stored as `[band][channel][BLOCK_SIZE]` in a single
/// contiguous allocation.
#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct Block {
    num_bands: usize,
    num_channels: usize,
    #[debug(skip)]
    data: Vec<f32>,
}

impl Block {
    /// Creates a zeroed block.
    pub fn new(num_bands: usize, num_channels: usize) -> Self {
        Self::new_with_value(num_bands, num_channels, 0.0)
    }

    /// Creates a block where every sample equals `value`.
    pub fn new_with_value(num_bands: usize, num_channels: usize, value: f32) -> Self {
        debug_assert!(num_bands > 0);
        debug_assert!(num_channels > 0);
        Self {
            num_bands,
            num_channels,
            data: vec![value; num_bands * num_channels * BLOCK_SIZE],
        }
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Samples of one band and channel.
    pub fn view(&self, band: usize, channel: usize) -> &[f32] {
        let start = self.offset(band, channel);
        &self.data[start..start + BLOCK_SIZE]
    }

    pub fn view_mut(&mut self, band: usize, channel: usize) -> &mut [f32] {
        let start = self.offset(band, channel);
        &mut self.data[start..start + BLOCK_SIZE]
    }

    /// Iterates over the channels of one band.
    pub fn band(&self, band: usize) -> impl Iterator<Item = &[f32]> {
        debug_assert!(band < self.num_bands);
        let start = band * self.num_channels * BLOCK_SIZE;
        self.data[start..start + self.num_channels * BLOCK_SIZE].chunks_exact(BLOCK_SIZE)
    }

    /// Copies samples and layout from `other` without reallocating when the
    /// shapes already agree.
    pub fn copy_from(&mut self, other: &Self) {
        self.num_bands = other.num_bands;
        self.num_channels = other.num_channels;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    fn offset(&self, band: usize, channel: usize) -> usize {
        debug_assert!(band < self.num_bands);
        debug_assert!(channel < self.num_channels);
        (band * self.num_channels + channel) * BLOCK_SIZE
    }
}
