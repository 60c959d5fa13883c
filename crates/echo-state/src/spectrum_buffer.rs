//! Ring of per-channel render power spectra.

use crate::common::FFT_LENGTH_BY_2_PLUS_1;
use crate::ring_index::RingIndex;

#[derive(Debug, Clone)]
pub struct SpectrumBuffer {
    pub index: RingIndex,
    /// `buffer[slot][channel][bin]`.
    pub buffer: Vec<Vec<[f32; FFT_LENGTH_BY_2_PLUS_1]>>,
}

impl SpectrumBuffer {
    pub fn new(size: usize, num_channels: usize) -> Self {
        Self {
            index: RingIndex::new(size),
            buffer: vec![vec![[0.0; FFT_LENGTH_BY_2_PLUS_1]; num_channels]; size],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.buffer[0].len()
    }

    /// Stores one spectrum per channel as the newest entry, stepping both
    /// cursors back one slot.
    pub fn insert(&mut self, spectra: &[[f32; FFT_LENGTH_BY_2_PLUS_1]]) {
        debug_assert_eq!(spectra.len(), self.num_channels());
        self.index.dec_write();
        self.index.dec_read();
        self.buffer[self.index.write].copy_from_slice(spectra);
    }
}
