//! Borrowed view over the render block and spectrum rings.

use crate::block::Block;
use crate::block_buffer::BlockBuffer;
use crate::common::FFT_LENGTH_BY_2_PLUS_1;
use crate::spectrum_buffer::SpectrumBuffer;

/// Read access to the render history around the read cursor.
///
/// Positive offsets address older data, negative offsets newer data.
#[derive(Debug, Clone, Copy)]
pub struct RenderBuffer<'a> {
    block_buffer: &'a BlockBuffer,
    spectrum_buffer: &'a SpectrumBuffer,
}

impl<'a> RenderBuffer<'a> {
    pub fn new(block_buffer: &'a BlockBuffer, spectrum_buffer: &'a SpectrumBuffer) -> Self {
        debug_assert_eq!(block_buffer.buffer.len(), spectrum_buffer.buffer.len());
        debug_assert_eq!(block_buffer.index.read, spectrum_buffer.index.read);
        Self {
            block_buffer,
            spectrum_buffer,
        }
    }

    /// Block located `buffer_offset_blocks` slots from the read cursor.
    pub fn block(&self, buffer_offset_blocks: i32) -> &'a Block {
        let index = &self.block_buffer.index;
        &self.block_buffer.buffer[index.offset_index(index.read, buffer_offset_blocks)]
    }

    /// Per-channel spectra located `buffer_offset_ffts` slots from the read
    /// cursor.
    pub fn spectrum(&self, buffer_offset_ffts: i32) -> &'a [[f32; FFT_LENGTH_BY_2_PLUS_1]] {
        let index = &self.spectrum_buffer.index;
        &self.spectrum_buffer.buffer[index.offset_index(index.read, buffer_offset_ffts)]
    }

    pub fn block_buffer(&self) -> &'a BlockBuffer {
        self.block_buffer
    }

    pub fn spectrum_buffer(&self) -> &'a SpectrumBuffer {
        self.spectrum_buffer
    }

    /// Number of slots between the write and read cursors, i.e. how many
    /// blocks ahead of the read position have already been buffered.
    pub fn headroom(&self) -> usize {
        let index = &self.spectrum_buffer.index;
        if index.write < index.read {
            index.read - index.write
        } else {
            index.size - index.write + index.read
        }
    }
}
