//! Ring of time-domain render blocks.

use crate::block::Block;
use crate::ring_index::RingIndex;

#[derive(Debug, Clone)]
pub struct BlockBuffer {
    pub index: RingIndex,
    pub buffer: Vec<Block>,
}

impl BlockBuffer {
    pub fn new(size: usize, num_bands: usize, num_channels: usize) -> Self {
        Self {
            index: RingIndex::new(size),
            buffer: (0..size).map(|_| Block::new(num_bands, num_channels)).collect(),
        }
    }

    /// Stores `block` as the newest entry. Both cursors step back one slot so
    /// the distance between them is preserved.
    pub fn insert(&mut self, block: &Block) {
        self.index.dec_write();
        self.index.dec_read();
        self.buffer[self.index.write].copy_from(block);
    }
}
