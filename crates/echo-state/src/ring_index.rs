//! Read/write cursors over a fixed-size ring.
//!
//! Writers move backwards through the ring, so the slot after the write
//! cursor (`inc_index`) holds older data and negative offsets point towards
//! newer data.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingIndex {
    pub size: usize,
    pub write: usize,
    pub read: usize,
}

impl RingIndex {
    pub fn new(size: usize) -> Self {
        debug_assert!(size > 0);
        Self {
            size,
            write: 0,
            read: 0,
        }
    }

    pub fn inc_index(&self, index: usize) -> usize {
        debug_assert!(index < self.size);
        if index + 1 < self.size { index + 1 } else { 0 }
    }

    pub fn dec_index(&self, index: usize) -> usize {
        debug_assert!(index < self.size);
        if index > 0 { index - 1 } else { self.size - 1 }
    }

    /// Moves `index` by `offset` slots, wrapping in both directions.
    pub fn offset_index(&self, index: usize, offset: i32) -> usize {
        debug_assert!(index < self.size);
        let size = self.size as i64;
        (index as i64 + offset as i64).rem_euclid(size) as usize
    }

    pub fn inc_write(&mut self) {
        self.write = self.inc_index(self.write);
    }

    pub fn dec_write(&mut self) {
        self.write = self.dec_index(self.write);
    }

    pub fn update_write(&mut self, offset: i32) {
        self.write = self.offset_index(self.write, offset);
    }

    pub fn inc_read(&mut self) {
        self.read = self.inc_index(self.read);
    }

    pub fn dec_read(&mut self) {
        self.read = self.dec_index(self.read);
    }

    pub fn update_read(&mut self, offset: i32) {
        self.read = self.offset_index(self.read, offset);
    }
}
