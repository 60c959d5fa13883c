//! External render/capture delay estimate.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayEstimateQuality {
    Coarse,
    Refined,
}

/// Delay reported by the render delay controller, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayEstimate {
    pub quality: DelayEstimateQuality,
    pub delay: usize,
    pub blocks_since_last_change: usize,
    pub blocks_since_last_update: usize,
}

impl DelayEstimate {
    pub fn new(quality: DelayEstimateQuality, delay: usize) -> Self {
        Self {
            quality,
            delay,
            blocks_since_last_change: 0,
            blocks_since_last_update: 0,
        }
    }
}
