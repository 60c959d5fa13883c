//! Description of a change in the echo path between two blocks.

/// Kind of render/capture alignment change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayAdjustment {
    #[default]
    None,
    BufferFlush,
    NewDetectedDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoPathVariability {
    pub gain_change: bool,
    pub delay_change: DelayAdjustment,
    pub clock_drift: bool,
}

impl EchoPathVariability {
    pub fn new(gain_change: bool, delay_change: DelayAdjustment, clock_drift: bool) -> Self {
        Self {
            gain_change,
            delay_change,
            clock_drift,
        }
    }

    /// True when either the gain or the alignment of the path changed.
    pub fn audio_path_changed(&self) -> bool {
        self.gain_change || self.delay_change != DelayAdjustment::None
    }
}
