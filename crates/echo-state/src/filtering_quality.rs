//! Gate on whether the linear filter output is good enough to be used.

use crate::common::NUM_BLOCKS_PER_SECOND;
use crate::delay_estimate::DelayEstimate;

#[derive(Debug, Default)]
pub(crate) struct FilteringQualityAnalyzer {
    usable_linear_estimate: bool,
    filter_update_blocks_since_reset: usize,
    filter_update_blocks_since_start: usize,
    convergence_seen: bool,
}

impl FilteringQualityAnalyzer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Only the since-reset counter is cleared, so a restart after an echo
    /// path change needs less adaptation than the first start.
    pub(crate) fn reset(&mut self) {
        self.usable_linear_estimate = false;
        self.filter_update_blocks_since_reset = 0;
    }

    pub(crate) fn update(
        &mut self,
        active_render: bool,
        transparent_mode: bool,
        saturated_capture: bool,
        external_delay: Option<&DelayEstimate>,
        any_filter_converged: bool,
    ) {
        let filter_update = active_render && !saturated_capture;
        if filter_update {
            self.filter_update_blocks_since_start += 1;
            self.filter_update_blocks_since_reset += 1;
        }

        self.convergence_seen |= any_filter_converged;

        let sufficient_data_to_converge_at_startup =
            self.filter_update_blocks_since_start as f32 > NUM_BLOCKS_PER_SECOND as f32 * 0.4;
        let sufficient_data_to_converge_at_reset =
            self.filter_update_blocks_since_reset as f32 > NUM_BLOCKS_PER_SECOND as f32 * 0.2;

        self.usable_linear_estimate = sufficient_data_to_converge_at_startup
            && sufficient_data_to_converge_at_reset
            && (external_delay.is_some() || self.convergence_seen)
            && !transparent_mode;
    }

    pub(crate) fn linear_filter_output_usable(&self) -> bool {
        self.usable_linear_estimate
    }
}
