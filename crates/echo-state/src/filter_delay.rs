//! Selection of the direct-path delay used by the rest of the state.

use crate::common::{BLOCK_SIZE, NUM_BLOCKS_PER_SECOND};
use crate::config::EchoStateConfig;
use crate::delay_estimate::DelayEstimate;
use crate::filter_analyzer::FilterAnalyzer;

/// Until the filters have adapted this long, a reported external delay means
/// the render buffer is aligned and only the headroom separates the signals.
const MIN_BLOCKS_WITH_PROPER_ADAPTATION: usize = 2 * NUM_BLOCKS_PER_SECOND;

#[derive(Debug)]
pub(crate) struct FilterDelay {
    delay_headroom_blocks: i32,
    external_delay_reported: bool,
    filter_delay_blocks: i32,
    external_delay: Option<DelayEstimate>,
}

impl FilterDelay {
    pub(crate) fn new(config: &EchoStateConfig) -> Self {
        Self {
            delay_headroom_blocks: (config.delay.delay_headroom_samples / BLOCK_SIZE) as i32,
            external_delay_reported: false,
            filter_delay_blocks: 0,
            external_delay: None,
        }
    }

    pub(crate) fn update(
        &mut self,
        filter_analyzers: &[FilterAnalyzer],
        external_delay: Option<&DelayEstimate>,
        blocks_with_proper_filter_adaptation: usize,
    ) {
        if let Some(delay) = external_delay
            && self.external_delay.is_none_or(|d| d.delay != delay.delay)
        {
            self.external_delay = Some(*delay);
            self.external_delay_reported = true;
        }

        self.filter_delay_blocks = if blocks_with_proper_filter_adaptation
            < MIN_BLOCKS_WITH_PROPER_ADAPTATION
            && self.external_delay.is_some()
        {
            self.delay_headroom_blocks
        } else {
            filter_analyzers
                .iter()
                .map(FilterAnalyzer::delay_blocks)
                .min()
                .unwrap_or(0)
        };
    }

    /// Direct-path delay in blocks.
    pub(crate) fn direct_path_filter_delay(&self) -> i32 {
        self.filter_delay_blocks
    }

    /// Whether an external delay has ever been reported.
    pub(crate) fn external_delay_reported(&self) -> bool {
        self.external_delay_reported
    }
}
