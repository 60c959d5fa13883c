//! Detection of echo paths where the linear filter cannot be trusted, such as
//! headsets with no acoustic coupling, in which case echo removal is turned
//! off.

use crate::common::NUM_BLOCKS_PER_SECOND;
use crate::config::EchoStateConfig;

/// Initial value of the block counters that measure time since a converged
/// filter or a sane filter was last seen.
const BLOCKS_SINCE_CONVERGED_FILTER_INIT: usize = 10000;
const BLOCKS_SINCE_CONSISTENT_ESTIMATE_INIT: usize = 10000;

/// Blocks that must all report a diverged filter before convergence is
/// considered lost.
const DIVERGED_BLOCKS_TO_FORGET_CONVERGENCE: usize = 60;

/// Filter and render observations for one block.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FilterObservation {
    pub(crate) filter_delay_blocks: i32,
    pub(crate) any_filter_consistent: bool,
    pub(crate) any_filter_converged: bool,
    pub(crate) all_filters_diverged: bool,
    pub(crate) active_render: bool,
    pub(crate) saturated_capture: bool,
}

/// Counter based transparent mode classifier.
///
/// Transparency is enabled once there has been plenty of strong render
/// without the filter ever showing a finite ERL, and disabled again as soon
/// as a sane, converged filter is observed.
#[derive(Debug)]
pub(crate) struct TransparentMode {
    bounded_erl: bool,
    linear_and_stable_echo_path: bool,
    capture_block_counter: usize,
    strong_not_saturated_render_blocks: usize,
    sane_filter_observed: bool,
    active_blocks_since_sane_filter: usize,
    non_converged_sequence_size: usize,
    diverged_sequence_size: usize,
    active_non_converged_sequence_size: usize,
    recent_convergence_during_activity: bool,
    num_converged_blocks: usize,
    finite_erl_recently_detected: bool,
    transparency_activated: bool,
}

impl TransparentMode {
    pub(crate) fn new(config: &EchoStateConfig) -> Self {
        Self {
            bounded_erl: config.ep_strength.bounded_erl,
            linear_and_stable_echo_path: config.echo_removal_control.linear_and_stable_echo_path,
            capture_block_counter: 0,
            strong_not_saturated_render_blocks: 0,
            sane_filter_observed: false,
            active_blocks_since_sane_filter: BLOCKS_SINCE_CONSISTENT_ESTIMATE_INIT,
            non_converged_sequence_size: BLOCKS_SINCE_CONVERGED_FILTER_INIT,
            diverged_sequence_size: 0,
            active_non_converged_sequence_size: 0,
            recent_convergence_during_activity: false,
            num_converged_blocks: 0,
            finite_erl_recently_detected: false,
            transparency_activated: false,
        }
    }

    pub(crate) fn active(&self) -> bool {
        self.transparency_activated
    }

    /// Forgets the convergence history after an echo path change. The sane
    /// filter history and block counters survive.
    pub(crate) fn reset(&mut self) {
        self.non_converged_sequence_size = BLOCKS_SINCE_CONVERGED_FILTER_INIT;
        self.diverged_sequence_size = 0;
        self.strong_not_saturated_render_blocks = 0;
        if self.linear_and_stable_echo_path {
            self.recent_convergence_during_activity = false;
        }
    }

    pub(crate) fn update(&mut self, observation: &FilterObservation) {
        self.capture_block_counter += 1;
        if observation.active_render && !observation.saturated_capture {
            self.strong_not_saturated_render_blocks += 1;
        }

        if observation.any_filter_consistent && observation.filter_delay_blocks < 5 {
            self.sane_filter_observed = true;
            self.active_blocks_since_sane_filter = 0;
        } else if observation.active_render {
            self.active_blocks_since_sane_filter += 1;
        }

        let sane_filter_recently_seen = if self.sane_filter_observed {
            self.active_blocks_since_sane_filter <= 30 * NUM_BLOCKS_PER_SECOND
        } else {
            self.capture_block_counter <= 5 * NUM_BLOCKS_PER_SECOND
        };

        if observation.any_filter_converged {
            self.recent_convergence_during_activity = true;
            self.active_non_converged_sequence_size = 0;
            self.non_converged_sequence_size = 0;
            self.num_converged_blocks += 1;
        } else {
            self.non_converged_sequence_size += 1;
            if self.non_converged_sequence_size > 20 * NUM_BLOCKS_PER_SECOND {
                self.num_converged_blocks = 0;
            }

            if observation.active_render {
                self.active_non_converged_sequence_size += 1;
                if self.active_non_converged_sequence_size > 60 * NUM_BLOCKS_PER_SECOND {
                    self.recent_convergence_during_activity = false;
                }
            }
        }

        if observation.all_filters_diverged {
            self.diverged_sequence_size += 1;
            if self.diverged_sequence_size >= DIVERGED_BLOCKS_TO_FORGET_CONVERGENCE {
                self.non_converged_sequence_size = BLOCKS_SINCE_CONVERGED_FILTER_INIT;
            }
        } else {
            self.diverged_sequence_size = 0;
        }

        if self.active_non_converged_sequence_size > 60 * NUM_BLOCKS_PER_SECOND {
            self.finite_erl_recently_detected = false;
        }
        if self.num_converged_blocks > 50 {
            self.finite_erl_recently_detected = true;
        }

        self.transparency_activated = if self.bounded_erl
            || self.finite_erl_recently_detected
            || (sane_filter_recently_seen && self.recent_convergence_during_activity)
        {
            false
        } else {
            self.strong_not_saturated_render_blocks > 6 * NUM_BLOCKS_PER_SECOND
        };
    }
}
