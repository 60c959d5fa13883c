//! Startup phase detection.

use crate::common::NUM_BLOCKS_PER_SECOND;
use crate::config::EchoStateConfig;

/// Startup duration, in active render blocks, used with a conservative
/// initial phase.
const CONSERVATIVE_INITIAL_PHASE_BLOCKS: usize = 5 * NUM_BLOCKS_PER_SECOND;

/// Tracks whether the canceller is still in its startup phase, measured in
/// blocks of active render without capture saturation.
#[derive(Debug)]
pub(crate) struct InitialState {
    conservative_initial_phase: bool,
    initial_state_seconds: f32,
    initial_state_active: bool,
    transition_triggered: bool,
    strong_not_saturated_render_blocks: usize,
}

impl InitialState {
    pub(crate) fn new(config: &EchoStateConfig) -> Self {
        Self {
            conservative_initial_phase: config.filter.conservative_initial_phase,
            initial_state_seconds: config.filter.initial_state_seconds,
            initial_state_active: true,
            transition_triggered: false,
            strong_not_saturated_render_blocks: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.initial_state_active = true;
        self.strong_not_saturated_render_blocks = 0;
    }

    pub(crate) fn update(&mut self, active_render: bool, saturated_capture: bool) {
        if active_render && !saturated_capture {
            self.strong_not_saturated_render_blocks += 1;
        }

        let prev_initial_state = self.initial_state_active;
        self.initial_state_active = if self.conservative_initial_phase {
            self.strong_not_saturated_render_blocks < CONSERVATIVE_INITIAL_PHASE_BLOCKS
        } else {
            (self.strong_not_saturated_render_blocks as f32)
                < self.initial_state_seconds * NUM_BLOCKS_PER_SECOND as f32
        };
        self.transition_triggered = !self.initial_state_active && prev_initial_state;
    }

    pub(crate) fn initial_state_active(&self) -> bool {
        self.initial_state_active
    }

    /// Set on the single update where the startup phase ended.
    pub(crate) fn transition_triggered(&self) -> bool {
        self.transition_triggered
    }
}

#[cfg(test)]
mod tests {
    use proptest::arbitrary::any;
    use proptest::collection::vec;
    use test_strategy::proptest;

    use super::*;

    #[test]
    fn stays_active_below_threshold_and_transitions_once() {
        let config = EchoStateConfig::default();
        let threshold = (config.filter.initial_state_seconds * NUM_BLOCKS_PER_SECOND as f32) as usize;
        let mut state = InitialState::new(&config);

        for _ in 0..threshold - 1 {
            state.update(true, false);
            assert!(state.initial_state_active());
            assert!(!state.transition_triggered());
        }

        state.update(true, false);
        assert!(!state.initial_state_active());
        assert!(state.transition_triggered());

        state.update(true, false);
        assert!(!state.initial_state_active());
        assert!(!state.transition_triggered());
    }

    #[test]
    fn saturated_or_inactive_blocks_do_not_count() {
        let config = EchoStateConfig::default();
        let mut state = InitialState::new(&config);
        for _ in 0..10_000 {
            state.update(false, false);
            state.update(true, true);
        }
        assert!(state.initial_state_active());
    }

    #[test]
    fn conservative_phase_lasts_five_seconds() {
        let mut config = EchoStateConfig::default();
        config.filter.conservative_initial_phase = true;
        config.filter.initial_state_seconds = 0.1;
        let mut state = InitialState::new(&config);
        for _ in 0..CONSERVATIVE_INITIAL_PHASE_BLOCKS - 1 {
            state.update(true, false);
        }
        assert!(state.initial_state_active());
        state.update(true, false);
        assert!(state.transition_triggered());
    }

    #[test]
    fn reset_reactivates() {
        let mut config = EchoStateConfig::default();
        config.filter.initial_state_seconds = 0.0;
        let mut state = InitialState::new(&config);
        state.update(false, false);
        assert!(!state.initial_state_active());
        state.reset();
        assert!(state.initial_state_active());
    }

    #[proptest]
    fn transition_fires_exactly_once(
        #[strategy(0.0f32..4.0)] seconds: f32,
        #[strategy(vec(any::<bool>(), 0..1500))] activity: Vec<bool>,
    ) {
        let mut config = EchoStateConfig::default();
        config.filter.initial_state_seconds = seconds;
        let mut state = InitialState::new(&config);
        let mut transitions = 0;
        let mut was_active = true;
        for active in activity {
            state.update(active, false);
            if state.transition_triggered() {
                transitions += 1;
                assert!(was_active);
            }
            assert!(was_active || !state.initial_state_active());
            was_active = state.initial_state_active();
        }
        assert!(transitions <= 1);
        assert_eq!(transitions == 1, !was_active);
    }
}
