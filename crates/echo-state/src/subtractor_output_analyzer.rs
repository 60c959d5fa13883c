//! Convergence and divergence classification of one channel's filters.

use crate::common::BLOCK_SIZE;
use crate::subtractor_output::SubtractorOutput;

const CONVERGENCE_THRESHOLD: f32 = 50.0 * 50.0 * BLOCK_SIZE as f32;
const DIVERGENCE_THRESHOLD: f32 = 30.0 * 30.0 * BLOCK_SIZE as f32;

#[derive(Debug, Default)]
pub(crate) struct SubtractorOutputAnalyzer {
    main_filter_converged: bool,
    shadow_filter_converged: bool,
    filter_diverged: bool,
}

impl SubtractorOutputAnalyzer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update(&mut self, output: &SubtractorOutput) {
        let y2 = output.y2;
        let e2_main = output.e2_main_sum;
        let e2_shadow = output.e2_shadow_sum;

        self.main_filter_converged = e2_main < 0.5 * y2 && y2 > CONVERGENCE_THRESHOLD;
        self.shadow_filter_converged = e2_shadow < 0.05 * y2 && y2 > CONVERGENCE_THRESHOLD;
        self.filter_diverged = e2_main.min(e2_shadow) > 1.5 * y2 && y2 > DIVERGENCE_THRESHOLD;
    }

    pub(crate) fn converged_filter(&self) -> bool {
        self.main_filter_converged || self.shadow_filter_converged
    }

    pub(crate) fn diverged_filter(&self) -> bool {
        self.filter_diverged
    }

    pub(crate) fn handle_echo_path_change(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(y2: f32, e2_main: f32, e2_shadow: f32) -> SubtractorOutput {
        SubtractorOutput {
            y2,
            e2_main_sum: e2_main,
            e2_shadow_sum: e2_shadow,
            ..Default::default()
        }
    }

    #[test]
    fn starts_unconverged() {
        let analyzer = SubtractorOutputAnalyzer::new();
        assert!(!analyzer.converged_filter());
        assert!(!analyzer.diverged_filter());
    }

    #[test]
    fn main_filter_converges_on_half_residual() {
        let mut analyzer = SubtractorOutputAnalyzer::new();
        analyzer.update(&output(200_000.0, 90_000.0, 200_000.0));
        assert!(analyzer.converged_filter());
        assert!(!analyzer.diverged_filter());
    }

    #[test]
    fn shadow_filter_needs_deep_cancellation() {
        let mut analyzer = SubtractorOutputAnalyzer::new();
        analyzer.update(&output(200_000.0, 200_000.0, 20_000.0));
        assert!(!analyzer.converged_filter());
        analyzer.update(&output(200_000.0, 200_000.0, 9_000.0));
        assert!(analyzer.converged_filter());
    }

    #[test]
    fn weak_capture_never_converges() {
        let mut analyzer = SubtractorOutputAnalyzer::new();
        analyzer.update(&output(CONVERGENCE_THRESHOLD, 0.0, 0.0));
        assert!(!analyzer.converged_filter());
    }

    #[test]
    fn divergence_needs_both_filters_worse_than_capture() {
        let mut analyzer = SubtractorOutputAnalyzer::new();
        analyzer.update(&output(100_000.0, 200_000.0, 100_000.0));
        assert!(!analyzer.diverged_filter());
        analyzer.update(&output(100_000.0, 200_000.0, 160_000.0));
        assert!(analyzer.diverged_filter());
    }

    #[test]
    fn echo_path_change_clears_flags() {
        let mut analyzer = SubtractorOutputAnalyzer::new();
        analyzer.update(&output(200_000.0, 10.0, 10.0));
        assert!(analyzer.converged_filter());
        analyzer.handle_echo_path_change();
        assert!(!analyzer.converged_filter());
        assert!(!analyzer.diverged_filter());
    }
}
