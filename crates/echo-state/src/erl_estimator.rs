//! Echo Return Loss (ERL) estimation using maximum statistics on the
//! capture to render power ratio.

use crate::common::{
    FFT_LENGTH_BY_2, FFT_LENGTH_BY_2_MINUS_1, FFT_LENGTH_BY_2_PLUS_1, X2_BAND_ENERGY_THRESHOLD,
};

const MIN_ERL: f32 = 0.01;
const MAX_ERL: f32 = 1000.0;
const HOLD_BLOCKS: i32 = 1000;

#[derive(Debug)]
pub(crate) struct ErlEstimator {
    startup_phase_length_blocks: usize,
    erl: [f32; FFT_LENGTH_BY_2_PLUS_1],
    hold_counters: [i32; FFT_LENGTH_BY_2_MINUS_1],
    erl_time_domain: f32,
    hold_counter_time_domain: i32,
    blocks_since_reset: usize,
}

impl ErlEstimator {
    pub(crate) fn new(startup_phase_length_blocks: usize) -> Self {
        Self {
            startup_phase_length_blocks,
            erl: [MAX_ERL; FFT_LENGTH_BY_2_PLUS_1],
            hold_counters: [0; FFT_LENGTH_BY_2_MINUS_1],
            erl_time_domain: MAX_ERL,
            hold_counter_time_domain: 0,
            blocks_since_reset: 0,
        }
    }

    /// Restarts the startup phase. The estimates themselves are kept.
    pub(crate) fn reset(&mut self) {
        self.blocks_since_reset = 0;
    }

    pub(crate) fn update(
        &mut self,
        converged_filter: bool,
        x2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        y2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
    ) {
        self.blocks_since_reset += 1;
        if self.blocks_since_reset < self.startup_phase_length_blocks || !converged_filter {
            return;
        }

        for k in 1..FFT_LENGTH_BY_2 {
            if x2[k] > X2_BAND_ENERGY_THRESHOLD {
                let new_erl = y2[k] / x2[k];
                if new_erl < self.erl[k] {
                    self.hold_counters[k - 1] = HOLD_BLOCKS;
                    self.erl[k] += 0.1 * (new_erl - self.erl[k]);
                    self.erl[k] = self.erl[k].max(MIN_ERL);
                }
            }
        }

        for (erl, counter) in self.erl[1..FFT_LENGTH_BY_2]
            .iter_mut()
            .zip(self.hold_counters.iter_mut())
        {
            *counter -= 1;
            if *counter <= 0 {
                *erl = MAX_ERL.min(2.0 * *erl);
            }
        }

        self.erl[0] = self.erl[1];
        self.erl[FFT_LENGTH_BY_2] = self.erl[FFT_LENGTH_BY_2 - 1];

        let x2_sum: f32 = x2.iter().sum();
        if x2_sum > X2_BAND_ENERGY_THRESHOLD * FFT_LENGTH_BY_2_PLUS_1 as f32 {
            let y2_sum: f32 = y2.iter().sum();
            let new_erl = y2_sum / x2_sum;
            if new_erl < self.erl_time_domain {
                self.hold_counter_time_domain = HOLD_BLOCKS;
                self.erl_time_domain += 0.1 * (new_erl - self.erl_time_domain);
                self.erl_time_domain = self.erl_time_domain.max(MIN_ERL);
            }
        }

        self.hold_counter_time_domain -= 1;
        if self.hold_counter_time_domain <= 0 {
            self.erl_time_domain = MAX_ERL.min(2.0 * self.erl_time_domain);
        }
    }

    pub(crate) fn erl(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        &self.erl
    }

    pub(crate) fn erl_time_domain(&self) -> f32 {
        self.erl_time_domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_erl(erl: &[f32; FFT_LENGTH_BY_2_PLUS_1], erl_time_domain: f32, reference: f32) {
        for &v in erl {
            assert!((v - reference).abs() < 0.001, "{v} != {reference}");
        }
        assert!((erl_time_domain - reference).abs() < 0.001);
    }

    #[test]
    fn converges_and_releases() {
        let mut estimator = ErlEstimator::new(0);
        let x2 = [500.0 * 1000.0 * 1000.0; FFT_LENGTH_BY_2_PLUS_1];
        let mut y2 = [10.0 * x2[0]; FFT_LENGTH_BY_2_PLUS_1];

        for _ in 0..200 {
            estimator.update(true, &x2, &y2);
        }
        verify_erl(estimator.erl(), estimator.erl_time_domain(), 10.0);

        // Higher ratios are not adopted while the hold is active.
        y2 = [10000.0 * x2[0]; FFT_LENGTH_BY_2_PLUS_1];
        for _ in 0..998 {
            estimator.update(true, &x2, &y2);
        }
        verify_erl(estimator.erl(), estimator.erl_time_domain(), 10.0);

        // The estimate doubles per block once the hold runs out.
        estimator.update(true, &x2, &y2);
        verify_erl(estimator.erl(), estimator.erl_time_domain(), 20.0);

        for _ in 0..1000 {
            estimator.update(true, &x2, &y2);
        }
        verify_erl(estimator.erl(), estimator.erl_time_domain(), MAX_ERL);

        // Weak render does not update the estimate.
        let x2_weak = [1000.0 * 1000.0; FFT_LENGTH_BY_2_PLUS_1];
        y2 = [10.0 * x2_weak[0]; FFT_LENGTH_BY_2_PLUS_1];
        for _ in 0..200 {
            estimator.update(true, &x2_weak, &y2);
        }
        verify_erl(estimator.erl(), estimator.erl_time_domain(), MAX_ERL);
    }

    #[test]
    fn ignores_blocks_during_startup_and_without_convergence() {
        let mut estimator = ErlEstimator::new(10);
        let x2 = [500.0 * 1000.0 * 1000.0; FFT_LENGTH_BY_2_PLUS_1];
        let y2 = [x2[0]; FFT_LENGTH_BY_2_PLUS_1];
        for _ in 0..9 {
            estimator.update(true, &x2, &y2);
        }
        assert_eq!(estimator.erl_time_domain(), MAX_ERL);
        for _ in 0..100 {
            estimator.update(false, &x2, &y2);
        }
        assert_eq!(estimator.erl_time_domain(), MAX_ERL);
        estimator.update(true, &x2, &y2);
        assert!(estimator.erl_time_domain() < MAX_ERL);

        estimator.reset();
        let erl = estimator.erl_time_domain();
        estimator.update(true, &x2, &y2);
        assert_eq!(estimator.erl_time_domain(), erl);
    }
}
