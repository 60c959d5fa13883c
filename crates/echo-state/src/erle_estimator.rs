//! Echo Return Loss Enhancement (ERLE) estimation.
//!
//! One estimate is done per subband and another one on the energy summed over
//! all subbands. The fullband estimator also tracks how well the linear filter
//! currently performs relative to its recent best and worst, which the reverb
//! model uses as a confidence weight.

use crate::common::{
    BLOCKS_TO_HOLD_ERLE, FFT_LENGTH_BY_2, FFT_LENGTH_BY_2_PLUS_1, X2_BAND_ENERGY_THRESHOLD,
    fast_approx_log2f,
};
use crate::config::EchoStateConfig;
use crate::data_dumper::DataDumper;

const BLOCKS_FOR_ONSET_DETECTION: i32 = BLOCKS_TO_HOLD_ERLE + 150;
const POINTS_TO_ACCUMULATE: i32 = 6;
const EPSILON: f32 = 1e-3;

fn set_max_erle_bands(max_erle_l: f32, max_erle_h: f32) -> [f32; FFT_LENGTH_BY_2_PLUS_1] {
    let mut max_erle = [0.0f32; FFT_LENGTH_BY_2_PLUS_1];
    max_erle[..FFT_LENGTH_BY_2 / 2].fill(max_erle_l);
    max_erle[FFT_LENGTH_BY_2 / 2..].fill(max_erle_h);
    max_erle
}

#[derive(Debug)]
struct AccumulatedSpectra {
    y2: [f32; FFT_LENGTH_BY_2_PLUS_1],
    e2: [f32; FFT_LENGTH_BY_2_PLUS_1],
    low_render_energy: [bool; FFT_LENGTH_BY_2_PLUS_1],
    num_points: i32,
}

impl AccumulatedSpectra {
    fn new() -> Self {
        Self {
            y2: [0.0; FFT_LENGTH_BY_2_PLUS_1],
            e2: [0.0; FFT_LENGTH_BY_2_PLUS_1],
            low_render_energy: [false; FFT_LENGTH_BY_2_PLUS_1],
            num_points: 0,
        }
    }

    fn clear(&mut self) {
        self.y2.fill(0.0);
        self.e2.fill(0.0);
        self.low_render_energy.fill(false);
        self.num_points = 0;
    }
}

/// Per-bin ERLE with a separate, slower estimate used right after render
/// onsets, when the filter has not yet seen the new excitation.
#[derive(Debug)]
struct SubbandErleEstimator {
    min_erle: f32,
    max_erle: [f32; FFT_LENGTH_BY_2_PLUS_1],
    accum_spectra: AccumulatedSpectra,
    erle: [f32; FFT_LENGTH_BY_2_PLUS_1],
    erle_onsets: [f32; FFT_LENGTH_BY_2_PLUS_1],
    coming_onset: [bool; FFT_LENGTH_BY_2_PLUS_1],
    hold_counters: [i32; FFT_LENGTH_BY_2_PLUS_1],
}

impl SubbandErleEstimator {
    fn new(config: &EchoStateConfig) -> Self {
        let mut estimator = Self {
            min_erle: config.erle.min,
            max_erle: set_max_erle_bands(config.erle.max_l, config.erle.max_h),
            accum_spectra: AccumulatedSpectra::new(),
            erle: [0.0; FFT_LENGTH_BY_2_PLUS_1],
            erle_onsets: [0.0; FFT_LENGTH_BY_2_PLUS_1],
            coming_onset: [true; FFT_LENGTH_BY_2_PLUS_1],
            hold_counters: [0; FFT_LENGTH_BY_2_PLUS_1],
        };
        estimator.reset();
        estimator
    }

    fn reset(&mut self) {
        self.erle.fill(self.min_erle);
        self.erle_onsets.fill(self.min_erle);
        self.coming_onset.fill(true);
        self.hold_counters.fill(0);
        self.accum_spectra.clear();
    }

    fn update(
        &mut self,
        x2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        y2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        e2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        converged_filter: bool,
        onset_detection: bool,
    ) {
        if converged_filter {
            self.update_accumulated_spectra(x2, y2, e2);
            self.update_bands(onset_detection);
        }

        if onset_detection {
            self.decrease_erle_per_band_for_low_render_signals();
        }

        self.erle[0] = self.erle[1];
        self.erle[FFT_LENGTH_BY_2] = self.erle[FFT_LENGTH_BY_2 - 1];
    }

    fn erle(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        &self.erle
    }

    fn update_bands(&mut self, onset_detection: bool) {
        if self.accum_spectra.num_points != POINTS_TO_ACCUMULATE {
            return;
        }

        let mut new_erle = [0.0f32; FFT_LENGTH_BY_2];
        let mut is_erle_updated = [false; FFT_LENGTH_BY_2];
        for k in 1..FFT_LENGTH_BY_2 {
            if self.accum_spectra.e2[k] > 0.0 {
                new_erle[k] = self.accum_spectra.y2[k] / self.accum_spectra.e2[k];
                is_erle_updated[k] = true;
            }
        }

        if onset_detection {
            for k in 1..FFT_LENGTH_BY_2 {
                if is_erle_updated[k] && !self.accum_spectra.low_render_energy[k] {
                    if self.coming_onset[k] {
                        self.coming_onset[k] = false;
                        let alpha = if new_erle[k] < self.erle_onsets[k] {
                            0.3
                        } else {
                            0.15
                        };
                        self.erle_onsets[k] = (self.erle_onsets[k]
                            + alpha * (new_erle[k] - self.erle_onsets[k]))
                            .clamp(self.min_erle, self.max_erle[k]);
                    }
                    self.hold_counters[k] = BLOCKS_FOR_ONSET_DETECTION;
                }
            }
        }

        for k in 1..FFT_LENGTH_BY_2 {
            if is_erle_updated[k] {
                let alpha = if new_erle[k] < self.erle[k] {
                    if self.accum_spectra.low_render_energy[k] {
                        0.0
                    } else {
                        0.1
                    }
                } else {
                    0.05
                };
                self.erle[k] = (self.erle[k] + alpha * (new_erle[k] - self.erle[k]))
                    .clamp(self.min_erle, self.max_erle[k]);
            }
        }
    }

    fn decrease_erle_per_band_for_low_render_signals(&mut self) {
        for k in 1..FFT_LENGTH_BY_2 {
            self.hold_counters[k] -= 1;
            if self.hold_counters[k] <= BLOCKS_FOR_ONSET_DETECTION - BLOCKS_TO_HOLD_ERLE {
                if self.erle[k] > self.erle_onsets[k] {
                    self.erle[k] = self.erle_onsets[k].max(0.97 * self.erle[k]);
                    debug_assert!(self.min_erle <= self.erle[k]);
                }
                if self.hold_counters[k] <= 0 {
                    self.coming_onset[k] = true;
                    self.hold_counters[k] = 0;
                }
            }
        }
    }

    fn update_accumulated_spectra(
        &mut self,
        x2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        y2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        e2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
    ) {
        let accum = &mut self.accum_spectra;
        if accum.num_points == POINTS_TO_ACCUMULATE {
            accum.clear();
        }
        for k in 0..FFT_LENGTH_BY_2_PLUS_1 {
            accum.y2[k] += y2[k];
            accum.e2[k] += e2[k];
            accum.low_render_energy[k] |= x2[k] < X2_BAND_ENERGY_THRESHOLD;
        }
        accum.num_points += 1;
    }
}

/// Instantaneous fullband ERLE over groups of blocks, plus a quality score
/// placing the latest value between the tracked extremes.
#[derive(Debug)]
struct ErleInstantaneous {
    clamp_quality_to_zero: bool,
    clamp_quality_to_one: bool,
    erle_log2: Option<f32>,
    inst_quality_estimate: f32,
    max_erle_log2: f32,
    min_erle_log2: f32,
    y2_acum: f32,
    e2_acum: f32,
    num_points: i32,
}

impl ErleInstantaneous {
    fn new(config: &EchoStateConfig) -> Self {
        let mut inst = Self {
            clamp_quality_to_zero: config.erle.clamp_quality_estimate_to_zero,
            clamp_quality_to_one: config.erle.clamp_quality_estimate_to_one,
            erle_log2: None,
            inst_quality_estimate: 0.0,
            max_erle_log2: 0.0,
            min_erle_log2: 0.0,
            y2_acum: 0.0,
            e2_acum: 0.0,
            num_points: 0,
        };
        inst.reset();
        inst
    }

    /// Returns the new instantaneous ERLE once enough blocks have been
    /// accumulated.
    fn update(&mut self, y2_sum: f32, e2_sum: f32) -> Option<f32> {
        self.e2_acum += e2_sum;
        self.y2_acum += y2_sum;
        self.num_points += 1;
        if self.num_points != POINTS_TO_ACCUMULATE {
            return None;
        }

        let erle_log2 = (self.e2_acum > 0.0)
            .then(|| fast_approx_log2f(self.y2_acum / self.e2_acum + EPSILON));
        self.num_points = 0;
        self.e2_acum = 0.0;
        self.y2_acum = 0.0;

        let erle_log2 = erle_log2?;
        self.erle_log2 = Some(erle_log2);
        self.update_max_min(erle_log2);
        self.update_quality_estimate(erle_log2);
        Some(erle_log2)
    }

    fn reset(&mut self) {
        self.reset_accumulators();
        // -30 dB and 100 dB.
        self.max_erle_log2 = -10.0;
        self.min_erle_log2 = 33.0;
    }

    fn reset_accumulators(&mut self) {
        self.erle_log2 = None;
        self.inst_quality_estimate = 0.0;
        self.num_points = 0;
        self.e2_acum = 0.0;
        self.y2_acum = 0.0;
    }

    fn quality_estimate(&self) -> Option<f32> {
        self.erle_log2.map(|_| {
            let mut value = self.inst_quality_estimate;
            if self.clamp_quality_to_zero {
                value = value.max(0.0);
            }
            if self.clamp_quality_to_one {
                value = value.min(1.0);
            }
            value
        })
    }

    fn update_max_min(&mut self, erle_log2: f32) {
        // Forgets about 1 dB every 3 seconds.
        self.max_erle_log2 = (self.max_erle_log2 - 0.0004).max(erle_log2);
        self.min_erle_log2 = (self.min_erle_log2 + 0.0004).min(erle_log2);
    }

    fn update_quality_estimate(&mut self, erle_log2: f32) {
        const ALPHA: f32 = 0.07;
        let quality_estimate = if self.max_erle_log2 > self.min_erle_log2 {
            (erle_log2 - self.min_erle_log2) / (self.max_erle_log2 - self.min_erle_log2)
        } else {
            0.0
        };
        if quality_estimate > self.inst_quality_estimate {
            self.inst_quality_estimate = quality_estimate;
        } else {
            self.inst_quality_estimate += ALPHA * (quality_estimate - self.inst_quality_estimate);
        }
    }
}

#[derive(Debug)]
struct FullBandErleEstimator {
    min_erle_log2: f32,
    hold_counter_instantaneous_erle: i32,
    erle_time_domain_log2: f32,
    instantaneous_erle: ErleInstantaneous,
    linear_filter_quality: Option<f32>,
}

impl FullBandErleEstimator {
    fn new(config: &EchoStateConfig) -> Self {
        let min_erle_log2 = fast_approx_log2f(config.erle.min + EPSILON);
        let mut estimator = Self {
            min_erle_log2,
            hold_counter_instantaneous_erle: 0,
            erle_time_domain_log2: min_erle_log2,
            instantaneous_erle: ErleInstantaneous::new(config),
            linear_filter_quality: None,
        };
        estimator.reset();
        estimator
    }

    fn reset(&mut self) {
        self.instantaneous_erle.reset();
        self.linear_filter_quality = self.instantaneous_erle.quality_estimate();
        self.erle_time_domain_log2 = self.min_erle_log2;
        self.hold_counter_instantaneous_erle = 0;
    }

    fn update(
        &mut self,
        x2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        y2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        e2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        converged_filter: bool,
    ) {
        if converged_filter {
            let x2_sum: f32 = x2.iter().sum();
            if x2_sum > X2_BAND_ENERGY_THRESHOLD * FFT_LENGTH_BY_2_PLUS_1 as f32 {
                let y2_sum: f32 = y2.iter().sum();
                let e2_sum: f32 = e2.iter().sum();
                if let Some(inst_erle) = self.instantaneous_erle.update(y2_sum, e2_sum) {
                    self.hold_counter_instantaneous_erle = BLOCKS_TO_HOLD_ERLE;
                    self.erle_time_domain_log2 += 0.05 * (inst_erle - self.erle_time_domain_log2);
                    self.erle_time_domain_log2 = self.erle_time_domain_log2.max(self.min_erle_log2);
                }
            }
        }
        self.hold_counter_instantaneous_erle = (self.hold_counter_instantaneous_erle - 1).max(-1);
        if self.hold_counter_instantaneous_erle == 0 {
            self.instantaneous_erle.reset_accumulators();
        }
        self.linear_filter_quality = self.instantaneous_erle.quality_estimate();
    }
}

/// Subband and fullband ERLE estimates for the reference capture channel.
#[derive(Debug)]
pub(crate) struct ErleEstimator {
    startup_phase_length_blocks: usize,
    fullband_erle_estimator: FullBandErleEstimator,
    subband_erle_estimator: SubbandErleEstimator,
    blocks_since_reset: usize,
}

impl ErleEstimator {
    pub(crate) fn new(startup_phase_length_blocks: usize, config: &EchoStateConfig) -> Self {
        let mut estimator = Self {
            startup_phase_length_blocks,
            fullband_erle_estimator: FullBandErleEstimator::new(config),
            subband_erle_estimator: SubbandErleEstimator::new(config),
            blocks_since_reset: 0,
        };
        estimator.reset(true);
        estimator
    }

    /// Resets both estimates. Only a delay change restarts the startup phase.
    pub(crate) fn reset(&mut self, delay_change: bool) {
        self.fullband_erle_estimator.reset();
        self.subband_erle_estimator.reset();
        if delay_change {
            self.blocks_since_reset = 0;
        }
    }

    pub(crate) fn update(
        &mut self,
        x2_reverb: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        y2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        e2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        converged_filter: bool,
        onset_detection: bool,
    ) {
        self.blocks_since_reset += 1;
        if self.blocks_since_reset < self.startup_phase_length_blocks {
            return;
        }

        self.subband_erle_estimator
            .update(x2_reverb, y2, e2, converged_filter, onset_detection);
        self.fullband_erle_estimator
            .update(x2_reverb, y2, e2, converged_filter);
    }

    pub(crate) fn erle(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        self.subband_erle_estimator.erle()
    }

    /// Fullband ERLE in log2 units.
    pub(crate) fn fullband_erle_log2(&self) -> f32 {
        self.fullband_erle_estimator.erle_time_domain_log2
    }

    /// Linear filter quality in `[0, 1]`, if an instantaneous ERLE is
    /// currently available.
    pub(crate) fn inst_linear_quality_estimate(&self) -> Option<f32> {
        self.fullband_erle_estimator.linear_filter_quality
    }

    pub(crate) fn dump(&self, dumper: &mut dyn DataDumper) {
        dumper.dump_f32("aec3_erle_time_domain_log2", self.fullband_erle_log2());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_RENDER: f32 = 500.0 * 1000.0 * 1000.0;

    fn spectra(erle: f32) -> (
        [f32; FFT_LENGTH_BY_2_PLUS_1],
        [f32; FFT_LENGTH_BY_2_PLUS_1],
        [f32; FFT_LENGTH_BY_2_PLUS_1],
    ) {
        let x2 = [STRONG_RENDER; FFT_LENGTH_BY_2_PLUS_1];
        let y2 = [STRONG_RENDER * 9.0; FFT_LENGTH_BY_2_PLUS_1];
        let e2 = y2.map(|v| v / erle);
        (x2, y2, e2)
    }

    #[test]
    fn erle_starts_at_min() {
        let config = EchoStateConfig::default();
        let estimator = ErleEstimator::new(0, &config);
        assert!(estimator.erle().iter().all(|&v| v == config.erle.min));
        assert_eq!(estimator.inst_linear_quality_estimate(), None);
    }

    #[test]
    fn erle_converges_to_band_maxima() {
        let config = EchoStateConfig::default();
        let mut estimator = ErleEstimator::new(0, &config);
        let (x2, y2, e2) = spectra(10.0);
        for _ in 0..1000 {
            estimator.update(&x2, &y2, &e2, true, true);
        }
        let max_erle = set_max_erle_bands(config.erle.max_l, config.erle.max_h);
        for (k, (&erle, &max)) in estimator.erle().iter().zip(max_erle.iter()).enumerate() {
            let expected = if k == 0 { max_erle[1] } else { max };
            assert!((erle - expected).abs() < 0.01, "bin {k}: {erle} != {expected}");
        }
        assert!(estimator.fullband_erle_log2() > 2.0);
    }

    #[test]
    fn no_updates_without_converged_filter() {
        let config = EchoStateConfig::default();
        let mut estimator = ErleEstimator::new(0, &config);
        let (x2, y2, e2) = spectra(10.0);
        for _ in 0..500 {
            estimator.update(&x2, &y2, &e2, false, false);
        }
        assert!(estimator.erle().iter().all(|&v| v == config.erle.min));
        assert_eq!(estimator.inst_linear_quality_estimate(), None);
    }

    #[test]
    fn fullband_hold_counter_settles_when_filter_never_converges() {
        let config = EchoStateConfig::default();
        let mut estimator = FullBandErleEstimator::new(&config);
        let (x2, y2, e2) = spectra(10.0);
        for _ in 0..50 {
            estimator.update(&x2, &y2, &e2, true);
        }
        assert!(estimator.hold_counter_instantaneous_erle > 0);

        for _ in 0..(BLOCKS_TO_HOLD_ERLE as usize + 1000) {
            estimator.update(&x2, &y2, &e2, false);
        }
        assert_eq!(estimator.hold_counter_instantaneous_erle, -1);
    }

    #[test]
    fn onset_compensation_lowers_erle_after_render_stops() {
        let config = EchoStateConfig::default();
        let mut estimator = ErleEstimator::new(0, &config);
        let (x2, y2, e2) = spectra(10.0);
        for _ in 0..1000 {
            estimator.update(&x2, &y2, &e2, true, true);
        }
        let before = estimator.erle()[5];

        // With no new ERLE updates, the hold runs out and the estimate decays
        // towards the onset level.
        for _ in 0..(BLOCKS_FOR_ONSET_DETECTION as usize + 50) {
            estimator.update(&x2, &y2, &e2, false, true);
        }
        assert!(estimator.erle()[5] < before);
    }

    #[test]
    fn quality_estimate_is_bounded() {
        let config = EchoStateConfig::default();
        let mut estimator = ErleEstimator::new(0, &config);
        for (i, erle) in [2.0f32, 50.0, 5.0, 400.0, 1.5].iter().cycle().take(300).enumerate() {
            let (x2, y2, e2) = spectra(*erle);
            estimator.update(&x2, &y2, &e2, true, true);
            if let Some(q) = estimator.inst_linear_quality_estimate() {
                assert!((0.0..=1.0).contains(&q), "block {i}: {q}");
            }
        }
        assert!(estimator.inst_linear_quality_estimate().is_some());
    }

    #[test]
    fn startup_phase_delays_updates_only_after_delay_change() {
        let config = EchoStateConfig::default();
        let mut estimator = ErleEstimator::new(20, &config);
        let (x2, y2, e2) = spectra(10.0);
        for _ in 0..19 {
            estimator.update(&x2, &y2, &e2, true, false);
        }
        assert_eq!(estimator.fullband_erle_log2(), estimator.fullband_erle_estimator.min_erle_log2);

        for _ in 0..100 {
            estimator.update(&x2, &y2, &e2, true, false);
        }
        assert!(estimator.erle()[10] > config.erle.min);

        estimator.reset(false);
        assert!(estimator.erle().iter().all(|&v| v == config.erle.min));
        for _ in 0..6 {
            estimator.update(&x2, &y2, &e2, true, false);
        }
        assert!(estimator.erle()[10] > config.erle.min);

        estimator.reset(true);
        for _ in 0..6 {
            estimator.update(&x2, &y2, &e2, true, false);
        }
        assert!(estimator.erle().iter().all(|&v| v == config.erle.min));
    }
}
