//! Estimation of the reverberant echo tail: its decay per block and its
//! frequency response relative to the direct path.

use crate::common::{
    FFT_LENGTH_BY_2, FFT_LENGTH_BY_2_LOG2, FFT_LENGTH_BY_2_PLUS_1, fast_approx_log2f,
};
use crate::config::EchoStateConfig;
use crate::data_dumper::DataDumper;

/// Blocks after the direct path that are treated as early reflections.
const EARLY_REVERB_MIN_SIZE_BLOCKS: usize = 3;
const MIN_LATE_REVERB_BLOCKS: usize = 5;
const MAX_DECAY: f32 = 0.95;
const MIN_DECAY: f32 = 0.02;

fn block_energy_average(h: &[f32], block_index: usize) -> f32 {
    let block = &h[block_index * FFT_LENGTH_BY_2..(block_index + 1) * FFT_LENGTH_BY_2];
    block.iter().map(|&x| x * x).sum::<f32>() / FFT_LENGTH_BY_2 as f32
}

fn block_energy_peak(h: &[f32], block_index: usize) -> f32 {
    h[block_index * FFT_LENGTH_BY_2..(block_index + 1) * FFT_LENGTH_BY_2]
        .iter()
        .fold(0.0f32, |peak, &x| peak.max(x * x))
}

/// `sum(i^2)` over the `n` symmetric abscissae `-(n-1)/2 ..= (n-1)/2`.
fn symmetric_arithmetic_sum(n: usize) -> f32 {
    let n = n as f32;
    n * (n * n - 1.0) / 12.0
}

/// Least squares slope of log-energies at symmetric, unit spaced abscissae.
#[derive(Debug, Default)]
struct LateReverbLinearRegressor {
    nz: f32,
    nn: f32,
    count: f32,
    n_total: usize,
    n: usize,
}

impl LateReverbLinearRegressor {
    fn reset(&mut self, num_data_points: usize) {
        debug_assert!(num_data_points % 2 == 0);
        self.nz = 0.0;
        self.nn = symmetric_arithmetic_sum(num_data_points);
        self.count = if num_data_points > 0 {
            -(num_data_points as f32) * 0.5 + 0.5
        } else {
            0.0
        };
        self.n_total = num_data_points;
        self.n = 0;
    }

    fn accumulate(&mut self, z: f32) {
        self.nz += self.count * z;
        self.count += 1.0;
        self.n += 1;
    }

    fn estimate(&self) -> Option<f32> {
        if self.n_total == 0 || self.n != self.n_total {
            return None;
        }
        Some(if self.nn == 0.0 { 0.0 } else { self.nz / self.nn })
    }
}

/// Tracks the decay of the late reverb in the impulse response.
///
/// The filter is scanned one block per update. While scanning, the blocks
/// behind the direct path that keep decaying without adapting form the
/// estimation region. The log-energies of the previously found region are fed
/// into a linear regression whose slope gives the decay per block.
#[derive(Debug)]
struct ReverbDecayEstimator {
    filter_length_blocks: usize,
    use_adaptive_echo_decay: bool,
    regressor: LateReverbLinearRegressor,
    late_reverb_start: usize,
    late_reverb_end: usize,
    block_to_analyze: usize,
    estimation_region_candidate_size: usize,
    estimation_region_identified: bool,
    previous_gains: Vec<f32>,
    decay: f32,
    tail_gain: f32,
    smoothing_constant: f32,
}

impl ReverbDecayEstimator {
    fn new(config: &EchoStateConfig) -> Self {
        let filter_length_blocks = config.filter.refined_length_blocks;
        debug_assert!(filter_length_blocks > EARLY_REVERB_MIN_SIZE_BLOCKS + 1);
        Self {
            filter_length_blocks,
            use_adaptive_echo_decay: config.ep_strength.default_len < 0.0,
            regressor: LateReverbLinearRegressor::default(),
            late_reverb_start: EARLY_REVERB_MIN_SIZE_BLOCKS,
            late_reverb_end: EARLY_REVERB_MIN_SIZE_BLOCKS,
            block_to_analyze: 0,
            estimation_region_candidate_size: 0,
            estimation_region_identified: false,
            previous_gains: vec![0.0; filter_length_blocks],
            decay: config.ep_strength.default_len.abs(),
            tail_gain: 0.0,
            smoothing_constant: 0.0,
        }
    }

    fn update(
        &mut self,
        filter: &[f32],
        filter_quality: Option<f32>,
        filter_delay_blocks: i32,
        usable_linear_filter: bool,
        stationary_signal: bool,
    ) {
        if stationary_signal {
            return;
        }

        let max_delay = (self.filter_length_blocks - EARLY_REVERB_MIN_SIZE_BLOCKS - 1) as i32;
        let estimation_feasible = filter_delay_blocks <= max_delay
            && filter.len() == self.filter_length_blocks * FFT_LENGTH_BY_2
            && filter_delay_blocks > 0
            && usable_linear_filter;
        if !estimation_feasible {
            self.reset_decay_estimation();
            return;
        }

        if !self.use_adaptive_echo_decay {
            return;
        }

        let new_smoothing = filter_quality.map_or(0.0, |q| 0.2 * q);
        self.smoothing_constant = self.smoothing_constant.max(new_smoothing);
        if self.smoothing_constant == 0.0 {
            return;
        }

        if self.block_to_analyze < self.filter_length_blocks {
            self.analyze_filter(filter);
            self.block_to_analyze += 1;
        } else {
            self.estimate_decay(filter, filter_delay_blocks as usize);
        }
    }

    fn decay(&self) -> f32 {
        self.decay
    }

    fn reset_decay_estimation(&mut self) {
        self.regressor.reset(0);
        self.block_to_analyze = 0;
        self.estimation_region_candidate_size = 0;
        self.estimation_region_identified = false;
        self.smoothing_constant = 0.0;
        self.late_reverb_start = 0;
        self.late_reverb_end = 0;
    }

    fn estimate_decay(&mut self, filter: &[f32], peak_block: usize) {
        self.block_to_analyze =
            (peak_block + EARLY_REVERB_MIN_SIZE_BLOCKS).min(self.filter_length_blocks - 1);

        let first_reverb_gain = block_energy_average(filter, self.block_to_analyze);
        let h_size_blocks = filter.len() >> FFT_LENGTH_BY_2_LOG2;
        self.tail_gain = block_energy_average(filter, h_size_blocks - 1);
        let peak_energy = block_energy_peak(filter, peak_block);
        let sufficient_reverb_decay = first_reverb_gain > 4.0 * self.tail_gain;
        let valid_filter = first_reverb_gain > 2.0 * self.tail_gain && peak_energy < 100.0;

        let size_late_reverb = self.estimation_region_candidate_size;
        if size_late_reverb >= MIN_LATE_REVERB_BLOCKS {
            if valid_filter
                && let Some(slope) = self.regressor.estimate()
            {
                let decay = 2.0f32
                    .powf(slope * FFT_LENGTH_BY_2 as f32)
                    .max(0.97 * self.decay)
                    .min(MAX_DECAY)
                    .max(MIN_DECAY);
                self.decay += self.smoothing_constant * (decay - self.decay);
            }

            self.regressor.reset(size_late_reverb * FFT_LENGTH_BY_2);
            self.late_reverb_start = peak_block + EARLY_REVERB_MIN_SIZE_BLOCKS;
            self.late_reverb_end = self.block_to_analyze + size_late_reverb - 1;
        } else {
            self.regressor.reset(0);
            self.late_reverb_start = 0;
            self.late_reverb_end = 0;
        }

        self.estimation_region_identified = !(valid_filter && sufficient_reverb_decay);
        self.estimation_region_candidate_size = 0;
        // Wait for the next confident filter before scanning again.
        self.smoothing_constant = 0.0;
    }

    fn analyze_filter(&mut self, filter: &[f32]) {
        let start = self.block_to_analyze * FFT_LENGTH_BY_2;
        let mut h2 = [0.0f32; FFT_LENGTH_BY_2];
        for (out, &h) in h2.iter_mut().zip(&filter[start..start + FFT_LENGTH_BY_2]) {
            *out = h * h;
        }

        let gain = (h2.iter().sum::<f32>() / FFT_LENGTH_BY_2 as f32).max(1e-32);
        let previous_gain = &mut self.previous_gains[self.block_to_analyze];
        let adapting = *previous_gain > 1.1 * gain || *previous_gain < 0.9 * gain;
        let above_noise_floor = gain > self.tail_gain;
        *previous_gain = gain;

        self.estimation_region_identified |= adapting || !above_noise_floor;
        if !self.estimation_region_identified {
            self.estimation_region_candidate_size += 1;
        }

        if (self.late_reverb_start..=self.late_reverb_end).contains(&self.block_to_analyze) {
            for &h2_k in &h2 {
                self.regressor.accumulate(fast_approx_log2f(h2_k + 1e-10));
            }
        }
    }
}

/// Tail frequency response as the direct-path response scaled by the smoothed
/// tail to direct-path energy ratio.
#[derive(Debug)]
struct ReverbFrequencyResponse {
    average_decay: f32,
    tail_response: [f32; FFT_LENGTH_BY_2_PLUS_1],
}

impl ReverbFrequencyResponse {
    fn new() -> Self {
        Self {
            average_decay: 0.0,
            tail_response: [0.0; FFT_LENGTH_BY_2_PLUS_1],
        }
    }

    fn update(
        &mut self,
        frequency_response: &[[f32; FFT_LENGTH_BY_2_PLUS_1]],
        filter_delay_blocks: i32,
        linear_filter_quality: Option<f32>,
        stationary_block: bool,
    ) {
        if stationary_block || frequency_response.is_empty() {
            return;
        }
        let Some(quality) = linear_filter_quality else {
            return;
        };

        let last = frequency_response.len() - 1;
        let freq_resp_tail = &frequency_response[last];
        let freq_resp_direct_path =
            &frequency_response[(filter_delay_blocks.max(0) as usize).min(last)];

        // DC is skipped.
        let direct_path_energy: f32 = freq_resp_direct_path[1..].iter().sum();
        let average_decay = if direct_path_energy == 0.0 {
            0.0
        } else {
            freq_resp_tail[1..].iter().sum::<f32>() / direct_path_energy
        };

        self.average_decay += 0.2 * quality * (average_decay - self.average_decay);

        for (tail, &direct) in self.tail_response.iter_mut().zip(freq_resp_direct_path) {
            *tail = direct * self.average_decay;
        }
        for k in 1..FFT_LENGTH_BY_2 {
            let avg_neighbour = 0.5 * (self.tail_response[k - 1] + self.tail_response[k + 1]);
            self.tail_response[k] = self.tail_response[k].max(avg_neighbour);
        }
    }
}

/// Reverb decay and tail frequency response of the reference channel.
#[derive(Debug)]
pub(crate) struct ReverbModelEstimator {
    reverb_decay_estimator: ReverbDecayEstimator,
    reverb_frequency_response: ReverbFrequencyResponse,
}

impl ReverbModelEstimator {
    pub(crate) fn new(config: &EchoStateConfig) -> Self {
        Self {
            reverb_decay_estimator: ReverbDecayEstimator::new(config),
            reverb_frequency_response: ReverbFrequencyResponse::new(),
        }
    }

    pub(crate) fn update(
        &mut self,
        impulse_response: &[f32],
        frequency_response: &[[f32; FFT_LENGTH_BY_2_PLUS_1]],
        linear_filter_quality: Option<f32>,
        filter_delay_blocks: i32,
        usable_linear_estimate: bool,
        stationary_block: bool,
    ) {
        self.reverb_frequency_response.update(
            frequency_response,
            filter_delay_blocks,
            linear_filter_quality,
            stationary_block,
        );
        self.reverb_decay_estimator.update(
            impulse_response,
            linear_filter_quality,
            filter_delay_blocks,
            usable_linear_estimate,
            stationary_block,
        );
    }

    pub(crate) fn reverb_decay(&self) -> f32 {
        self.reverb_decay_estimator.decay()
    }

    pub(crate) fn frequency_response(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        &self.reverb_frequency_response.tail_response
    }

    pub(crate) fn dump(&self, dumper: &mut dyn DataDumper) {
        dumper.dump_f32("aec3_reverb_decay", self.reverb_decay());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_dumper::{DumpValue, RecordingDataDumper};

    const FILTER_BLOCKS: usize = 13;

    fn adaptive_config() -> EchoStateConfig {
        let mut config = EchoStateConfig::default();
        config.ep_strength.default_len = -0.9;
        config
    }

    /// Impulse response with a unit peak in `delay_blocks` followed by an
    /// exponential tail decaying by `decay` in power per block.
    fn exponential_filter(delay_blocks: usize, decay: f32) -> Vec<f32> {
        let mut h = vec![0.0f32; FILTER_BLOCKS * FFT_LENGTH_BY_2];
        let peak = delay_blocks * FFT_LENGTH_BY_2;
        h[peak] = 1.0;
        let amplitude_decay_per_sample = decay.sqrt().powf(1.0 / FFT_LENGTH_BY_2 as f32);
        let mut a = 0.5f32;
        for (k, v) in h.iter_mut().enumerate().skip(peak + 1) {
            a *= amplitude_decay_per_sample;
            *v = if k % 2 == 0 { a } else { -a };
        }
        h
    }

    #[test]
    fn regressor_recovers_slope() {
        let mut regressor = LateReverbLinearRegressor::default();
        regressor.reset(8);
        assert_eq!(regressor.estimate(), None);
        for i in 0..8 {
            regressor.accumulate(3.0 - 0.25 * i as f32);
        }
        let slope = regressor.estimate().unwrap_or_default();
        assert!((slope + 0.25).abs() < 1e-5, "{slope}");
    }

    #[test]
    fn fixed_decay_is_reported_unchanged() {
        let config = EchoStateConfig::default();
        let mut estimator = ReverbModelEstimator::new(&config);
        let h = exponential_filter(2, 0.5);
        let freq_resp = vec![[1.0; FFT_LENGTH_BY_2_PLUS_1]; FILTER_BLOCKS];
        for _ in 0..500 {
            estimator.update(&h, &freq_resp, Some(1.0), 2, true, false);
        }
        assert_eq!(estimator.reverb_decay(), config.ep_strength.default_len);
    }

    #[test]
    fn adaptive_decay_moves_towards_filter_tail() {
        let config = adaptive_config();
        let mut estimator = ReverbModelEstimator::new(&config);
        let h = exponential_filter(2, 0.5);
        let freq_resp = vec![[1.0; FFT_LENGTH_BY_2_PLUS_1]; FILTER_BLOCKS];
        let initial = estimator.reverb_decay();
        for _ in 0..2000 {
            estimator.update(&h, &freq_resp, Some(1.0), 2, true, false);
        }
        let decay = estimator.reverb_decay();
        assert!(decay < initial, "{decay} !< {initial}");
        assert!((MIN_DECAY..=MAX_DECAY).contains(&decay));
    }

    #[test]
    fn stationary_blocks_change_nothing() {
        let config = adaptive_config();
        let mut estimator = ReverbModelEstimator::new(&config);
        let h = exponential_filter(2, 0.5);
        let freq_resp = vec![[1.0; FFT_LENGTH_BY_2_PLUS_1]; FILTER_BLOCKS];
        for _ in 0..2000 {
            estimator.update(&h, &freq_resp, Some(1.0), 2, true, true);
        }
        assert_eq!(estimator.reverb_decay(), 0.9);
        assert!(estimator.frequency_response().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn tail_response_follows_energy_ratio() {
        let config = EchoStateConfig::default();
        let mut estimator = ReverbModelEstimator::new(&config);
        let mut freq_resp = vec![[0.0; FFT_LENGTH_BY_2_PLUS_1]; FILTER_BLOCKS];
        freq_resp[1] = [4.0; FFT_LENGTH_BY_2_PLUS_1];
        freq_resp[FILTER_BLOCKS - 1] = [1.0; FFT_LENGTH_BY_2_PLUS_1];
        let h = vec![0.0; FILTER_BLOCKS * FFT_LENGTH_BY_2];
        for _ in 0..200 {
            estimator.update(&h, &freq_resp, Some(1.0), 1, true, false);
        }
        for &v in estimator.frequency_response() {
            assert!((v - 1.0).abs() < 1e-3, "{v}");
        }

        // No quality estimate, no update.
        freq_resp[1] = [8.0; FFT_LENGTH_BY_2_PLUS_1];
        estimator.update(&h, &freq_resp, None, 1, true, false);
        assert!((estimator.frequency_response()[10] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn dumps_decay() {
        let recorder = RecordingDataDumper::new();
        let mut sink = recorder.clone();
        let estimator = ReverbModelEstimator::new(&EchoStateConfig::default());
        estimator.dump(&mut sink);
        assert_eq!(
            recorder.last("aec3_reverb_decay"),
            Some(DumpValue::F32(0.83))
        );
    }
}
