//! Impulse response analysis for one capture channel's adaptive filter.
//!
//! Each update processes one block-sized region of the filter, so a full
//! pass over a filter of `N` partitions takes `N` updates. The analysis
//! tracks the direct-path peak, the echo path gain at that peak and whether
//! the peak has been stable long enough to be trusted.

use crate::block::Block;
use crate::common::{
    BLOCK_SIZE, BLOCK_SIZE_LOG2, FFT_LENGTH_BY_2, NUM_BLOCKS_PER_SECOND, time_domain_length,
};
use crate::config::EchoStateConfig;
use crate::render_buffer::RenderBuffer;

/// Minimum phase high-pass with a cutoff around 600 Hz, applied before peak
/// picking so low-frequency ringing does not mask the direct path.
const HIGH_PASS: [f32; 3] = [0.7929742, -0.36072128, -0.47047766];

#[derive(Debug, Clone, Copy, Default)]
struct FilterRegion {
    start_sample: usize,
    end_sample: usize,
}

fn find_peak_index(filter: &[f32], peak_index_in: usize, region: FilterRegion) -> usize {
    let mut peak_index = peak_index_in;
    let mut max_h2 = filter[peak_index] * filter[peak_index];
    for (k, &h) in filter
        .iter()
        .enumerate()
        .take(region.end_sample + 1)
        .skip(region.start_sample)
    {
        let h2 = h * h;
        if h2 > max_h2 {
            peak_index = k;
            max_h2 = h2;
        }
    }
    peak_index
}

/// Flags a filter whose peak is clearly above the rest of the response and
/// has stayed at the same delay during enough active render.
#[derive(Debug)]
struct ConsistentFilterDetector {
    significant_peak: bool,
    filter_floor_accum: f32,
    filter_secondary_peak: f32,
    filter_floor_low_limit: usize,
    filter_floor_high_limit: usize,
    active_render_threshold: f32,
    consistent_estimate_counter: usize,
    consistent_delay_reference: i32,
}

impl ConsistentFilterDetector {
    fn new(config: &EchoStateConfig) -> Self {
        let limit = config.render_levels.active_render_limit;
        Self {
            significant_peak: false,
            filter_floor_accum: 0.0,
            filter_secondary_peak: 0.0,
            filter_floor_low_limit: 0,
            filter_floor_high_limit: 0,
            active_render_threshold: limit * limit * FFT_LENGTH_BY_2 as f32,
            consistent_estimate_counter: 0,
            consistent_delay_reference: -10,
        }
    }

    fn reset(&mut self) {
        self.significant_peak = false;
        self.filter_floor_accum = 0.0;
        self.filter_secondary_peak = 0.0;
        self.filter_floor_low_limit = 0;
        self.filter_floor_high_limit = 0;
        self.consistent_estimate_counter = 0;
        self.consistent_delay_reference = -10;
    }

    fn detect(
        &mut self,
        filter: &[f32],
        region: FilterRegion,
        x_block: &Block,
        peak_index: usize,
        delay_blocks: i32,
    ) -> bool {
        let len = filter.len();
        if region.start_sample == 0 {
            self.filter_floor_accum = 0.0;
            self.filter_secondary_peak = 0.0;
            self.filter_floor_low_limit = peak_index.saturating_sub(64);
            self.filter_floor_high_limit = if peak_index + 129 > len {
                0
            } else {
                peak_index + 128
            };
        }

        let below_peak = region.start_sample..(region.end_sample + 1).min(self.filter_floor_low_limit);
        let above_peak = self.filter_floor_high_limit.max(region.start_sample)..region.end_sample + 1;
        for k in below_peak.chain(above_peak) {
            let abs_h = filter[k].abs();
            self.filter_floor_accum += abs_h;
            self.filter_secondary_peak = self.filter_secondary_peak.max(abs_h);
        }

        if region.end_sample == len - 1 {
            let floor_len = self.filter_floor_low_limit + len - self.filter_floor_high_limit;
            let filter_floor = self.filter_floor_accum / floor_len as f32;
            let abs_peak = filter[peak_index].abs();
            self.significant_peak =
                abs_peak > 10.0 * filter_floor && abs_peak > 2.0 * self.filter_secondary_peak;
        }

        if self.significant_peak {
            let active_render_block = x_block
                .band(0)
                .any(|x| x.iter().map(|&v| v * v).sum::<f32>() > self.active_render_threshold);

            if self.consistent_delay_reference == delay_blocks {
                if active_render_block {
                    self.consistent_estimate_counter += 1;
                }
            } else {
                self.consistent_estimate_counter = 0;
                self.consistent_delay_reference = delay_blocks;
            }
        }
        self.consistent_estimate_counter as f32 > 1.5 * NUM_BLOCKS_PER_SECOND as f32
    }
}

/// Delay, gain and consistency analysis of one adaptive filter.
#[derive(Debug)]
pub(crate) struct FilterAnalyzer {
    bounded_erl: bool,
    default_gain: f32,
    h_highpass: Vec<f32>,
    blocks_since_reset: usize,
    region: FilterRegion,
    peak_index: usize,
    delay_blocks: i32,
    gain: f32,
    consistent_estimate: bool,
    consistent_filter_detector: ConsistentFilterDetector,
}

impl FilterAnalyzer {
    pub(crate) fn new(config: &EchoStateConfig) -> Self {
        let mut analyzer = Self {
            bounded_erl: config.ep_strength.bounded_erl,
            default_gain: config.ep_strength.default_gain,
            h_highpass: vec![0.0; time_domain_length(config.filter.refined_length_blocks)],
            blocks_since_reset: 0,
            region: FilterRegion::default(),
            peak_index: 0,
            delay_blocks: 0,
            gain: config.ep_strength.default_gain,
            consistent_estimate: false,
            consistent_filter_detector: ConsistentFilterDetector::new(config),
        };
        analyzer.reset();
        analyzer
    }

    pub(crate) fn reset(&mut self) {
        self.delay_blocks = 0;
        self.blocks_since_reset = 0;
        self.gain = self.default_gain;
        self.peak_index = 0;
        self.consistent_estimate = false;
        self.region = FilterRegion::default();
        self.h_highpass.fill(0.0);
        self.consistent_filter_detector.reset();
    }

    /// Analyzes the next region of `filter_time_domain`.
    pub(crate) fn update(&mut self, filter_time_domain: &[f32], render_buffer: &RenderBuffer<'_>) {
        debug_assert!(!filter_time_domain.is_empty());
        self.set_region_to_analyze(filter_time_domain.len());
        self.pre_process_filter(filter_time_domain);

        self.peak_index = self.peak_index.min(self.h_highpass.len() - 1);
        self.peak_index = find_peak_index(&self.h_highpass, self.peak_index, self.region);
        self.delay_blocks = (self.peak_index >> BLOCK_SIZE_LOG2) as i32;
        self.update_filter_gain();

        self.consistent_estimate = self.consistent_filter_detector.detect(
            &self.h_highpass,
            self.region,
            render_buffer.block(-self.delay_blocks),
            self.peak_index,
            self.delay_blocks,
        );
    }

    /// Direct-path delay in blocks.
    pub(crate) fn delay_blocks(&self) -> i32 {
        self.delay_blocks
    }

    /// Echo path gain at the direct-path peak.
    pub(crate) fn gain(&self) -> f32 {
        self.gain
    }

    pub(crate) fn consistent(&self) -> bool {
        self.consistent_estimate
    }

    /// High-passed impulse response used for the analysis.
    pub(crate) fn adjusted_filter(&self) -> &[f32] {
        &self.h_highpass
    }

    fn update_filter_gain(&mut self) {
        self.blocks_since_reset += 1;
        let sufficient_time_to_converge = self.blocks_since_reset > 5 * NUM_BLOCKS_PER_SECOND;
        let peak_gain = self.h_highpass[self.peak_index].abs();

        if sufficient_time_to_converge && self.consistent_estimate {
            self.gain = peak_gain;
        } else if self.gain != 0.0 {
            self.gain = self.gain.max(peak_gain);
        }

        if self.bounded_erl && self.gain != 0.0 {
            self.gain = self.gain.max(0.01);
        }
    }

    fn pre_process_filter(&mut self, filter_time_domain: &[f32]) {
        if self.h_highpass.len() != filter_time_domain.len() {
            self.h_highpass.resize(filter_time_domain.len(), 0.0);
        }

        let FilterRegion {
            start_sample,
            end_sample,
        } = self.region;
        self.h_highpass[start_sample..=end_sample].fill(0.0);
        for k in (HIGH_PASS.len() - 1).max(start_sample)..=end_sample {
            self.h_highpass[k] = HIGH_PASS
                .iter()
                .enumerate()
                .map(|(j, &c)| filter_time_domain[k - j] * c)
                .sum();
        }
    }

    fn set_region_to_analyze(&mut self, filter_size: usize) {
        let region = &mut self.region;
        region.start_sample = if region.end_sample >= filter_size - 1 {
            0
        } else {
            region.end_sample + 1
        };
        region.end_sample = (region.start_sample + BLOCK_SIZE - 1).min(filter_size - 1);
        debug_assert!(region.start_sample <= region.end_sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_buffer::BlockBuffer;
    use crate::common::FFT_LENGTH_BY_2_PLUS_1;
    use crate::spectrum_buffer::SpectrumBuffer;

    fn render_history(amplitude: f32) -> (BlockBuffer, SpectrumBuffer) {
        let mut blocks = BlockBuffer::new(20, 1, 1);
        let spectra = SpectrumBuffer::new(20, 1);
        let block = Block::new_with_value(1, 1, amplitude);
        for _ in 0..20 {
            blocks.insert(&block);
        }
        (blocks, spectra)
    }

    fn impulse(len: usize, position: usize) -> Vec<f32> {
        let mut h = vec![0.0; len];
        h[position] = 1.0;
        h
    }

    #[test]
    fn region_sweeps_whole_filter() {
        let config = EchoStateConfig::default();
        let mut analyzer = FilterAnalyzer::new(&config);
        let filter_size = 3 * BLOCK_SIZE + 10;
        let mut covered = vec![false; filter_size];
        for _ in 0..4 {
            analyzer.set_region_to_analyze(filter_size);
            for flag in &mut covered[analyzer.region.start_sample..=analyzer.region.end_sample] {
                *flag = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
        analyzer.set_region_to_analyze(filter_size);
        assert_eq!(analyzer.region.start_sample, 0);
    }

    #[test]
    fn handles_filter_resizes() {
        let config = EchoStateConfig::default();
        let (blocks, spectra) = render_history(0.0);
        let render = RenderBuffer::new(&blocks, &spectra);
        let mut analyzer = FilterAnalyzer::new(&config);
        for len in [13 * BLOCK_SIZE, 65, 32, 10 * BLOCK_SIZE] {
            let h = impulse(len, len / 2);
            for _ in 0..3 {
                analyzer.update(&h, &render);
            }
            assert_eq!(analyzer.adjusted_filter().len(), len);
        }
    }

    #[test]
    fn finds_direct_path_delay() {
        let config = EchoStateConfig::default();
        let (blocks, spectra) = render_history(1000.0);
        let render = RenderBuffer::new(&blocks, &spectra);
        let mut analyzer = FilterAnalyzer::new(&config);
        let h = impulse(13 * BLOCK_SIZE, 3 * BLOCK_SIZE + 5);
        for _ in 0..13 {
            analyzer.update(&h, &render);
        }
        assert_eq!(analyzer.delay_blocks(), 3);
        assert!(analyzer.gain() >= config.ep_strength.default_gain);
    }

    #[test]
    fn stable_peak_with_active_render_becomes_consistent() {
        let config = EchoStateConfig::default();
        let (blocks, spectra) = render_history(1000.0);
        let render = RenderBuffer::new(&blocks, &spectra);
        let mut analyzer = FilterAnalyzer::new(&config);
        let h = impulse(13 * BLOCK_SIZE, 2 * BLOCK_SIZE + 20);
        for _ in 0..(2 * NUM_BLOCKS_PER_SECOND) {
            analyzer.update(&h, &render);
        }
        assert!(analyzer.consistent());
        assert_eq!(analyzer.delay_blocks(), 2);
    }

    #[test]
    fn silent_render_never_becomes_consistent() {
        let config = EchoStateConfig::default();
        let (blocks, spectra) = render_history(0.0);
        let render = RenderBuffer::new(&blocks, &spectra);
        let mut analyzer = FilterAnalyzer::new(&config);
        let h = impulse(13 * BLOCK_SIZE, 2 * BLOCK_SIZE + 20);
        for _ in 0..(2 * NUM_BLOCKS_PER_SECOND) {
            analyzer.update(&h, &render);
        }
        assert!(!analyzer.consistent());
    }

    #[test]
    fn reset_restores_defaults() {
        let config = EchoStateConfig::default();
        let (blocks, spectra) = render_history(1000.0);
        let render = RenderBuffer::new(&blocks, &spectra);
        let mut analyzer = FilterAnalyzer::new(&config);
        let h = impulse(13 * BLOCK_SIZE, 4 * BLOCK_SIZE);
        for _ in 0..13 {
            analyzer.update(&h, &render);
        }
        analyzer.reset();
        assert_eq!(analyzer.delay_blocks(), 0);
        assert_eq!(analyzer.gain(), config.ep_strength.default_gain);
        assert!(!analyzer.consistent());
        assert_eq!(render.spectrum(0)[0], [0.0; FFT_LENGTH_BY_2_PLUS_1]);
    }
}
