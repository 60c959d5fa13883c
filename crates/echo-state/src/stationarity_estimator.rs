//! Per-bin stationarity of the render signal relative to its noise floor.

use crate::common::{FFT_LENGTH_BY_2_PLUS_1, NUM_BLOCKS_PER_SECOND};
use crate::spectrum_buffer::SpectrumBuffer;

const MIN_NOISE_POWER: f32 = 10.0;
const HANGOVER_BLOCKS: i32 = (NUM_BLOCKS_PER_SECOND / 20) as i32;
const NUM_BLOCKS_AVERAGE_INIT_PHASE: usize = 20;
const NUM_BLOCKS_INITIAL_PHASE: usize = NUM_BLOCKS_PER_SECOND * 2;
const WINDOW_LENGTH: usize = 13;
const STATIONARITY_THRESHOLD: f32 = 10.0;

/// Slowly tracking render noise floor. The first blocks are averaged, after
/// which a decreasing step size is used for a couple of seconds.
#[derive(Debug)]
struct NoiseSpectrum {
    noise_spectrum: [f32; FFT_LENGTH_BY_2_PLUS_1],
    block_counter: usize,
}

impl NoiseSpectrum {
    fn new() -> Self {
        Self {
            noise_spectrum: [MIN_NOISE_POWER; FFT_LENGTH_BY_2_PLUS_1],
            block_counter: 0,
        }
    }

    #[cfg(test)]
    fn reset(&mut self) {
        self.block_counter = 0;
        self.noise_spectrum.fill(MIN_NOISE_POWER);
    }

    fn power(&self, band: usize) -> f32 {
        self.noise_spectrum[band]
    }

    fn update(&mut self, spectra: &[[f32; FFT_LENGTH_BY_2_PLUS_1]]) {
        let mut avg_spectrum = [0.0f32; FFT_LENGTH_BY_2_PLUS_1];
        let one_by_num_channels = 1.0 / spectra.len() as f32;
        for spectrum in spectra {
            for (avg, &x) in avg_spectrum.iter_mut().zip(spectrum.iter()) {
                *avg += x * one_by_num_channels;
            }
        }

        self.block_counter += 1;
        if self.block_counter <= NUM_BLOCKS_AVERAGE_INIT_PHASE {
            for (noise, &x) in self.noise_spectrum.iter_mut().zip(avg_spectrum.iter()) {
                *noise += x / NUM_BLOCKS_AVERAGE_INIT_PHASE as f32;
            }
            return;
        }

        let alpha = self.alpha();
        let past_initial_phase = self.block_counter > NUM_BLOCKS_INITIAL_PHASE;
        for (noise, &power) in self.noise_spectrum.iter_mut().zip(avg_spectrum.iter()) {
            if *noise < power {
                let mut alpha_inc = alpha * (*noise / power);
                if past_initial_phase && 10.0 * *noise < power {
                    alpha_inc *= 0.1;
                }
                *noise += alpha_inc * (power - *noise);
            } else {
                *noise = (*noise + alpha * (power - *noise)).max(MIN_NOISE_POWER);
            }
        }
    }

    fn alpha(&self) -> f32 {
        const ALPHA: f32 = 0.004;
        const ALPHA_INIT: f32 = 0.04;
        const TILT_ALPHA: f32 = (ALPHA_INIT - ALPHA) / NUM_BLOCKS_INITIAL_PHASE as f32;

        if self.block_counter > NUM_BLOCKS_INITIAL_PHASE + NUM_BLOCKS_AVERAGE_INIT_PHASE {
            ALPHA
        } else {
            let elapsed = self.block_counter - NUM_BLOCKS_AVERAGE_INIT_PHASE;
            ALPHA_INIT - TILT_ALPHA * elapsed as f32
        }
    }
}

/// A bin is stationary when the render power around the aligned block stays
/// within a fixed margin of the noise floor. Non-stationary bins hold their
/// state for a hangover period.
#[derive(Debug)]
pub(crate) struct StationarityEstimator {
    noise: NoiseSpectrum,
    hangovers: [i32; FFT_LENGTH_BY_2_PLUS_1],
    stationarity_flags: [bool; FFT_LENGTH_BY_2_PLUS_1],
}

impl StationarityEstimator {
    pub(crate) fn new() -> Self {
        Self {
            noise: NoiseSpectrum::new(),
            hangovers: [0; FFT_LENGTH_BY_2_PLUS_1],
            stationarity_flags: [false; FFT_LENGTH_BY_2_PLUS_1],
        }
    }

    #[cfg(test)]
    pub(crate) fn reset(&mut self) {
        self.noise.reset();
        self.hangovers.fill(0);
        self.stationarity_flags.fill(false);
    }

    pub(crate) fn update_noise_estimator(&mut self, spectra: &[[f32; FFT_LENGTH_BY_2_PLUS_1]]) {
        self.noise.update(spectra);
    }

    /// Re-evaluates every bin over a window ending `num_lookahead` slots
    /// ahead of `idx_current`.
    pub(crate) fn update_stationarity_flags(
        &mut self,
        spectrum_buffer: &SpectrumBuffer,
        reverb_spectrum: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        idx_current: usize,
        num_lookahead: usize,
    ) {
        let num_lookback = (WINDOW_LENGTH - 1) - num_lookahead.min(WINDOW_LENGTH - 1);
        let mut indexes = [0usize; WINDOW_LENGTH];
        indexes[0] = spectrum_buffer
            .index
            .offset_index(idx_current, num_lookback as i32);
        for k in 1..WINDOW_LENGTH {
            indexes[k] = spectrum_buffer.index.dec_index(indexes[k - 1]);
        }

        for band in 0..FFT_LENGTH_BY_2_PLUS_1 {
            self.stationarity_flags[band] =
                self.estimate_band_stationarity(spectrum_buffer, reverb_spectrum, &indexes, band);
        }
        self.update_hangover();
        self.smooth_stationary_per_freq();
    }

    pub(crate) fn is_band_stationary(&self, band: usize) -> bool {
        self.stationarity_flags[band] && self.hangovers[band] == 0
    }

    /// More than three quarters of the bins are stationary.
    pub(crate) fn is_block_stationary(&self) -> bool {
        let num_stationary = (0..FFT_LENGTH_BY_2_PLUS_1)
            .filter(|&band| self.is_band_stationary(band))
            .count();
        num_stationary as f32 / FFT_LENGTH_BY_2_PLUS_1 as f32 > 0.75
    }

    fn estimate_band_stationarity(
        &self,
        spectrum_buffer: &SpectrumBuffer,
        reverb_spectrum: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        indexes: &[usize; WINDOW_LENGTH],
        band: usize,
    ) -> bool {
        let one_by_num_channels = 1.0 / spectrum_buffer.num_channels() as f32;
        let window_power: f32 = indexes
            .iter()
            .flat_map(|&idx| spectrum_buffer.buffer[idx].iter())
            .map(|spectrum| spectrum[band] * one_by_num_channels)
            .sum();
        let noise = WINDOW_LENGTH as f32 * self.noise.power(band);
        debug_assert!(noise > 0.0);
        window_power + reverb_spectrum[band] < STATIONARITY_THRESHOLD * noise
    }

    fn update_hangover(&mut self) {
        let reduce_hangover = self.stationarity_flags.iter().all(|&s| s);
        for (hangover, &stationary) in self.hangovers.iter_mut().zip(self.stationarity_flags.iter()) {
            if !stationary {
                *hangover = HANGOVER_BLOCKS;
            } else if reduce_hangover {
                *hangover = (*hangover - 1).max(0);
            }
        }
    }

    fn smooth_stationary_per_freq(&mut self) {
        let flags = self.stationarity_flags;
        for k in 1..FFT_LENGTH_BY_2_PLUS_1 - 1 {
            self.stationarity_flags[k] = flags[k - 1] && flags[k] && flags[k + 1];
        }
        self.stationarity_flags[0] = self.stationarity_flags[1];
        self.stationarity_flags[FFT_LENGTH_BY_2_PLUS_1 - 1] =
            self.stationarity_flags[FFT_LENGTH_BY_2_PLUS_1 - 2];
    }
}
