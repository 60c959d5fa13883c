//! Render stationarity based audibility of the residual echo.
//!
//! Bins where the render signal is stationary, and close to its own noise
//! floor, produce echo that is masked by the render noise itself. Those bins
//! get a zero residual echo scaling.

use crate::block_buffer::BlockBuffer;
use crate::common::FFT_LENGTH_BY_2_PLUS_1;
use crate::render_buffer::RenderBuffer;
use crate::spectrum_buffer::SpectrumBuffer;
use crate::stationarity_estimator::StationarityEstimator;

/// Render blocks whose peak stays below this are treated as silence.
const RENDER_TOO_LOW_LEVEL: f32 = 10.0;

#[derive(Debug)]
pub(crate) struct EchoAudibility {
    render_spectrum_write_prev: Option<usize>,
    render_block_write_prev: usize,
    non_zero_render_seen: bool,
    use_render_stationarity_at_init: bool,
    render_stationarity: StationarityEstimator,
}

impl EchoAudibility {
    pub(crate) fn new(use_render_stationarity_at_init: bool) -> Self {
        Self {
            render_spectrum_write_prev: None,
            render_block_write_prev: 0,
            non_zero_render_seen: false,
            use_render_stationarity_at_init,
            render_stationarity: StationarityEstimator::new(),
        }
    }

    pub(crate) fn update(
        &mut self,
        render_buffer: &RenderBuffer<'_>,
        reverb_spectrum: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        delay_blocks: i32,
        external_delay_seen: bool,
    ) {
        self.update_render_noise_estimator(
            render_buffer.spectrum_buffer(),
            render_buffer.block_buffer(),
            external_delay_seen,
        );

        if external_delay_seen || self.use_render_stationarity_at_init {
            let spectrum_buffer = render_buffer.spectrum_buffer();
            let idx_at_delay = spectrum_buffer
                .index
                .offset_index(spectrum_buffer.index.read, delay_blocks);
            let num_lookahead = (render_buffer.headroom() as i32 - delay_blocks + 1).max(0);
            self.render_stationarity.update_stationarity_flags(
                spectrum_buffer,
                reverb_spectrum,
                idx_at_delay,
                num_lookahead as usize,
            );
        }
    }

    /// Writes 0 for bins whose echo is masked by stationary render and 1
    /// elsewhere.
    pub(crate) fn residual_echo_scaling(
        &self,
        filter_has_had_time_to_converge: bool,
        residual_scaling: &mut [f32; FFT_LENGTH_BY_2_PLUS_1],
    ) {
        let use_stationarity = filter_has_had_time_to_converge || self.use_render_stationarity_at_init;
        for (band, scaling) in residual_scaling.iter_mut().enumerate() {
            *scaling = if use_stationarity && self.render_stationarity.is_band_stationary(band) {
                0.0
            } else {
                1.0
            };
        }
    }

    pub(crate) fn is_block_stationary(&self) -> bool {
        self.render_stationarity.is_block_stationary()
    }

    /// Feeds the spectra from the previous newest slot up to, but not
    /// including, the current newest slot to the noise floor tracker, once
    /// render that is not silent has been observed.
    fn update_render_noise_estimator(
        &mut self,
        spectrum_buffer: &SpectrumBuffer,
        block_buffer: &BlockBuffer,
        external_delay_seen: bool,
    ) {
        let Some(write_prev) = self.render_spectrum_write_prev else {
            self.render_spectrum_write_prev = Some(spectrum_buffer.index.write);
            self.render_block_write_prev = block_buffer.index.write;
            return;
        };

        let write_current = spectrum_buffer.index.write;
        if !self.non_zero_render_seen && !external_delay_seen {
            self.non_zero_render_seen = !self.is_render_too_low(block_buffer);
        }

        if self.non_zero_render_seen {
            let mut idx = write_prev;
            while idx != write_current {
                self.render_stationarity
                    .update_noise_estimator(&spectrum_buffer.buffer[idx]);
                idx = spectrum_buffer.index.dec_index(idx);
            }
        }

        self.render_spectrum_write_prev = Some(write_current);
    }

    /// Whether any block from the previous newest slot up to the current one
    /// is silent. No new blocks also counts as silent.
    fn is_render_too_low(&mut self, block_buffer: &BlockBuffer) -> bool {
        let write_current = block_buffer.index.write;
        let mut too_low = write_current == self.render_block_write_prev;

        let mut idx = self.render_block_write_prev;
        while !too_low && idx != write_current {
            let max_abs = block_buffer.buffer[idx]
                .band(0)
                .flat_map(|channel| channel.iter())
                .fold(0.0f32, |acc, &x| acc.max(x.abs()));
            too_low = max_abs < RENDER_TOO_LOW_LEVEL;
            idx = block_buffer.index.dec_index(idx);
        }

        self.render_block_write_prev = write_current;
        too_low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    struct RenderHistory {
        blocks: BlockBuffer,
        spectra: SpectrumBuffer,
    }

    impl RenderHistory {
        fn new() -> Self {
            Self {
                blocks: BlockBuffer::new(20, 1, 1),
                spectra: SpectrumBuffer::new(20, 1),
            }
        }

        fn push(&mut self, amplitude: f32, power: f32) {
            self.blocks.insert(&Block::new_with_value(1, 1, amplitude));
            self.spectra.insert(&[[power; FFT_LENGTH_BY_2_PLUS_1]]);
        }

        fn view(&self) -> RenderBuffer<'_> {
            RenderBuffer::new(&self.blocks, &self.spectra)
        }
    }

    #[test]
    fn silent_render_keeps_noise_tracker_idle() {
        let mut history = RenderHistory::new();
        let mut audibility = EchoAudibility::new(false);
        let reverb = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        for _ in 0..30 {
            history.push(0.0, 0.0);
            audibility.update(&history.view(), &reverb, 0, false);
        }
        assert!(!audibility.non_zero_render_seen);
    }

    #[test]
    fn audible_render_is_detected() {
        let mut history = RenderHistory::new();
        let mut audibility = EchoAudibility::new(false);
        let reverb = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        for _ in 0..3 {
            history.push(1000.0, 1e6);
            audibility.update(&history.view(), &reverb, 0, false);
        }
        assert!(audibility.non_zero_render_seen);
    }

    #[test]
    fn walk_starts_at_previous_newest_block() {
        let mut history = RenderHistory::new();
        let mut audibility = EchoAudibility::new(false);
        let reverb = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        history.push(1000.0, 1e6);
        audibility.update(&history.view(), &reverb, 0, false);

        // The silent block just written is not examined until the next call.
        history.push(0.0, 0.0);
        audibility.update(&history.view(), &reverb, 0, false);
        assert!(audibility.non_zero_render_seen);
    }

    #[test]
    fn newest_block_is_examined_on_the_following_call() {
        let mut history = RenderHistory::new();
        let mut audibility = EchoAudibility::new(false);
        let reverb = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        history.push(0.0, 0.0);
        audibility.update(&history.view(), &reverb, 0, false);

        history.push(1000.0, 1e6);
        audibility.update(&history.view(), &reverb, 0, false);
        assert!(!audibility.non_zero_render_seen);

        history.push(1000.0, 1e6);
        audibility.update(&history.view(), &reverb, 0, false);
        assert!(audibility.non_zero_render_seen);
    }

    #[test]
    fn scaling_is_one_without_stationarity() {
        let audibility = EchoAudibility::new(false);
        let mut scaling = [0.5; FFT_LENGTH_BY_2_PLUS_1];
        audibility.residual_echo_scaling(true, &mut scaling);
        assert!(scaling.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn stationary_render_zeros_scaling_once_converged() {
        let mut history = RenderHistory::new();
        let mut audibility = EchoAudibility::new(false);
        let reverb = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        for _ in 0..100 {
            history.push(20.0, 50.0);
            audibility.update(&history.view(), &reverb, 0, true);
        }
        assert!(audibility.is_block_stationary());

        let mut scaling = [1.0; FFT_LENGTH_BY_2_PLUS_1];
        audibility.residual_echo_scaling(false, &mut scaling);
        assert!(scaling.iter().all(|&s| s == 1.0));
        audibility.residual_echo_scaling(true, &mut scaling);
        assert!(scaling.iter().all(|&s| s == 0.0));
    }
}
