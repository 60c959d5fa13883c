//! The echo canceller state: per-block analysis of the adaptive filters,
//! render activity and echo estimates, and the decisions derived from them.

use crate::common::{FFT_LENGTH_BY_2, FFT_LENGTH_BY_2_PLUS_1, NUM_BLOCKS_PER_SECOND};
use crate::config::EchoStateConfig;
use crate::data_dumper::DataDumper;
use crate::delay_estimate::DelayEstimate;
use crate::echo_audibility::EchoAudibility;
use crate::echo_path_variability::{DelayAdjustment, EchoPathVariability};
use crate::erl_estimator::ErlEstimator;
use crate::erle_estimator::ErleEstimator;
use crate::filter_analyzer::FilterAnalyzer;
use crate::filter_delay::FilterDelay;
use crate::filtering_quality::FilteringQualityAnalyzer;
use crate::initial_state::InitialState;
use crate::render_buffer::RenderBuffer;
use crate::reverb_model::ReverbModel;
use crate::reverb_model_estimator::ReverbModelEstimator;
use crate::reverb_power::update_and_compute_reverb;
use crate::saturation_detector::SaturationDetector;
use crate::subtractor_output::SubtractorOutput;
use crate::subtractor_output_analyzer::SubtractorOutputAnalyzer;
use crate::transparent_mode::{FilterObservation, TransparentMode};

/// Blocks the ERL and ERLE estimators wait after a reset before adapting.
const ESTIMATOR_STARTUP_PHASE_BLOCKS: usize = 2 * NUM_BLOCKS_PER_SECOND;

/// Tracks the state of an echo canceller across blocks.
///
/// [`update`](Self::update) must be called exactly once per 64-sample block,
/// after the adaptive filters have processed it. The accessors then describe
/// the state for that block.
#[derive(derive_more::Debug)]
pub struct AecState {
    config: EchoStateConfig,
    #[debug(skip)]
    data_dumper: Option<Box<dyn DataDumper + Send>>,
    initial_state: InitialState,
    delay_state: FilterDelay,
    transparent_state: TransparentMode,
    filter_quality_state: FilteringQualityAnalyzer,
    saturation_detector: SaturationDetector,
    erl_estimator: ErlEstimator,
    erle_estimator: ErleEstimator,
    filter_analyzers: Box<[FilterAnalyzer]>,
    subtractor_output_analyzers: Box<[SubtractorOutputAnalyzer]>,
    echo_audibility: EchoAudibility,
    reverb_model: ReverbModel,
    reverb_model_estimator: ReverbModelEstimator,
    capture_signal_saturation: bool,
    blocks_with_active_render: usize,
    strong_not_saturated_render_blocks: usize,
}

impl AecState {
    /// Creates the state for `num_capture_channels` capture channels.
    ///
    /// The configuration is validated first. Out-of-range values are clamped
    /// and reported with a warning.
    pub fn new(config: &EchoStateConfig, num_capture_channels: usize) -> Self {
        debug_assert!(num_capture_channels > 0);
        let mut config = config.clone();
        if !config.validate() {
            tracing::warn!(?config, "echo state config out of range, values were clamped");
        }

        Self {
            initial_state: InitialState::new(&config),
            delay_state: FilterDelay::new(&config),
            transparent_state: TransparentMode::new(&config),
            filter_quality_state: FilteringQualityAnalyzer::new(),
            saturation_detector: SaturationDetector::new(),
            erl_estimator: ErlEstimator::new(ESTIMATOR_STARTUP_PHASE_BLOCKS),
            erle_estimator: ErleEstimator::new(ESTIMATOR_STARTUP_PHASE_BLOCKS, &config),
            filter_analyzers: (0..num_capture_channels)
                .map(|_| FilterAnalyzer::new(&config))
                .collect(),
            subtractor_output_analyzers: (0..num_capture_channels)
                .map(|_| SubtractorOutputAnalyzer::new())
                .collect(),
            echo_audibility: EchoAudibility::new(
                config.echo_audibility.use_stationarity_properties_at_init,
            ),
            reverb_model: ReverbModel::new(),
            reverb_model_estimator: ReverbModelEstimator::new(&config),
            capture_signal_saturation: false,
            blocks_with_active_render: 0,
            strong_not_saturated_render_blocks: 0,
            data_dumper: None,
            config,
        }
    }

    /// Installs a sink for per-block diagnostics, or removes it with `None`.
    pub fn set_data_dumper(&mut self, data_dumper: Option<Box<dyn DataDumper + Send>>) {
        self.data_dumper = data_dumper;
    }

    /// The validated configuration in use.
    pub fn config(&self) -> &EchoStateConfig {
        &self.config
    }

    pub fn num_capture_channels(&self) -> usize {
        self.filter_analyzers.len()
    }

    /// Returns whether the echo signal is saturated.
    pub fn saturated_echo(&self) -> bool {
        self.saturation_detector.saturated_echo()
    }

    /// Returns whether the capture signal is saturated.
    pub fn saturated_capture(&self) -> bool {
        self.capture_signal_saturation
    }

    /// Sets the capture saturation flag for the upcoming update.
    pub fn update_capture_saturation(&mut self, capture_signal_saturation: bool) {
        self.capture_signal_saturation = capture_signal_saturation;
    }

    /// Returns whether the linear filter output is good enough to use.
    pub fn usable_linear_estimate(&self) -> bool {
        self.filter_quality_state.linear_filter_output_usable()
            && self.config.filter.use_linear_filter
    }

    /// Returns whether echo removal should be disabled.
    pub fn transparent_mode_active(&self) -> bool {
        self.transparent_state.active()
    }

    /// Direct-path delay between render and capture, in blocks.
    pub fn filter_delay_blocks(&self) -> i32 {
        self.delay_state.direct_path_filter_delay()
    }

    /// Whether an external delay estimate has ever been supplied.
    pub fn external_delay_reported(&self) -> bool {
        self.delay_state.external_delay_reported()
    }

    /// Echo Return Loss per frequency bin.
    pub fn erl(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        self.erl_estimator.erl()
    }

    /// Fullband Echo Return Loss.
    pub fn erl_time_domain(&self) -> f32 {
        self.erl_estimator.erl_time_domain()
    }

    /// Echo Return Loss Enhancement per frequency bin.
    pub fn erle(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        self.erle_estimator.erle()
    }

    /// Fullband Echo Return Loss Enhancement in log2 units.
    pub fn fullband_erle_log2(&self) -> f32 {
        self.erle_estimator.fullband_erle_log2()
    }

    /// Uncertainty of the ERLE estimate. Only known when the echo saturates,
    /// in which case nothing can be assumed about the removal.
    pub fn erle_uncertainty(&self) -> Option<f32> {
        self.saturated_echo().then_some(1.0)
    }

    /// Decay of the reverberant echo per block.
    pub fn reverb_decay(&self) -> f32 {
        self.reverb_model_estimator.reverb_decay()
    }

    /// Frequency response of the reverberant echo tail.
    pub fn reverb_frequency_response(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        self.reverb_model_estimator.frequency_response()
    }

    /// Writes per-bin residual echo scaling factors: 0 where the echo is
    /// masked by stationary render, 1 elsewhere.
    pub fn residual_echo_scaling(&self, residual_scaling: &mut [f32; FFT_LENGTH_BY_2_PLUS_1]) {
        let required_blocks = if self.config.filter.conservative_initial_phase {
            1.5 * NUM_BLOCKS_PER_SECOND as f32
        } else {
            0.8 * NUM_BLOCKS_PER_SECOND as f32
        };
        let filter_has_had_time_to_converge =
            self.strong_not_saturated_render_blocks as f32 >= required_blocks;
        self.echo_audibility
            .residual_echo_scaling(filter_has_had_time_to_converge, residual_scaling);
    }

    /// Whether render stationarity is used to scale the residual echo.
    pub fn use_stationarity_properties(&self) -> bool {
        self.config.echo_audibility.use_stationarity_properties
    }

    /// Whether the canceller is still in its startup phase.
    pub fn initial_state_active(&self) -> bool {
        self.initial_state.initial_state_active()
    }

    /// Whether the startup phase ended on the latest update.
    pub fn transition_triggered(&self) -> bool {
        self.initial_state.transition_triggered()
    }

    /// Blocks with active render since the last full reset.
    pub fn blocks_with_active_render(&self) -> usize {
        self.blocks_with_active_render
    }

    /// Blocks with active render and unsaturated capture since the last full
    /// reset.
    pub fn strong_not_saturated_render_blocks(&self) -> usize {
        self.strong_not_saturated_render_blocks
    }

    /// Resets the parts of the state affected by an echo path change.
    ///
    /// A delay change restarts all analysis. A gain change alone only
    /// restarts the ERLE estimation.
    pub fn handle_echo_path_change(&mut self, echo_path_variability: &EchoPathVariability) {
        if echo_path_variability.delay_change != DelayAdjustment::None {
            tracing::debug!(
                delay_change = ?echo_path_variability.delay_change,
                "echo path delay changed, resetting echo state"
            );
            for analyzer in self.filter_analyzers.iter_mut() {
                analyzer.reset();
            }
            self.capture_signal_saturation = false;
            self.strong_not_saturated_render_blocks = 0;
            self.blocks_with_active_render = 0;
            self.initial_state.reset();
            self.transparent_state.reset();
            self.erle_estimator.reset(true);
            self.erl_estimator.reset();
            self.filter_quality_state.reset();
        } else if echo_path_variability.gain_change {
            tracing::debug!("echo path gain changed, resetting ERLE");
            self.erle_estimator.reset(false);
        }

        for analyzer in self.subtractor_output_analyzers.iter_mut() {
            analyzer.handle_echo_path_change();
        }
    }

    /// Updates the state with the filters and signals of one block.
    ///
    /// All per-channel slices must hold one entry per capture channel.
    #[allow(clippy::too_many_arguments, reason = "one argument per per-block signal")]
    pub fn update(
        &mut self,
        external_delay: Option<&DelayEstimate>,
        filter_frequency_responses: &[Vec<[f32; FFT_LENGTH_BY_2_PLUS_1]>],
        filter_impulse_responses: &[Vec<f32>],
        render_buffer: &RenderBuffer<'_>,
        e2_main: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        y2: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        subtractor_outputs: &[SubtractorOutput],
    ) {
        let num_capture_channels = self.filter_analyzers.len();
        debug_assert_eq!(num_capture_channels, subtractor_outputs.len());
        debug_assert_eq!(num_capture_channels, filter_frequency_responses.len());
        debug_assert_eq!(num_capture_channels, filter_impulse_responses.len());

        let mut any_filter_converged = false;
        let mut all_filters_diverged = true;
        let mut any_filter_consistent = false;
        let mut max_echo_path_gain = 0.0f32;
        for (((output_analyzer, filter_analyzer), output), impulse_response) in self
            .subtractor_output_analyzers
            .iter_mut()
            .zip(self.filter_analyzers.iter_mut())
            .zip(subtractor_outputs)
            .zip(filter_impulse_responses)
        {
            output_analyzer.update(output);
            any_filter_converged |= output_analyzer.converged_filter();
            all_filters_diverged &= output_analyzer.diverged_filter();

            filter_analyzer.update(impulse_response, render_buffer);
            any_filter_consistent |= filter_analyzer.consistent();
            max_echo_path_gain = max_echo_path_gain.max(filter_analyzer.gain());
        }

        if self.config.filter.use_linear_filter {
            self.delay_state.update(
                &self.filter_analyzers,
                external_delay,
                self.strong_not_saturated_render_blocks,
            );
        }
        let delay_blocks = self.delay_state.direct_path_filter_delay();

        let aligned_render_block = render_buffer.block(-delay_blocks);
        let saturated_capture = self.capture_signal_saturation;

        let active_render_threshold = self.config.render_levels.active_render_limit
            * self.config.render_levels.active_render_limit
            * FFT_LENGTH_BY_2 as f32;
        let active_render = aligned_render_block
            .band(0)
            .any(|x| x.iter().map(|&v| v * v).sum::<f32>() > active_render_threshold);
        if active_render {
            self.blocks_with_active_render += 1;
            if !saturated_capture {
                self.strong_not_saturated_render_blocks += 1;
            }
        }

        let mut x2_reverb = [0.0f32; FFT_LENGTH_BY_2_PLUS_1];
        let reverb_decay = self.reverb_model_estimator.reverb_decay();
        update_and_compute_reverb(
            render_buffer.spectrum_buffer(),
            delay_blocks,
            reverb_decay,
            &mut self.reverb_model,
            &mut x2_reverb,
        );

        if self.config.echo_audibility.use_stationarity_properties {
            self.echo_audibility.update(
                render_buffer,
                self.reverb_model.reverb(),
                delay_blocks,
                self.delay_state.external_delay_reported(),
            );
        }

        if self.initial_state.transition_triggered() {
            self.erle_estimator.reset(false);
        }

        let reference_converged = self
            .subtractor_output_analyzers
            .first()
            .is_some_and(SubtractorOutputAnalyzer::converged_filter);
        self.erle_estimator.update(
            &x2_reverb,
            y2,
            e2_main,
            reference_converged,
            self.config.erle.onset_detection,
        );
        let x2 = &render_buffer.spectrum(delay_blocks)[0];
        self.erl_estimator.update(reference_converged, x2, y2);

        let usable_linear_estimate = self.usable_linear_estimate();
        self.saturation_detector.update(
            aligned_render_block.band(0),
            saturated_capture,
            usable_linear_estimate,
            subtractor_outputs,
            max_echo_path_gain,
        );

        self.initial_state.update(active_render, saturated_capture);
        if self.initial_state.transition_triggered() {
            tracing::debug!(
                blocks = self.strong_not_saturated_render_blocks,
                "initial state ended"
            );
        }

        let was_transparent = self.transparent_state.active();
        self.transparent_state.update(&FilterObservation {
            filter_delay_blocks: delay_blocks,
            any_filter_consistent,
            any_filter_converged,
            all_filters_diverged,
            active_render,
            saturated_capture,
        });
        if was_transparent != self.transparent_state.active() {
            tracing::debug!(active = !was_transparent, "transparent mode changed");
        }

        let transparent_mode = self.transparent_state.active();
        self.filter_quality_state.update(
            active_render,
            transparent_mode,
            saturated_capture,
            external_delay,
            any_filter_converged,
        );

        let stationary_block = self.config.echo_audibility.use_stationarity_properties
            && self.echo_audibility.is_block_stationary();
        let usable_linear_estimate = self.usable_linear_estimate();
        self.reverb_model_estimator.update(
            self.filter_analyzers[0].adjusted_filter(),
            &filter_frequency_responses[0],
            self.erle_estimator.inst_linear_quality_estimate(),
            delay_blocks,
            usable_linear_estimate,
            stationary_block,
        );

        if let Some(mut dumper) = self.data_dumper.take() {
            self.dump(
                dumper.as_mut(),
                external_delay.is_some(),
                any_filter_consistent,
                any_filter_converged,
                all_filters_diverged,
            );
            self.data_dumper = Some(dumper);
        }
    }

    fn dump(
        &self,
        dumper: &mut dyn DataDumper,
        external_delay_available: bool,
        any_filter_consistent: bool,
        any_filter_converged: bool,
        all_filters_diverged: bool,
    ) {
        self.erle_estimator.dump(dumper);
        self.reverb_model_estimator.dump(dumper);
        dumper.dump_f32_slice("aec3_erl", self.erl());
        dumper.dump_f32("aec3_erl_time_domain", self.erl_time_domain());
        dumper.dump_f32_slice("aec3_erle", self.erle());
        dumper.dump_bool("aec3_usable_linear_estimate", self.usable_linear_estimate());
        dumper.dump_bool("aec3_transparent_mode", self.transparent_mode_active());
        dumper.dump_i32("aec3_filter_delay", self.filter_analyzers[0].delay_blocks());
        dumper.dump_bool("aec3_any_filter_consistent", any_filter_consistent);
        dumper.dump_bool("aec3_initial_state", self.initial_state_active());
        dumper.dump_bool("aec3_capture_saturation", self.saturated_capture());
        dumper.dump_bool("aec3_echo_saturation", self.saturated_echo());
        dumper.dump_bool("aec3_any_filter_converged", any_filter_converged);
        dumper.dump_bool("aec3_all_filters_diverged", all_filters_diverged);
        dumper.dump_i32(
            "aec3_external_delay_avaliable",
            i32::from(external_delay_available),
        );
        dumper.dump_f32_slice(
            "aec3_filter_tail_freq_resp_est",
            self.reverb_frequency_response(),
        );
    }
}
