//! Tuning parameters read by the echo canceller state.
//!
//! All values are read once at construction. Use
//! [`validate()`](EchoStateConfig::validate) to clamp parameters to ranges
//! the estimators can cope with.

/// Configuration of [`AecState`](crate::AecState) and its estimators.
#[derive(Debug, Clone, Default)]
pub struct EchoStateConfig {
    /// Delay alignment settings.
    pub delay: Delay,
    /// Adaptive filter settings.
    pub filter: Filter,
    /// Echo Return Loss Enhancement (ERLE) estimation settings.
    pub erle: Erle,
    /// Echo path strength settings.
    pub ep_strength: EpStrength,
    /// Render stationarity based audibility settings.
    pub echo_audibility: EchoAudibility,
    /// Render signal power thresholds.
    pub render_levels: RenderLevels,
    /// Assumptions about the echo path.
    pub echo_removal_control: EchoRemovalControl,
}

impl EchoStateConfig {
    /// Validates and clamps config parameters to reasonable ranges.
    /// Returns `true` if no changes were needed.
    pub fn validate(&mut self) -> bool {
        let mut ok = true;

        ok &= limit_usize(&mut self.delay.delay_headroom_samples, 0, 5000);

        // The reverb decay estimator needs room for the direct path plus the
        // early reflections in front of the tail.
        ok &= limit_usize(&mut self.filter.refined_length_blocks, 5, 50);
        ok &= limit_f32(&mut self.filter.initial_state_seconds, 0.0, 100.0);

        ok &= limit_f32(&mut self.erle.min, 1.0, 100_000.0);
        ok &= limit_f32(&mut self.erle.max_l, 1.0, 100_000.0);
        ok &= limit_f32(&mut self.erle.max_h, 1.0, 100_000.0);
        if self.erle.min > self.erle.max_l || self.erle.min > self.erle.max_h {
            self.erle.min = self.erle.max_l.min(self.erle.max_h);
            ok = false;
        }

        ok &= limit_f32(&mut self.ep_strength.default_gain, 0.0, 1_000_000.0);
        ok &= limit_f32(&mut self.ep_strength.default_len, -1.0, 1.0);

        let max_power = 32768.0f32 * 32768.0;
        ok &= limit_f32(&mut self.render_levels.active_render_limit, 0.0, max_power);

        ok
    }
}

fn limit_f32(value: &mut f32, min: f32, max: f32) -> bool {
    let clamped = value.clamp(min, max);
    let clamped = if clamped.is_finite() { clamped } else { min };
    let unchanged = *value == clamped;
    *value = clamped;
    unchanged
}

fn limit_usize(value: &mut usize, min: usize, max: usize) -> bool {
    let clamped = (*value).clamp(min, max);
    let unchanged = *value == clamped;
    *value = clamped;
    unchanged
}

#[derive(Debug, Clone)]
pub struct Delay {
    /// Samples of margin the render buffer keeps ahead of the echo. Used as
    /// the coarse filter delay until the filter has adapted.
    pub delay_headroom_samples: usize,
}

impl Default for Delay {
    fn default() -> Self {
        Self {
            delay_headroom_samples: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    /// Number of 64-sample partitions in the main adaptive filter.
    pub refined_length_blocks: usize,
    /// Duration of the startup phase, in seconds of active render.
    pub initial_state_seconds: f32,
    /// Uses a fixed, longer startup phase instead of `initial_state_seconds`.
    pub conservative_initial_phase: bool,
    /// Whether the linear filter output is used at all.
    pub use_linear_filter: bool,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            refined_length_blocks: 13,
            initial_state_seconds: 2.5,
            conservative_initial_phase: false,
            use_linear_filter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Erle {
    pub min: f32,
    /// Upper ERLE bound for the lower half of the spectrum.
    pub max_l: f32,
    /// Upper ERLE bound for the upper half of the spectrum.
    pub max_h: f32,
    pub onset_detection: bool,
    pub clamp_quality_estimate_to_zero: bool,
    pub clamp_quality_estimate_to_one: bool,
}

impl Default for Erle {
    fn default() -> Self {
        Self {
            min: 1.0,
            max_l: 4.0,
            max_h: 1.5,
            onset_detection: true,
            clamp_quality_estimate_to_zero: true,
            clamp_quality_estimate_to_one: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpStrength {
    /// Echo path gain assumed before the filter analysis has an estimate.
    pub default_gain: f32,
    /// Reverb decay per block. A negative value enables adaptive decay
    /// estimation starting from `|default_len|`.
    pub default_len: f32,
    /// The echo path is known to attenuate, so transparent mode is disabled.
    pub bounded_erl: bool,
}

impl Default for EpStrength {
    fn default() -> Self {
        Self {
            default_gain: 1.0,
            default_len: 0.83,
            bounded_erl: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EchoAudibility {
    pub use_stationarity_properties: bool,
    pub use_stationarity_properties_at_init: bool,
}

#[derive(Debug, Clone)]
pub struct RenderLevels {
    /// Per-sample RMS above which a render block counts as active.
    pub active_render_limit: f32,
}

impl Default for RenderLevels {
    fn default() -> Self {
        Self {
            active_render_limit: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EchoRemovalControl {
    /// Echo path changes are rare, so a path reset also forgets recent
    /// convergence.
    pub linear_and_stable_echo_path: bool,
}
