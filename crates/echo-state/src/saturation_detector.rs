//! Detection of saturated echo, as opposed to a saturated microphone alone.

use crate::subtractor_output::SubtractorOutput;

/// Echo estimate amplitude above which the echo is assumed to be clipped.
const LINEAR_SATURATION_THRESHOLD: f32 = 20000.0;
/// Predicted echo amplitude above which the echo is assumed to be clipped.
const PREDICTED_SATURATION_THRESHOLD: f32 = 32000.0;
/// Margin applied to the echo path gain when predicting the echo peak.
const ECHO_PATH_GAIN_MARGIN: f32 = 10.0;

#[derive(Debug, Default)]
pub(crate) struct SaturationDetector {
    saturated_echo: bool,
}

impl SaturationDetector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `x` holds the aligned render block, one slice per render channel.
    pub(crate) fn update<'a>(
        &mut self,
        x: impl IntoIterator<Item = &'a [f32]>,
        saturated_capture: bool,
        usable_linear_estimate: bool,
        subtractor_outputs: &[SubtractorOutput],
        echo_path_gain: f32,
    ) {
        if !saturated_capture {
            self.saturated_echo = false;
            return;
        }

        self.saturated_echo = if usable_linear_estimate {
            subtractor_outputs.iter().any(|output| {
                output.s_main_max_abs > LINEAR_SATURATION_THRESHOLD
                    || output.s_shadow_max_abs > LINEAR_SATURATION_THRESHOLD
            })
        } else {
            let max_sample = x
                .into_iter()
                .flat_map(|channel| channel.iter())
                .fold(0.0f32, |acc, &v| acc.max(v.abs()));
            max_sample * echo_path_gain * ECHO_PATH_GAIN_MARGIN > PREDICTED_SATURATION_THRESHOLD
        };
    }

    pub(crate) fn saturated_echo(&self) -> bool {
        self.saturated_echo
    }
}
