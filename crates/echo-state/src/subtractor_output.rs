//! Per-channel output of the main and shadow adaptive filters.

use crate::common::{BLOCK_SIZE, FFT_LENGTH_BY_2_PLUS_1};

/// Echo estimates `s_*` and residuals `e_*` of one capture channel, together
/// with the block powers and peaks derived from them.
#[derive(derive_more::Debug, Clone)]
pub struct SubtractorOutput {
    #[debug(skip)]
    pub s_main: [f32; BLOCK_SIZE],
    #[debug(skip)]
    pub s_shadow: [f32; BLOCK_SIZE],
    #[debug(skip)]
    pub e_main: [f32; BLOCK_SIZE],
    #[debug(skip)]
    pub e_shadow: [f32; BLOCK_SIZE],
    #[debug(skip)]
    pub e2_main: [f32; FFT_LENGTH_BY_2_PLUS_1],
    #[debug(skip)]
    pub e2_shadow: [f32; FFT_LENGTH_BY_2_PLUS_1],
    pub s2_main: f32,
    pub s2_shadow: f32,
    pub e2_main_sum: f32,
    pub e2_shadow_sum: f32,
    pub y2: f32,
    pub s_main_max_abs: f32,
    pub s_shadow_max_abs: f32,
}

impl Default for SubtractorOutput {
    fn default() -> Self {
        Self {
            s_main: [0.0; BLOCK_SIZE],
            s_shadow: [0.0; BLOCK_SIZE],
            e_main: [0.0; BLOCK_SIZE],
            e_shadow: [0.0; BLOCK_SIZE],
            e2_main: [0.0; FFT_LENGTH_BY_2_PLUS_1],
            e2_shadow: [0.0; FFT_LENGTH_BY_2_PLUS_1],
            s2_main: 0.0,
            s2_shadow: 0.0,
            e2_main_sum: 0.0,
            e2_shadow_sum: 0.0,
            y2: 0.0,
            s_main_max_abs: 0.0,
            s_shadow_max_abs: 0.0,
        }
    }
}

fn energy(x: &[f32]) -> f32 {
    x.iter().map(|&v| v * v).sum()
}

fn max_abs(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
}

impl SubtractorOutput {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Recomputes the block energies and peaks from the time-domain signals
    /// and the capture block `y`.
    pub fn compute_metrics(&mut self, y: &[f32]) {
        self.y2 = energy(y);
        self.e2_main_sum = energy(&self.e_main);
        self.e2_shadow_sum = energy(&self.e_shadow);
        self.s2_main = energy(&self.s_main);
        self.s2_shadow = energy(&self.s_shadow);
        self.s_main_max_abs = max_abs(&self.s_main);
        self.s_shadow_max_abs = max_abs(&self.s_shadow);
    }
}
