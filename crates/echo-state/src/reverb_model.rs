//! Exponentially decaying reverberation tail over power spectra.

use crate::common::FFT_LENGTH_BY_2_PLUS_1;

#[derive(Debug, Clone)]
pub(crate) struct ReverbModel {
    reverb: [f32; FFT_LENGTH_BY_2_PLUS_1],
}

impl ReverbModel {
    pub(crate) fn new() -> Self {
        Self {
            reverb: [0.0; FFT_LENGTH_BY_2_PLUS_1],
        }
    }

    #[cfg(test)]
    pub(crate) fn reset(&mut self) {
        self.reverb.fill(0.0);
    }

    /// Current reverberation power per bin.
    pub(crate) fn reverb(&self) -> &[f32; FFT_LENGTH_BY_2_PLUS_1] {
        &self.reverb
    }

    /// Feeds `power_spectrum * scaling` into the tail and decays it.
    /// A non-positive `decay` leaves the tail untouched.
    pub(crate) fn update_reverb_no_freq_shaping(
        &mut self,
        power_spectrum: &[f32; FFT_LENGTH_BY_2_PLUS_1],
        scaling: f32,
        decay: f32,
    ) {
        if decay > 0.0 {
            for (rev, &p) in self.reverb.iter_mut().zip(power_spectrum.iter()) {
                *rev = (*rev + p * scaling) * decay;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_accumulates_and_decays() {
        let mut model = ReverbModel::new();
        let power = [10.0; FFT_LENGTH_BY_2_PLUS_1];
        model.update_reverb_no_freq_shaping(&power, 1.0, 0.5);
        assert!(model.reverb().iter().all(|&r| r == 5.0));
        model.update_reverb_no_freq_shaping(&[0.0; FFT_LENGTH_BY_2_PLUS_1], 1.0, 0.5);
        assert!(model.reverb().iter().all(|&r| r == 2.5));

        model.reset();
        assert!(model.reverb().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn non_positive_decay_freezes_tail() {
        let mut model = ReverbModel::new();
        let power = [3.0; FFT_LENGTH_BY_2_PLUS_1];
        model.update_reverb_no_freq_shaping(&power, 2.0, 0.5);
        model.update_reverb_no_freq_shaping(&power, 1.0, 0.0);
        model.update_reverb_no_freq_shaping(&power, 1.0, -0.3);
        assert!(model.reverb().iter().all(|&r| r == 3.0));
    }
}
