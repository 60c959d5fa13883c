//! Combines the delayed render power with the reverberation tail.

use crate::common::FFT_LENGTH_BY_2_PLUS_1;
use crate::reverb_model::ReverbModel;
use crate::spectrum_buffer::SpectrumBuffer;

fn sum_channels(
    spectra: &[[f32; FFT_LENGTH_BY_2_PLUS_1]],
    out: &mut [f32; FFT_LENGTH_BY_2_PLUS_1],
) {
    match spectra {
        [single] => out.copy_from_slice(single),
        _ => {
            out.fill(0.0);
            for spectrum in spectra {
                for (o, &x) in out.iter_mut().zip(spectrum.iter()) {
                    *o += x;
                }
            }
        }
    }
}

/// Advances `reverb_model` with the render power just older than the direct
/// path and writes the direct-path power plus the reverb tail to `reverb_power`.
pub(crate) fn update_and_compute_reverb(
    spectrum_buffer: &SpectrumBuffer,
    delay_blocks: i32,
    reverb_decay: f32,
    reverb_model: &mut ReverbModel,
    reverb_power: &mut [f32; FFT_LENGTH_BY_2_PLUS_1],
) {
    let index = &spectrum_buffer.index;
    let idx_at_delay = index.offset_index(index.read, delay_blocks);
    let idx_past = index.inc_index(idx_at_delay);

    sum_channels(&spectrum_buffer.buffer[idx_past], reverb_power);
    reverb_model.update_reverb_no_freq_shaping(reverb_power, 1.0, reverb_decay);

    sum_channels(&spectrum_buffer.buffer[idx_at_delay], reverb_power);
    for (p, &r) in reverb_power.iter_mut().zip(reverb_model.reverb().iter()) {
        *p += r;
    }
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use test_strategy::proptest;

    use super::*;

    fn buffer_with_history(frames: &[f32], num_channels: usize) -> SpectrumBuffer {
        let mut buffer = SpectrumBuffer::new(frames.len(), num_channels);
        for &value in frames {
            let spectra = vec![[value; FFT_LENGTH_BY_2_PLUS_1]; num_channels];
            buffer.insert(&spectra);
        }
        buffer
    }

    #[test]
    fn zero_decay_returns_delayed_power() {
        let buffer = buffer_with_history(&[0.0, 0.0, 7.0, 0.0], 1);
        let mut model = ReverbModel::new();
        let mut power = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        // Newest insert sits at the read cursor, so offset 1 is the frame
        // inserted just before it.
        update_and_compute_reverb(&buffer, 1, 0.0, &mut model, &mut power);
        assert!(power.iter().all(|&p| p == 7.0));
        assert!(model.reverb().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn channels_are_summed() {
        let buffer = buffer_with_history(&[1.0, 2.0, 3.0], 2);
        let mut model = ReverbModel::new();
        let mut power = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        update_and_compute_reverb(&buffer, 0, 0.5, &mut model, &mut power);
        // Tail fed with the older frame (2 + 2) and decayed by half.
        assert!(model.reverb().iter().all(|&r| r == 2.0));
        assert!(power.iter().all(|&p| p == 6.0 + 2.0));
    }

    #[proptest]
    fn output_is_delayed_power_plus_tail(
        #[strategy(vec(0.0f32..1e6, 4..16))] frames: Vec<f32>,
        #[strategy(0..4i32)] delay: i32,
        #[strategy(0.0f32..0.95)] decay: f32,
    ) {
        let buffer = buffer_with_history(&frames, 1);
        let mut model = ReverbModel::new();
        let mut power = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        update_and_compute_reverb(&buffer, delay, decay, &mut model, &mut power);

        let index = &buffer.index;
        let delayed = buffer.buffer[index.offset_index(index.read, delay)][0];
        for k in 0..FFT_LENGTH_BY_2_PLUS_1 {
            assert!(power[k] >= 0.0);
            assert_eq!(power[k], delayed[k] + model.reverb()[k]);
        }
    }
}
