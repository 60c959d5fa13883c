#![no_main]

use arbitrary::Arbitrary;
use echo_state::{
    AecState, BLOCK_SIZE, Block, BlockBuffer, DelayAdjustment, DelayEstimate,
    DelayEstimateQuality, EchoPathVariability, EchoStateConfig, FFT_LENGTH_BY_2_PLUS_1,
    RenderBuffer, SpectrumBuffer, SubtractorOutput,
};
use libfuzzer_sys::fuzz_target;

const BUFFER_SIZE: usize = 30;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    num_channels: u8,
    use_stationarity: bool,
    adaptive_decay: bool,
    filter_peaks: Vec<u16>,
    blocks: Vec<FuzzBlock>,
}

#[derive(Debug, Arbitrary)]
struct FuzzBlock {
    render_level: i16,
    echo_level: i16,
    residual_level: i16,
    capture_saturated: bool,
    external_delay: Option<u8>,
    path_change: u8,
}

fuzz_target!(|input: FuzzInput| {
    let mut config = EchoStateConfig::default();
    config.echo_audibility.use_stationarity_properties = input.use_stationarity;
    if input.adaptive_decay {
        config.ep_strength.default_len = -config.ep_strength.default_len;
    }
    let num_channels = usize::from(input.num_channels % 4) + 1;
    let filter_len = config.filter.refined_length_blocks * BLOCK_SIZE;

    let impulse_responses: Vec<Vec<f32>> = (0..num_channels)
        .map(|ch| {
            let mut h = vec![0.0; filter_len];
            if let Some(&peak) = input.filter_peaks.get(ch) {
                h[usize::from(peak) % filter_len] = 0.5;
            }
            h
        })
        .collect();
    let frequency_responses =
        vec![vec![[0.25; FFT_LENGTH_BY_2_PLUS_1]; config.filter.refined_length_blocks]; num_channels];

    let mut state = AecState::new(&config, num_channels);
    let mut blocks = BlockBuffer::new(BUFFER_SIZE, 1, 1);
    let mut spectra = SpectrumBuffer::new(BUFFER_SIZE, 1);
    let mut outputs = vec![SubtractorOutput::default(); num_channels];

    for block in &input.blocks {
        match block.path_change % 8 {
            0 => state.handle_echo_path_change(&EchoPathVariability::new(
                false,
                DelayAdjustment::NewDetectedDelay,
                false,
            )),
            1 => state.handle_echo_path_change(&EchoPathVariability::new(
                true,
                DelayAdjustment::None,
                false,
            )),
            _ => {}
        }

        let render = f32::from(block.render_level);
        blocks.insert(&Block::new_with_value(1, 1, render));
        let x2 = render * render * BLOCK_SIZE as f32;
        spectra.insert(&[[x2; FFT_LENGTH_BY_2_PLUS_1]]);

        let echo = f32::from(block.echo_level);
        let residual = f32::from(block.residual_level);
        for output in &mut outputs {
            output.s_main = [echo; BLOCK_SIZE];
            output.s_shadow = [echo; BLOCK_SIZE];
            output.e_main = [residual; BLOCK_SIZE];
            output.e_shadow = [residual; BLOCK_SIZE];
            output.compute_metrics(&[echo + residual; BLOCK_SIZE]);
        }
        let y2 = [(echo + residual).powi(2) * BLOCK_SIZE as f32; FFT_LENGTH_BY_2_PLUS_1];
        let e2 = [residual * residual * BLOCK_SIZE as f32; FFT_LENGTH_BY_2_PLUS_1];

        let delay = block
            .external_delay
            .map(|d| DelayEstimate::new(DelayEstimateQuality::Refined, usize::from(d % 20)));

        state.update_capture_saturation(block.capture_saturated);
        state.update(
            delay.as_ref(),
            &frequency_responses,
            &impulse_responses,
            &RenderBuffer::new(&blocks, &spectra),
            &e2,
            &y2,
            &outputs,
        );

        assert!(state.erle().iter().all(|e| e.is_finite()));
        assert!(state.erl().iter().all(|e| e.is_finite()));
        assert!(state.reverb_decay().is_finite());
        assert!(state.filter_delay_blocks() >= 0);
        let mut scaling = [0.0; FFT_LENGTH_BY_2_PLUS_1];
        state.residual_echo_scaling(&mut scaling);
        assert!(scaling.iter().all(|&s| s == 0.0 || s == 1.0));
    }
});
