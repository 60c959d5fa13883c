//! Benchmarks for the per-block echo state update.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use echo_state::{
    AecState, BLOCK_SIZE, Block, BlockBuffer, EchoStateConfig, FFT_LENGTH_BY_2_PLUS_1,
    RecordingDataDumper, RenderBuffer, SpectrumBuffer, SubtractorOutput,
};

const BUFFER_SIZE: usize = 30;

struct Inputs {
    blocks: BlockBuffer,
    spectra: SpectrumBuffer,
    frequency_responses: Vec<Vec<[f32; FFT_LENGTH_BY_2_PLUS_1]>>,
    impulse_responses: Vec<Vec<f32>>,
    outputs: Vec<SubtractorOutput>,
    y2: [f32; FFT_LENGTH_BY_2_PLUS_1],
    e2_main: [f32; FFT_LENGTH_BY_2_PLUS_1],
}

fn make_inputs(config: &EchoStateConfig, num_channels: usize) -> Inputs {
    let num_blocks = config.filter.refined_length_blocks;
    let mut blocks = BlockBuffer::new(BUFFER_SIZE, 1, 1);
    let mut spectra = SpectrumBuffer::new(BUFFER_SIZE, 1);
    let mut block = Block::new(1, 1);
    for (i, x) in block.view_mut(0, 0).iter_mut().enumerate() {
        *x = (i as f32 * 0.3).sin() * 3000.0;
    }
    for _ in 0..BUFFER_SIZE {
        blocks.insert(&block);
        spectra.insert(&[[1e8; FFT_LENGTH_BY_2_PLUS_1]]);
    }

    let impulse_responses = (0..num_channels)
        .map(|ch| {
            (0..num_blocks * BLOCK_SIZE)
                .map(|i| {
                    let peak = (ch + 2) * BLOCK_SIZE;
                    if i == peak {
                        0.5
                    } else if i > peak {
                        0.5 * 0.98f32.powi((i - peak) as i32) * (i as f32).cos()
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    let mut output = SubtractorOutput::default();
    for k in 0..BLOCK_SIZE {
        output.s_main[k] = block.view(0, 0)[k] * 0.5;
        output.e_main[k] = block.view(0, 0)[k] * 0.02;
    }
    let y: Vec<f32> = output.s_main.iter().zip(&output.e_main).map(|(s, e)| s + e).collect();
    output.compute_metrics(&y);

    Inputs {
        blocks,
        spectra,
        frequency_responses: vec![vec![[0.25; FFT_LENGTH_BY_2_PLUS_1]; num_blocks]; num_channels],
        impulse_responses,
        outputs: vec![output; num_channels],
        y2: [2.5e7; FFT_LENGTH_BY_2_PLUS_1],
        e2_main: [1e5; FFT_LENGTH_BY_2_PLUS_1],
    }
}

fn run_update(state: &mut AecState, inputs: &Inputs) {
    let render = RenderBuffer::new(&inputs.blocks, &inputs.spectra);
    state.update(
        None,
        black_box(&inputs.frequency_responses),
        black_box(&inputs.impulse_responses),
        &render,
        &inputs.e2_main,
        &inputs.y2,
        &inputs.outputs,
    );
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("aec_state_update");

    for num_channels in [1, 2, 4] {
        let config = EchoStateConfig::default();
        let inputs = make_inputs(&config, num_channels);
        let mut state = AecState::new(&config, num_channels);
        group.bench_function(format!("{num_channels}ch"), |b| {
            b.iter(|| run_update(&mut state, &inputs));
        });
    }

    // Stationarity tracking and adaptive reverb decay enabled.
    {
        let mut config = EchoStateConfig::default();
        config.echo_audibility.use_stationarity_properties = true;
        config.ep_strength.default_len = -0.83;
        let inputs = make_inputs(&config, 1);
        let mut state = AecState::new(&config, 1);
        group.bench_function("1ch_stationarity", |b| {
            b.iter(|| run_update(&mut state, &inputs));
        });
    }

    // Diagnostics recorded every block.
    {
        let config = EchoStateConfig::default();
        let inputs = make_inputs(&config, 1);
        let mut state = AecState::new(&config, 1);
        let recorder = RecordingDataDumper::new();
        state.set_data_dumper(Some(Box::new(recorder.clone())));
        group.bench_function("1ch_dumped", |b| {
            b.iter(|| {
                run_update(&mut state, &inputs);
                recorder.clear();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_update);
criterion_main!(benches);
