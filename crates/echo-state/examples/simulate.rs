//! Drive the echo state with a simulated echo path and print what it
//! believes about the echo once per second.
//!
//! The render signal is white noise, or the first channel of a 16 kHz WAV
//! file. The adaptive filter is simulated as converging linearly towards the
//! true echo path.
//!
//! ```sh
//! cargo run -p echo-state --features examples --example simulate -- --seconds 8 --delay-blocks 4
//! RUST_LOG=echo_state=debug cargo run -p echo-state --features examples --example simulate
//! ```

use std::cmp::Ordering;
use std::f32::consts::PI;
use std::slice;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use hound::{SampleFormat, WavReader};
use tracing_subscriber::EnvFilter;

use echo_state::{
    AecState, BLOCK_SIZE, Block, BlockBuffer, DelayAdjustment, DumpValue, EchoPathVariability,
    EchoStateConfig, FFT_LENGTH_BY_2_PLUS_1, NUM_BLOCKS_PER_SECOND, RecordingDataDumper,
    RenderBuffer, SpectrumBuffer, SubtractorOutput, log2_to_db,
};

const SAMPLE_RATE: u32 = 16_000;
const BUFFER_SIZE: usize = 30;
const FFT_LENGTH: usize = 2 * BLOCK_SIZE;

#[derive(Parser, Debug)]
#[command(about = "Simulate an echo path and track the echo canceller state")]
struct Args {
    /// Simulated duration in seconds.
    #[arg(short, long, default_value_t = 10)]
    seconds: usize,

    /// 16 kHz WAV file to use as render signal instead of white noise.
    #[arg(long)]
    render: Option<String>,

    /// Direct-path delay of the echo, in blocks.
    #[arg(long, default_value_t = 3)]
    delay_blocks: usize,

    /// Linear gain of the direct path.
    #[arg(long, default_value_t = 0.5)]
    echo_gain: f32,

    /// Power decay of the echo tail per block.
    #[arg(long, default_value_t = 0.7)]
    tail_decay: f32,

    /// Seconds until the simulated filter has converged.
    #[arg(long, default_value_t = 2.0)]
    converge_seconds: f32,

    /// Second at which the echo path delay changes, if any.
    #[arg(long)]
    delay_change_at: Option<usize>,

    /// Enable render stationarity based residual echo scaling.
    #[arg(long)]
    stationarity: bool,
}

/// Deterministic white noise in `[-amplitude, amplitude]`.
struct Noise {
    state: u32,
    amplitude: f32,
}

impl Noise {
    fn next(&mut self) -> f32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((self.state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0) * self.amplitude
    }
}

fn load_render(args: &Args) -> Result<Vec<f32>> {
    let num_samples = args.seconds * NUM_BLOCKS_PER_SECOND * BLOCK_SIZE;
    let Some(path) = &args.render else {
        let mut noise = Noise {
            state: 7,
            amplitude: 8000.0,
        };
        return Ok((0..num_samples).map(|_| noise.next()).collect());
    };

    let mut reader =
        WavReader::open(path).with_context(|| format!("failed to open {path}"))?;
    let spec = reader.spec();
    ensure!(
        spec.sample_rate == SAMPLE_RATE,
        "{path}: expected {SAMPLE_RATE} Hz, got {} Hz",
        spec.sample_rate
    );
    let channels = usize::from(spec.channels);
    let int_scale = 32768.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => reader
            .samples::<i32>()
            .step_by(channels)
            .map(|s| s.map(|v| v as f32 * int_scale))
            .collect::<Result<_, _>>()?,
        SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map(|v| v * 32768.0))
            .collect::<Result<_, _>>()?,
    };
    Ok(samples.into_iter().take(num_samples).collect())
}

fn echo_path(args: &Args, delay_blocks: usize, filter_len: usize) -> Vec<f32> {
    let per_sample = args.tail_decay.sqrt().powf(1.0 / BLOCK_SIZE as f32);
    let peak = delay_blocks * BLOCK_SIZE;
    let mut noise = Noise {
        state: 3,
        amplitude: 1.0,
    };
    (0..filter_len)
        .map(|i| match i.cmp(&peak) {
            Ordering::Less => 0.0,
            Ordering::Equal => args.echo_gain,
            Ordering::Greater => {
                0.3 * args.echo_gain * per_sample.powi((i - peak) as i32) * noise.next()
            }
        })
        .collect()
}

/// Power spectrum of a 128-sample frame, Hann windowed.
fn power_spectrum(frame: &[f32]) -> [f32; FFT_LENGTH_BY_2_PLUS_1] {
    let mut x2 = [0.0; FFT_LENGTH_BY_2_PLUS_1];
    for (k, bin) in x2.iter_mut().enumerate() {
        let (mut re, mut im) = (0.0f32, 0.0f32);
        for (n, &x) in frame.iter().enumerate() {
            let window = 0.5 - 0.5 * (2.0 * PI * n as f32 / FFT_LENGTH as f32).cos();
            let phase = 2.0 * PI * (k * n) as f32 / FFT_LENGTH as f32;
            re += window * x * phase.cos();
            im -= window * x * phase.sin();
        }
        *bin = re * re + im * im;
    }
    x2
}

fn convolve(h: &[f32], history: &[f32], end: usize) -> f32 {
    h.iter()
        .enumerate()
        .take_while(|&(i, _)| i <= end)
        .map(|(i, &c)| c * history[end - i])
        .sum()
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = EchoStateConfig::default();
    config.echo_audibility.use_stationarity_properties = args.stationarity;
    let filter_blocks = config.filter.refined_length_blocks;
    let filter_len = filter_blocks * BLOCK_SIZE;
    ensure!(
        args.delay_blocks + 1 < filter_blocks,
        "delay must be below {} blocks",
        filter_blocks - 1
    );

    let render = load_render(&args)?;
    let num_blocks = render.len() / BLOCK_SIZE;
    println!(
        "Simulating {:.1} s, echo delay {} blocks, gain {}",
        num_blocks as f32 / NUM_BLOCKS_PER_SECOND as f32,
        args.delay_blocks,
        args.echo_gain
    );

    let mut state = AecState::new(&config, 1);
    let recorder = RecordingDataDumper::new();
    state.set_data_dumper(Some(Box::new(recorder.clone())));

    let mut blocks = BlockBuffer::new(BUFFER_SIZE, 1, 1);
    let mut spectra = SpectrumBuffer::new(BUFFER_SIZE, 1);
    let mut true_path = echo_path(&args, args.delay_blocks, filter_len);
    let converge_blocks = (args.converge_seconds * NUM_BLOCKS_PER_SECOND as f32).max(1.0);
    let mut blocks_since_change = 0usize;

    let mut render_block = Block::new(1, 1);
    let mut output = SubtractorOutput::default();
    let mut y_prev = [0.0f32; BLOCK_SIZE];
    let mut e_prev = [0.0f32; BLOCK_SIZE];

    for b in 0..num_blocks {
        if args.delay_change_at.is_some_and(|s| b == s * NUM_BLOCKS_PER_SECOND) {
            true_path = echo_path(&args, args.delay_blocks + 1, filter_len);
            blocks_since_change = 0;
            state.handle_echo_path_change(&EchoPathVariability::new(
                false,
                DelayAdjustment::NewDetectedDelay,
                false,
            ));
        }
        blocks_since_change += 1;

        let start = b * BLOCK_SIZE;
        render_block
            .view_mut(0, 0)
            .copy_from_slice(&render[start..start + BLOCK_SIZE]);
        blocks.insert(&render_block);
        let frame_start = start.saturating_sub(BLOCK_SIZE);
        let mut frame = [0.0f32; FFT_LENGTH];
        frame[FFT_LENGTH - (start + BLOCK_SIZE - frame_start)..]
            .copy_from_slice(&render[frame_start..start + BLOCK_SIZE]);
        spectra.insert(&[power_spectrum(&frame)]);

        let progress = (blocks_since_change as f32 / converge_blocks).min(1.0);
        let estimate: Vec<f32> = true_path.iter().map(|&h| h * progress).collect();

        let mut y = [0.0f32; BLOCK_SIZE];
        let mut capture_saturated = false;
        for k in 0..BLOCK_SIZE {
            let n = start + k;
            y[k] = convolve(&true_path, &render, n);
            output.s_main[k] = convolve(&estimate, &render, n);
            output.s_shadow[k] = output.s_main[k];
            output.e_main[k] = y[k] - output.s_main[k];
            output.e_shadow[k] = output.e_main[k];
            if y[k].abs() >= 32767.0 {
                y[k] = y[k].clamp(-32768.0, 32767.0);
                capture_saturated = true;
            }
        }
        output.compute_metrics(&y);

        let mut y_frame = [0.0f32; FFT_LENGTH];
        y_frame[..BLOCK_SIZE].copy_from_slice(&y_prev);
        y_frame[BLOCK_SIZE..].copy_from_slice(&y);
        let mut e_frame = [0.0f32; FFT_LENGTH];
        e_frame[..BLOCK_SIZE].copy_from_slice(&e_prev);
        e_frame[BLOCK_SIZE..].copy_from_slice(&output.e_main);
        let y2 = power_spectrum(&y_frame);
        let e2 = power_spectrum(&e_frame);
        y_prev = y;
        e_prev = output.e_main;
        output.e2_main = e2;
        output.e2_shadow = e2;

        let frequency_response: Vec<[f32; FFT_LENGTH_BY_2_PLUS_1]> = estimate
            .chunks(BLOCK_SIZE)
            .map(|partition| {
                let mut padded = [0.0f32; FFT_LENGTH];
                padded[..BLOCK_SIZE].copy_from_slice(partition);
                power_spectrum(&padded)
            })
            .collect();

        state.update_capture_saturation(capture_saturated);
        let render_view = RenderBuffer::new(&blocks, &spectra);
        state.update(
            None,
            &[frequency_response],
            &[estimate],
            &render_view,
            &e2,
            &y2,
            slice::from_ref(&output),
        );

        if (b + 1) % NUM_BLOCKS_PER_SECOND == 0 {
            println!(
                "{:>4} s  delay {:>2}  usable {:<5}  transparent {:<5}  initial {:<5}  \
                 ERLE {:>5.1} dB  ERL {:>6.1} dB  decay {:.2}",
                (b + 1) / NUM_BLOCKS_PER_SECOND,
                state.filter_delay_blocks(),
                state.usable_linear_estimate(),
                state.transparent_mode_active(),
                state.initial_state_active(),
                log2_to_db(state.fullband_erle_log2()),
                10.0 * state.erl_time_domain().log10(),
                state.reverb_decay(),
            );
        }
    }

    let usable_blocks = recorder
        .values("aec3_usable_linear_estimate")
        .iter()
        .filter(|v| matches!(v, DumpValue::Bool(true)))
        .count();
    let saturated_blocks = recorder
        .values("aec3_echo_saturation")
        .iter()
        .filter(|v| matches!(v, DumpValue::Bool(true)))
        .count();
    println!(
        "Linear estimate usable in {usable_blocks} of {num_blocks} blocks, \
         echo saturated in {saturated_blocks}"
    );

    Ok(())
}
