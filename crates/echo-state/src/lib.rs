//! Per-block state tracking for an AEC3-style acoustic echo canceller.
//!
//! [`AecState`] digests the adaptive filters, render history and capture
//! spectra of every 64-sample block into the estimates the suppressor needs:
//! direct-path delay, ERL and ERLE, reverberation model, saturation and
//! startup state, and whether the linear filter output can be trusted.
//!
//! # Quick Start
//!
//! ```ignore
//! use echo_state::{AecState, BlockBuffer, EchoStateConfig, RenderBuffer, SpectrumBuffer};
//!
//! let config = EchoStateConfig::default();
//! let mut state = AecState::new(&config, 1);
//! let mut blocks = BlockBuffer::new(30, 1, 1);
//! let mut spectra = SpectrumBuffer::new(30, 1);
//!
//! // For each 64-sample block:
//! // 1. Insert the render block and its power spectrum:
//! // blocks.insert(&render_block);
//! // spectra.insert(&render_spectrum);
//! // 2. Run the adaptive filters, then update the state:
//! // let render = RenderBuffer::new(&blocks, &spectra);
//! // state.update(delay, &frequency_responses, &impulse_responses, &render,
//! //              &e2_main, &y2, &subtractor_outputs);
//! // 3. Read the estimates:
//! // let usable = state.usable_linear_estimate();
//! ```

pub(crate) mod aec_state;
pub(crate) mod block;
pub(crate) mod block_buffer;
pub(crate) mod common;
pub mod config;
pub(crate) mod data_dumper;
pub(crate) mod delay_estimate;
pub(crate) mod echo_audibility;
pub(crate) mod echo_path_variability;
pub(crate) mod erl_estimator;
pub(crate) mod erle_estimator;
pub(crate) mod filter_analyzer;
pub(crate) mod filter_delay;
pub(crate) mod filtering_quality;
pub(crate) mod initial_state;
pub(crate) mod render_buffer;
pub(crate) mod reverb_model;
pub(crate) mod reverb_model_estimator;
pub(crate) mod reverb_power;
pub(crate) mod ring_index;
pub(crate) mod saturation_detector;
pub(crate) mod spectrum_buffer;
pub(crate) mod stationarity_estimator;
pub(crate) mod subtractor_output;
pub(crate) mod subtractor_output_analyzer;
pub(crate) mod transparent_mode;

// Public re-exports.
pub use aec_state::AecState;
pub use block::Block;
pub use block_buffer::BlockBuffer;
pub use common::{
    BLOCK_SIZE, FFT_LENGTH_BY_2, FFT_LENGTH_BY_2_PLUS_1, NUM_BLOCKS_PER_SECOND, log2_to_db,
};
pub use config::EchoStateConfig;
pub use data_dumper::{DataDumper, DumpValue, RecordingDataDumper, TracingDataDumper};
pub use delay_estimate::{DelayEstimate, DelayEstimateQuality};
pub use echo_path_variability::{DelayAdjustment, EchoPathVariability};
pub use render_buffer::RenderBuffer;
pub use ring_index::RingIndex;
pub use spectrum_buffer::SpectrumBuffer;
pub use subtractor_output::SubtractorOutput;
