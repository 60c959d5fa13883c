//! Named diagnostics emitted by the state tracker after every update.
//!
//! A [`DataDumper`] receives one value per diagnostic name and block. The
//! tracker works without a sink installed, in which case no diagnostics are
//! computed at all.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static INSTANCE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Receiver of per-block diagnostics.
pub trait DataDumper {
    fn dump_f32(&mut self, name: &str, value: f32);
    fn dump_bool(&mut self, name: &str, value: bool);
    fn dump_i32(&mut self, name: &str, value: i32);
    fn dump_f32_slice(&mut self, name: &str, values: &[f32]);
}

/// Forwards every diagnostic to `tracing` at trace level.
///
/// Enable with `RUST_LOG=echo_state=trace`.
#[derive(Debug)]
pub struct TracingDataDumper {
    instance: usize,
}

impl TracingDataDumper {
    /// Creates a dumper tagged with a process-unique instance id.
    pub fn new() -> Self {
        Self {
            instance: INSTANCE_COUNT.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    pub fn instance(&self) -> usize {
        self.instance
    }
}

impl Default for TracingDataDumper {
    fn default() -> Self {
        Self::new()
    }
}

impl DataDumper for TracingDataDumper {
    fn dump_f32(&mut self, name: &str, value: f32) {
        tracing::trace!(instance = self.instance, name, value);
    }

    fn dump_bool(&mut self, name: &str, value: bool) {
        tracing::trace!(instance = self.instance, name, value);
    }

    fn dump_i32(&mut self, name: &str, value: i32) {
        tracing::trace!(instance = self.instance, name, value);
    }

    fn dump_f32_slice(&mut self, name: &str, values: &[f32]) {
        tracing::trace!(instance = self.instance, name, value = ?values);
    }
}

/// A single recorded diagnostic value.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpValue {
    F32(f32),
    Bool(bool),
    I32(i32),
    F32Slice(Vec<f32>),
}

/// Keeps every diagnostic in memory.
///
/// Clones share the same log, so a clone can be kept to inspect the values
/// after the original has been handed to
/// [`AecState::set_data_dumper`](crate::AecState::set_data_dumper).
#[derive(Debug, Clone, Default)]
pub struct RecordingDataDumper {
    records: Arc<Mutex<Vec<(String, DumpValue)>>>,
}

impl RecordingDataDumper {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, name: &str, value: DumpValue) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_owned(), value));
    }

    /// All values recorded under `name`, oldest first.
    pub fn values(&self, name: &str) -> Vec<DumpValue> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// The most recent value recorded under `name`.
    pub fn last(&self, name: &str) -> Option<DumpValue> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    /// Distinct names in first-seen order.
    pub fn names(&self) -> Vec<String> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = Vec::new();
        for (name, _) in records.iter() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DataDumper for RecordingDataDumper {
    fn dump_f32(&mut self, name: &str, value: f32) {
        self.push(name, DumpValue::F32(value));
    }

    fn dump_bool(&mut self, name: &str, value: bool) {
        self.push(name, DumpValue::Bool(value));
    }

    fn dump_i32(&mut self, name: &str, value: i32) {
        self.push(name, DumpValue::I32(value));
    }

    fn dump_f32_slice(&mut self, name: &str, values: &[f32]) {
        self.push(name, DumpValue::F32Slice(values.to_vec()));
    }
}
