//! Deterministic decoders for strategy tests

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use std::cell::Cell;

use super::strategy::StepDecoder;
use crate::models::embeddings::special_tokens::{EOS_ID, SOS_ID};

/// Log-probs over `joined` tokens with the given masses; the rest share what is left
fn distribution(joined: usize, peaks: &[(u32, f32)]) -> Vec<f32> {
    let used: f32 = peaks.iter().map(|(_, p)| p).sum();
    let rest = (1.0 - used) / (joined - peaks.len()) as f32;
    let mut row = vec![rest.ln(); joined];
    for &(token, p) in peaks {
        row[token as usize] = p.ln();
    }
    row
}

fn inputs(batch: usize) -> (Tensor, Tensor) {
    let device = Device::Cpu;
    (
        Tensor::zeros((batch, 3), DType::U32, &device).unwrap(),
        Tensor::zeros(batch, DType::U32, &device).unwrap(),
    )
}

fn gather<T: Clone>(state: &[T], indices: &Tensor) -> Result<Vec<T>> {
    let indices: Vec<u32> = indices.to_vec1()?;
    Ok(indices.iter().map(|&i| state[i as usize].clone()).collect())
}

/// Row `r` emits `scripts[r % n][t]` at step `t` (the last entry repeats),
/// with probability 0.6 and the next joined id at 0.3.
pub struct ScriptedDecoder {
    head_width: usize,
    scripts: Vec<Vec<u32>>,
    device: Device,
    steps: Cell<usize>,
}

impl ScriptedDecoder {
    pub fn new(head_width: usize, scripts: Vec<Vec<u32>>) -> Self {
        Self {
            head_width,
            scripts,
            device: Device::Cpu,
            steps: Cell::new(0),
        }
    }

    pub fn inputs(&self, batch: usize) -> (Tensor, Tensor) {
        inputs(batch)
    }

    pub fn steps(&self) -> usize {
        self.steps.get()
    }
}

impl StepDecoder for ScriptedDecoder {
    /// (script index, step) per row
    type State = Vec<(usize, usize)>;

    fn device(&self) -> &Device {
        &self.device
    }

    fn head_width(&self) -> usize {
        self.head_width
    }

    fn start(&self, source_ids: &Tensor, _categories: &Tensor) -> Result<Self::State> {
        let batch = source_ids.dim(0)?;
        Ok((0..batch).map(|r| (r % self.scripts.len(), 0)).collect())
    }

    fn step(&self, _tokens: &[u32], state: &Self::State) -> Result<(Tensor, Self::State)> {
        self.steps.set(self.steps.get() + 1);
        let joined = 2 * self.head_width;
        let mut flat = Vec::with_capacity(state.len() * joined);
        for &(script, t) in state {
            let script = &self.scripts[script];
            let peak = script[t.min(script.len() - 1)];
            let runner_up = (peak + 1) % joined as u32;
            flat.extend(distribution(joined, &[(peak, 0.6), (runner_up, 0.3)]));
        }
        let log_probs = Tensor::from_vec(flat, (state.len(), joined), &self.device)?;
        Ok((log_probs, state.iter().map(|&(s, t)| (s, t + 1)).collect()))
    }

    fn reorder(&self, state: &Self::State, indices: &Tensor) -> Result<Self::State> {
        gather(state, indices)
    }
}

/// The most likely first token leads to a flat continuation; the runner-up
/// is followed by EOS with near certainty.
pub struct TrapDecoder {
    device: Device,
}

impl TrapDecoder {
    pub const TRAP: u32 = 3;
    pub const SAFE: u32 = 4;
    const HEAD_WIDTH: usize = 5;

    pub fn new() -> Self {
        Self { device: Device::Cpu }
    }

    pub fn inputs(&self, batch: usize) -> (Tensor, Tensor) {
        inputs(batch)
    }
}

impl StepDecoder for TrapDecoder {
    type State = ();

    fn device(&self) -> &Device {
        &self.device
    }

    fn head_width(&self) -> usize {
        Self::HEAD_WIDTH
    }

    fn start(&self, _source_ids: &Tensor, _categories: &Tensor) -> Result<Self::State> {
        Ok(())
    }

    fn step(&self, tokens: &[u32], _state: &Self::State) -> Result<(Tensor, Self::State)> {
        let joined = 2 * Self::HEAD_WIDTH;
        let mut flat = Vec::with_capacity(tokens.len() * joined);
        for &token in tokens {
            let row = match token {
                SOS_ID => distribution(joined, &[(Self::TRAP, 0.5), (Self::SAFE, 0.4)]),
                Self::TRAP => distribution(joined, &[(2, 0.2)]),
                _ => distribution(joined, &[(EOS_ID, 0.99)]),
            };
            flat.extend(row);
        }
        Ok((Tensor::from_vec(flat, (tokens.len(), joined), &self.device)?, ()))
    }

    fn reorder(&self, _state: &Self::State, _indices: &Tensor) -> Result<Self::State> {
        Ok(())
    }
}
