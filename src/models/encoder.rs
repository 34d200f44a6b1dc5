//! Source encoder
//!
//! A stack of recurrent layers over the embedded source. When
//! bidirectional, each layer runs a forward and a backward cell and
//! concatenates their outputs (and final states) feature-wise.

use anyhow::Result;
use candle_core::{IndexOp, Tensor, D};
use candle_nn::VarBuilder;

use super::cell::{Cell, LayerState, RecurrentCell};
use super::config::EncoderConfig;

/// Encoder result
pub struct EncoderOutput {
    /// [batch, time, num_units * directions]
    pub outputs: Tensor,
    /// Final state per layer, directions concatenated
    pub states: Vec<LayerState>,
}

struct EncoderLayer {
    forward: Cell,
    backward: Option<Cell>,
}

pub struct Encoder {
    layers: Vec<EncoderLayer>,
    output_size: usize,
}

impl Encoder {
    pub fn new(config: &EncoderConfig, input_size: usize, vb: VarBuilder) -> Result<Self> {
        let directions = if config.bidirectional { 2 } else { 1 };
        let output_size = config.num_units * directions;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let in_size = if i == 0 { input_size } else { output_size };
            let layer_vb = vb.pp(format!("layer_{}", i));
            let forward = Cell::new(config.cell_type, in_size, config.num_units, layer_vb.pp("fw"))?;
            let backward = if config.bidirectional {
                Some(Cell::new(config.cell_type, in_size, config.num_units, layer_vb.pp("bw"))?)
            } else {
                None
            };
            layers.push(EncoderLayer { forward, backward });
        }

        Ok(Self { layers, output_size })
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Encode embedded source `[batch, time, embed]`
    pub fn forward(&self, embedded: &Tensor) -> Result<EncoderOutput> {
        let (batch, time, _) = embedded.dims3()?;

        let mut x = embedded.clone();
        let mut states = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (fw_out, fw_state) = run_direction(&layer.forward, &x, batch, false)?;
            let (out, state) = match &layer.backward {
                Some(cell) => {
                    let (bw_out, bw_state) = run_direction(cell, &x, batch, true)?;
                    (
                        Tensor::cat(&[&fw_out, &bw_out], D::Minus1)?,
                        fw_state.concat(&bw_state)?,
                    )
                }
                None => (fw_out, fw_state),
            };
            x = out;
            states.push(state);
        }

        tracing::trace!(batch, time, layers = states.len(), "encoded source batch");
        Ok(EncoderOutput { outputs: x, states })
    }
}

/// Unroll one cell over time; returns outputs in source order and the final state
fn run_direction(cell: &Cell, x: &Tensor, batch: usize, reverse: bool) -> Result<(Tensor, LayerState)> {
    let time = x.dim(1)?;
    let mut state = cell.zero_state(batch, x.device())?;
    let mut outputs = Vec::with_capacity(time);

    let steps: Vec<usize> = if reverse {
        (0..time).rev().collect()
    } else {
        (0..time).collect()
    };
    for t in steps {
        let (out, s) = cell.step(&x.i((.., t, ..))?.contiguous()?, &state)?;
        outputs.push(out);
        state = s;
    }
    if reverse {
        outputs.reverse();
    }

    Ok((Tensor::stack(&outputs, 1)?, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::CellType;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config(bidirectional: bool, cell_type: CellType) -> EncoderConfig {
        EncoderConfig {
            num_layers: 2,
            num_units: 6,
            cell_type,
            bidirectional,
        }
    }

    #[test]
    fn test_bidirectional_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = Encoder::new(&config(true, CellType::Lstm), 4, vb).unwrap();
        assert_eq!(encoder.output_size(), 12);

        let x = Tensor::ones((3, 5, 4), DType::F32, &device).unwrap();
        let out = encoder.forward(&x).unwrap();
        assert_eq!(out.outputs.dims(), &[3, 5, 12]);
        assert_eq!(out.states.len(), 2);
        for state in &out.states {
            assert!(matches!(state, LayerState::Lstm { .. }));
            assert_eq!(state.h().dims(), &[3, 12]);
        }
    }

    #[test]
    fn test_unidirectional_gru() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = Encoder::new(&config(false, CellType::Gru), 4, vb).unwrap();

        let x = Tensor::ones((2, 3, 4), DType::F32, &device).unwrap();
        let out = encoder.forward(&x).unwrap();
        assert_eq!(out.outputs.dims(), &[2, 3, 6]);

        // Final forward state equals the last output step
        let last: Vec<Vec<f32>> = out.outputs.i((.., 2, ..)).unwrap().to_vec2().unwrap();
        let h: Vec<Vec<f32>> = out.states[1].h().to_vec2().unwrap();
        assert_eq!(last, h);
    }

    #[test]
    fn test_backward_direction_final_state_is_first_output() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cell = Cell::new(CellType::Gru, 2, 3, vb).unwrap();

        let x = Tensor::new(&[[[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]]], &device).unwrap();
        let (outputs, state) = run_direction(&cell, &x, 1, true).unwrap();
        let first: Vec<Vec<f32>> = outputs.i((.., 0, ..)).unwrap().to_vec2().unwrap();
        let h: Vec<Vec<f32>> = state.h().to_vec2().unwrap();
        assert_eq!(first, h);
    }
}
