//! Recurrent cells
//!
//! Every cell implements [`RecurrentCell`], which is all the decoder needs
//! to unroll a cell by hand: advance one step, read the latest hidden
//! output, and reorder the batch (beam search). The emotion memory cell
//! wraps any implementor of the same trait.

use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};

use super::config::CellType;

/// Step-wise recurrent computation
pub trait RecurrentCell {
    type State: Clone;

    /// Advance one step: `input` is [batch, input_size]
    fn step(&self, input: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)>;

    /// Hidden output carried by `state` ([batch, output_size])
    fn output_of(&self, state: &Self::State) -> Result<Tensor>;

    /// Gather batch rows of `state` by `indices` (u32, [new_batch])
    fn select(&self, state: &Self::State, indices: &Tensor) -> Result<Self::State>;

    fn output_size(&self) -> usize;
}

/// Per-layer state, tagged by cell type
#[derive(Debug, Clone)]
pub enum LayerState {
    Lstm { h: Tensor, c: Tensor },
    Gru { h: Tensor },
}

impl LayerState {
    pub fn zeros(cell_type: CellType, batch: usize, units: usize, device: &Device) -> Result<Self> {
        let h = Tensor::zeros((batch, units), DType::F32, device)?;
        Ok(match cell_type {
            CellType::Lstm => LayerState::Lstm { c: h.clone(), h },
            CellType::Gru => LayerState::Gru { h },
        })
    }

    pub fn h(&self) -> &Tensor {
        match self {
            LayerState::Lstm { h, .. } | LayerState::Gru { h } => h,
        }
    }

    /// Concatenate forward and backward states feature-wise
    pub fn concat(&self, other: &LayerState) -> Result<LayerState> {
        match (self, other) {
            (LayerState::Lstm { h: h1, c: c1 }, LayerState::Lstm { h: h2, c: c2 }) => {
                Ok(LayerState::Lstm {
                    h: Tensor::cat(&[h1, h2], D::Minus1)?,
                    c: Tensor::cat(&[c1, c2], D::Minus1)?,
                })
            }
            (LayerState::Gru { h: h1 }, LayerState::Gru { h: h2 }) => Ok(LayerState::Gru {
                h: Tensor::cat(&[h1, h2], D::Minus1)?,
            }),
            _ => anyhow::bail!("cannot concatenate LSTM and GRU states"),
        }
    }

    pub fn index_select(&self, indices: &Tensor) -> Result<LayerState> {
        Ok(match self {
            LayerState::Lstm { h, c } => LayerState::Lstm {
                h: h.index_select(indices, 0)?,
                c: c.index_select(indices, 0)?,
            },
            LayerState::Gru { h } => LayerState::Gru {
                h: h.index_select(indices, 0)?,
            },
        })
    }
}

/// LSTM cell
///
/// gates = W_ih x + b_ih + W_hh h
/// i, f, g, o = gates.chunk(4)
/// c' = σ(f) ⊙ c + σ(i) ⊙ tanh(g)
/// h' = σ(o) ⊙ tanh(c')
pub struct LstmCell {
    ih: Linear,
    hh: Linear,
    hidden_size: usize,
}

impl LstmCell {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            ih: linear(input_size, 4 * hidden_size, vb.pp("ih"))?,
            hh: linear_no_bias(hidden_size, 4 * hidden_size, vb.pp("hh"))?,
            hidden_size,
        })
    }

    fn forward(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor)> {
        let gates = (self.ih.forward(x)? + self.hh.forward(h)?)?;
        let hs = self.hidden_size;

        let i_gate = candle_nn::ops::sigmoid(&gates.narrow(D::Minus1, 0, hs)?)?;
        let f_gate = candle_nn::ops::sigmoid(&gates.narrow(D::Minus1, hs, hs)?)?;
        let g_gate = gates.narrow(D::Minus1, 2 * hs, hs)?.tanh()?;
        let o_gate = candle_nn::ops::sigmoid(&gates.narrow(D::Minus1, 3 * hs, hs)?)?;

        let c_new = ((f_gate * c)? + (i_gate * g_gate)?)?;
        let h_new = (o_gate * c_new.tanh()?)?;
        Ok((h_new, c_new))
    }
}

/// GRU cell
///
/// r = σ(x_r + h_r), z = σ(x_z + h_z), n = tanh(x_n + r ⊙ h_n)
/// h' = (1 - z) ⊙ n + z ⊙ h
pub struct GruCell {
    ih: Linear,
    hh: Linear,
    hidden_size: usize,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            ih: linear(input_size, 3 * hidden_size, vb.pp("ih"))?,
            hh: linear(hidden_size, 3 * hidden_size, vb.pp("hh"))?,
            hidden_size,
        })
    }

    fn forward(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gx = self.ih.forward(x)?;
        let gh = self.hh.forward(h)?;
        let hs = self.hidden_size;

        let r = candle_nn::ops::sigmoid(&(gx.narrow(D::Minus1, 0, hs)? + gh.narrow(D::Minus1, 0, hs)?)?)?;
        let z = candle_nn::ops::sigmoid(&(gx.narrow(D::Minus1, hs, hs)? + gh.narrow(D::Minus1, hs, hs)?)?)?;
        let n = (gx.narrow(D::Minus1, 2 * hs, hs)? + (r * gh.narrow(D::Minus1, 2 * hs, hs)?)?)?.tanh()?;

        // (1 - z) * n + z * h == n + z * (h - n)
        let h_new = (&n + (z * (h - &n)?)?)?;
        Ok(h_new)
    }
}

/// A single recurrent layer of either type
pub enum Cell {
    Lstm(LstmCell),
    Gru(GruCell),
}

impl Cell {
    pub fn new(cell_type: CellType, input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match cell_type {
            CellType::Lstm => Cell::Lstm(LstmCell::new(input_size, hidden_size, vb)?),
            CellType::Gru => Cell::Gru(GruCell::new(input_size, hidden_size, vb)?),
        })
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            Cell::Lstm(_) => CellType::Lstm,
            Cell::Gru(_) => CellType::Gru,
        }
    }

    pub fn zero_state(&self, batch: usize, device: &Device) -> Result<LayerState> {
        LayerState::zeros(self.cell_type(), batch, self.output_size(), device)
    }
}

impl RecurrentCell for Cell {
    type State = LayerState;

    fn step(&self, input: &Tensor, state: &LayerState) -> Result<(Tensor, LayerState)> {
        match (self, state) {
            (Cell::Lstm(cell), LayerState::Lstm { h, c }) => {
                let (h, c) = cell.forward(input, h, c)?;
                Ok((h.clone(), LayerState::Lstm { h, c }))
            }
            (Cell::Gru(cell), LayerState::Gru { h }) => {
                let h = cell.forward(input, h)?;
                Ok((h.clone(), LayerState::Gru { h }))
            }
            _ => anyhow::bail!("state type does not match {:?} cell", self.cell_type()),
        }
    }

    fn output_of(&self, state: &LayerState) -> Result<Tensor> {
        Ok(state.h().clone())
    }

    fn select(&self, state: &LayerState, indices: &Tensor) -> Result<LayerState> {
        state.index_select(indices)
    }

    fn output_size(&self) -> usize {
        match self {
            Cell::Lstm(cell) => cell.hidden_size,
            Cell::Gru(cell) => cell.hidden_size,
        }
    }
}

/// Multi-layer cell; layer `i + 1` consumes the output of layer `i`
pub struct StackedCell {
    layers: Vec<Cell>,
}

impl StackedCell {
    pub fn new(
        cell_type: CellType,
        num_layers: usize,
        input_size: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let in_size = if i == 0 { input_size } else { hidden_size };
            layers.push(Cell::new(cell_type, in_size, hidden_size, vb.pp(format!("layer_{}", i)))?);
        }
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn zero_state(&self, batch: usize, device: &Device) -> Result<Vec<LayerState>> {
        self.layers.iter().map(|l| l.zero_state(batch, device)).collect()
    }
}

impl RecurrentCell for StackedCell {
    type State = Vec<LayerState>;

    fn step(&self, input: &Tensor, state: &Vec<LayerState>) -> Result<(Tensor, Vec<LayerState>)> {
        if state.len() != self.layers.len() {
            anyhow::bail!(
                "stacked cell has {} layers but state has {}",
                self.layers.len(),
                state.len()
            );
        }

        let mut x = input.clone();
        let mut new_state = Vec::with_capacity(self.layers.len());
        for (layer, layer_state) in self.layers.iter().zip(state) {
            let (out, s) = layer.step(&x, layer_state)?;
            x = out;
            new_state.push(s);
        }
        Ok((x, new_state))
    }

    fn output_of(&self, state: &Vec<LayerState>) -> Result<Tensor> {
        state
            .last()
            .map(|s| s.h().clone())
            .ok_or_else(|| anyhow::anyhow!("empty stacked state"))
    }

    fn select(&self, state: &Vec<LayerState>, indices: &Tensor) -> Result<Vec<LayerState>> {
        state.iter().map(|s| s.index_select(indices)).collect()
    }

    fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.output_size()).unwrap_or(0)
    }
}
