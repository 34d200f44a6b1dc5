//! Internal emotion memory cell
//!
//! Wraps a base recurrent cell and carries a decaying emotion memory next
//! to the base state. Each step:
//!
//! 1. read / write gates from `[h_prev ; M_prev]`
//! 2. `M' = write ⊙ tanh(W_m M_prev)`
//! 3. base input is `[x ; v_category ; read ⊙ M_prev]`
//! 4. base cell advances
//!
//! The write gate lets the model drain the memory as the emotional content
//! of the response is expressed; the memory regularizer in the loss pushes
//! the final memory toward zero.

use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

use super::cell::RecurrentCell;

/// Composite state: base-cell state plus the internal emotion memory
#[derive(Debug, Clone)]
pub struct EmotionMemoryState<S> {
    pub base: S,
    /// Internal emotion memory [batch, emo_int_units]
    pub memory: Tensor,
    /// Emotion category embedding [batch, emo_cat_units], constant over time
    pub category: Tensor,
}

pub struct InternalMemoryCell<C> {
    inner: C,
    read_gate: Linear,
    write_gate: Linear,
    memory_proj: Linear,
}

impl<C: RecurrentCell> InternalMemoryCell<C> {
    /// `inner` must accept inputs of width `input_size + emo_cat_units + emo_int_units`
    pub fn new(inner: C, emo_int_units: usize, vb: VarBuilder) -> Result<Self> {
        let gate_in = inner.output_size() + emo_int_units;
        Ok(Self {
            read_gate: linear(gate_in, emo_int_units, vb.pp("read_gate"))?,
            write_gate: linear(gate_in, emo_int_units, vb.pp("write_gate"))?,
            memory_proj: linear(emo_int_units, emo_int_units, vb.pp("memory_proj"))?,
            inner,
        })
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn initial_state(&self, base: C::State, memory: Tensor, category: Tensor) -> EmotionMemoryState<C::State> {
        EmotionMemoryState {
            base,
            memory,
            category,
        }
    }
}

impl<C: RecurrentCell> RecurrentCell for InternalMemoryCell<C> {
    type State = EmotionMemoryState<C::State>;

    fn step(&self, input: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)> {
        let h_prev = self.inner.output_of(&state.base)?;
        let gate_in = Tensor::cat(&[&h_prev, &state.memory], D::Minus1)?;

        let read = candle_nn::ops::sigmoid(&self.read_gate.forward(&gate_in)?)?;
        let write = candle_nn::ops::sigmoid(&self.write_gate.forward(&gate_in)?)?;

        let memory = (write * self.memory_proj.forward(&state.memory)?.tanh()?)?;
        let read_out = (read * &state.memory)?;

        let x = Tensor::cat(&[input, &state.category, &read_out], D::Minus1)?;
        let (output, base) = self.inner.step(&x, &state.base)?;

        Ok((
            output,
            EmotionMemoryState {
                base,
                memory,
                category: state.category.clone(),
            },
        ))
    }

    fn output_of(&self, state: &Self::State) -> Result<Tensor> {
        self.inner.output_of(&state.base)
    }

    fn select(&self, state: &Self::State, indices: &Tensor) -> Result<Self::State> {
        Ok(EmotionMemoryState {
            base: self.inner.select(&state.base, indices)?,
            memory: state.memory.index_select(indices, 0)?,
            category: state.category.index_select(indices, 0)?,
        })
    }

    fn output_size(&self) -> usize {
        self.inner.output_size()
    }
}
