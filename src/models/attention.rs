//! Additive (Bahdanau) attention over encoder outputs

use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

/// Encoder outputs prepared for attention
#[derive(Debug, Clone)]
pub struct AttentionMemory {
    /// Encoder outputs [batch, time, encoder_size]
    pub values: Tensor,
    /// Projected keys [batch, time, attn_units]
    pub keys: Tensor,
}

impl AttentionMemory {
    pub fn index_select(&self, indices: &Tensor) -> Result<Self> {
        Ok(Self {
            values: self.values.index_select(indices, 0)?,
            keys: self.keys.index_select(indices, 0)?,
        })
    }
}

pub struct AdditiveAttention {
    memory_layer: Linear,
    query_layer: Linear,
    v: Tensor,
    value_size: usize,
}

impl AdditiveAttention {
    pub fn new(value_size: usize, query_size: usize, attn_units: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            memory_layer: linear_no_bias(value_size, attn_units, vb.pp("memory_layer"))?,
            query_layer: linear_no_bias(query_size, attn_units, vb.pp("query_layer"))?,
            v: vb.get_with_hints(attn_units, "v", candle_nn::init::DEFAULT_KAIMING_NORMAL)?,
            value_size,
        })
    }

    /// Size of the context vector appended to the decoder input
    pub fn context_size(&self) -> usize {
        self.value_size
    }

    pub fn prepare(&self, encoder_outputs: &Tensor) -> Result<AttentionMemory> {
        Ok(AttentionMemory {
            values: encoder_outputs.clone(),
            keys: self.memory_layer.forward(encoder_outputs)?,
        })
    }

    /// Returns (context [batch, value_size], alignments [batch, time])
    pub fn attend(&self, query: &Tensor, memory: &AttentionMemory) -> Result<(Tensor, Tensor)> {
        let q = self.query_layer.forward(query)?.unsqueeze(1)?;
        let energy = memory.keys.broadcast_add(&q)?.tanh()?;
        let scores = energy.broadcast_mul(&self.v)?.sum(D::Minus1)?;
        let alignments = candle_nn::ops::softmax_last_dim(&scores)?;

        let context = alignments
            .unsqueeze(1)?
            .matmul(&memory.values.contiguous()?)?
            .squeeze(1)?;

        Ok((context, alignments))
    }
}
