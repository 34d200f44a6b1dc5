//! Shared embedding table
//!
//! Rows 0 and 1 are learned SOS / EOS vectors, row 2 is a constant zero
//! vector used for source padding, and rows `3..vocab_size + 3` hold the
//! vocabulary embeddings. Generic and emotion words share this table.

use anyhow::Result;
use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, VarBuilder};

/// Reserved ids in the embedding index space
pub mod special_tokens {
    /// Start-of-sequence id
    pub const SOS_ID: u32 = 0;
    /// End-of-sequence id (also the target padding id after shifting)
    pub const EOS_ID: u32 = 1;
    /// Constant-zero embedding id (source padding after shifting)
    pub const ZERO_ID: u32 = 2;
    /// Offset between raw vocabulary ids and embedding ids
    pub const EMBED_SHIFT: i64 = 3;
}

use special_tokens::EMBED_SHIFT;

/// Embedding table with the three reserved rows prepended
pub struct EmbeddingTable {
    embedding: Embedding,
    vocab_size: usize,
    embed_size: usize,
}

impl EmbeddingTable {
    /// Build the table from `sos_eos` ([2, embed]) and `embeddings` ([vocab, embed]) tensors
    pub fn new(vocab_size: usize, embed_size: usize, vb: VarBuilder) -> Result<Self> {
        let init = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        let sos_eos = vb.get_with_hints((2, embed_size), "sos_eos", init)?;
        let learned = vb.get_with_hints((vocab_size, embed_size), "embeddings", init)?;
        let zero = Tensor::zeros((1, embed_size), DType::F32, vb.device())?;

        let table = Tensor::cat(&[&sos_eos, &zero, &learned], 0)?;

        Ok(Self {
            embedding: Embedding::new(table, embed_size),
            vocab_size,
            embed_size,
        })
    }

    /// Look up embedding ids of any shape; output gains a trailing `embed_size` dim
    pub fn lookup(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.embedding.forward(ids)?)
    }

    /// Number of rows including the reserved ones
    pub fn num_rows(&self) -> usize {
        self.vocab_size + EMBED_SHIFT as usize
    }

    pub fn embed_size(&self) -> usize {
        self.embed_size
    }

    pub fn table(&self) -> &Tensor {
        self.embedding.embeddings()
    }
}
