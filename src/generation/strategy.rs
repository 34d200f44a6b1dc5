//! Decoding strategies
//!
//! A strategy drives any [`StepDecoder`] from SOS until every row has
//! produced EOS or `max_iter` steps have elapsed. Rows that finish early
//! keep emitting EOS while the rest of the batch continues.

use anyhow::Result;
use candle_core::{Device, Tensor};

use super::beam::BeamSearchStrategy;
use super::greedy::GreedyStrategy;
use crate::models::config::InferenceConfig;
use crate::models::embeddings::special_tokens::EOS_ID;

/// Autoregressive model interface used by the strategies
///
/// Token ids crossing this boundary live in the joined space
/// `[0, 2 * head_width)`.
pub trait StepDecoder {
    type State: Clone;

    fn device(&self) -> &Device;

    /// Width of one vocabulary head; joined width is twice this
    fn head_width(&self) -> usize;

    /// Build the step-0 state for `source_ids` [batch, time] and `categories` [batch]
    fn start(&self, source_ids: &Tensor, categories: &Tensor) -> Result<Self::State>;

    /// Feed the previous joined tokens; returns joined log-probs [batch, 2 * head_width]
    fn step(&self, tokens: &[u32], state: &Self::State) -> Result<(Tensor, Self::State)>;

    /// Gather batch rows of `state` (u32 indices, [new_batch])
    fn reorder(&self, state: &Self::State, indices: &Tensor) -> Result<Self::State>;
}

pub trait DecodeStrategy {
    /// Decode one batch. Every returned row has between 1 and `max_iter` joined ids.
    fn decode<M: StepDecoder>(
        &self,
        model: &M,
        source_ids: &Tensor,
        categories: &Tensor,
        max_iter: usize,
    ) -> Result<Vec<Vec<u32>>>;
}

/// Strategy chosen from configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Greedy(GreedyStrategy),
    BeamSearch(BeamSearchStrategy),
}

impl Strategy {
    /// Beam search when `beam_size > 1`, greedy otherwise
    pub fn from_config(config: &InferenceConfig) -> Self {
        match config.beam_size {
            Some(width) if width > 1 => Strategy::BeamSearch(BeamSearchStrategy::new(width)),
            _ => Strategy::Greedy(GreedyStrategy),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Greedy(_) => "greedy",
            Strategy::BeamSearch(_) => "beam_search",
        }
    }
}

impl DecodeStrategy for Strategy {
    fn decode<M: StepDecoder>(
        &self,
        model: &M,
        source_ids: &Tensor,
        categories: &Tensor,
        max_iter: usize,
    ) -> Result<Vec<Vec<u32>>> {
        match self {
            Strategy::Greedy(s) => s.decode(model, source_ids, categories, max_iter),
            Strategy::BeamSearch(s) => s.decode(model, source_ids, categories, max_iter),
        }
    }
}

/// True for EOS from either vocabulary
pub fn is_eos(token: u32, head_width: usize) -> bool {
    token == EOS_ID || token as usize == head_width + EOS_ID as usize
}
