//! Greedy (arg-max) decoding

use anyhow::Result;
use candle_core::{Tensor, D};

use super::strategy::{is_eos, DecodeStrategy, StepDecoder};
use crate::models::embeddings::special_tokens::{EOS_ID, SOS_ID};

/// Greedy sampling (argmax)
pub fn greedy_sample(logits: &Tensor) -> Result<Tensor> {
    Ok(logits.argmax(D::Minus1)?)
}

/// Picks the most likely joined token at every step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GreedyStrategy;

impl DecodeStrategy for GreedyStrategy {
    fn decode<M: StepDecoder>(
        &self,
        model: &M,
        source_ids: &Tensor,
        categories: &Tensor,
        max_iter: usize,
    ) -> Result<Vec<Vec<u32>>> {
        let batch = source_ids.dim(0)?;
        let width = model.head_width();

        let mut state = model.start(source_ids, categories)?;
        let mut tokens = vec![SOS_ID; batch];
        let mut finished = vec![false; batch];
        let mut rows: Vec<Vec<u32>> = vec![Vec::with_capacity(max_iter); batch];

        for step in 0..max_iter {
            let (log_probs, next_state) = model.step(&tokens, &state)?;
            let picked: Vec<u32> = greedy_sample(&log_probs)?.to_vec1()?;

            for (b, &token) in picked.iter().enumerate() {
                let token = if finished[b] { EOS_ID } else { token };
                finished[b] |= is_eos(token, width);
                tokens[b] = token;
                rows[b].push(token);
            }
            state = next_state;

            if finished.iter().all(|&f| f) {
                tracing::debug!(steps = step + 1, "greedy decode finished early");
                break;
            }
        }

        Ok(rows)
    }
}
