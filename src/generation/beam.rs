//! Beam search decoding
//!
//! Each example keeps `beam_size` hypotheses, flattened to a
//! `[batch * beam_size]` decoder batch. Hypotheses are ranked by summed
//! log-probability; a finished hypothesis is extended with EOS at no cost,
//! so it competes unchanged with the live ones.

use anyhow::Result;
use candle_core::Tensor;

use super::strategy::{is_eos, DecodeStrategy, StepDecoder};
use crate::models::embeddings::special_tokens::{EOS_ID, SOS_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeamSearchStrategy {
    beam_size: usize,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score: f32,
    finished: bool,
}

/// A scored extension of hypothesis `parent` (index within its example)
struct Candidate {
    parent: usize,
    token: u32,
    score: f32,
}

impl BeamSearchStrategy {
    pub fn new(beam_size: usize) -> Self {
        Self {
            beam_size: beam_size.max(1),
        }
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }
}

impl DecodeStrategy for BeamSearchStrategy {
    fn decode<M: StepDecoder>(
        &self,
        model: &M,
        source_ids: &Tensor,
        categories: &Tensor,
        max_iter: usize,
    ) -> Result<Vec<Vec<u32>>> {
        let batch = source_ids.dim(0)?;
        let k = self.beam_size;
        let width = model.head_width();

        // Tile every example k times
        let tile: Vec<u32> = (0..batch as u32).flat_map(|b| std::iter::repeat(b).take(k)).collect();
        let tile = Tensor::new(tile.as_slice(), model.device())?;
        let mut state = model.reorder(&model.start(source_ids, categories)?, &tile)?;

        // Only the first copy starts live so step 0 yields k distinct tokens
        let mut beams: Vec<Hypothesis> = (0..batch * k)
            .map(|i| Hypothesis {
                tokens: Vec::with_capacity(max_iter),
                score: if i % k == 0 { 0.0 } else { f32::NEG_INFINITY },
                finished: false,
            })
            .collect();
        let mut last = vec![SOS_ID; batch * k];

        for step in 0..max_iter {
            let (log_probs, next_state) = model.step(&last, &state)?;
            let log_probs: Vec<Vec<f32>> = log_probs.to_vec2()?;

            let mut parents = Vec::with_capacity(batch * k);
            let mut next_beams = Vec::with_capacity(batch * k);
            for b in 0..batch {
                let group = &beams[b * k..(b + 1) * k];
                let rows = &log_probs[b * k..(b + 1) * k];
                for cand in best_candidates(group, rows, k) {
                    let parent = &group[cand.parent];
                    let mut tokens = parent.tokens.clone();
                    tokens.push(cand.token);
                    next_beams.push(Hypothesis {
                        tokens,
                        score: cand.score,
                        finished: parent.finished || is_eos(cand.token, width),
                    });
                    parents.push((b * k + cand.parent) as u32);
                }
            }

            let parents = Tensor::new(parents.as_slice(), model.device())?;
            state = model.reorder(&next_state, &parents)?;
            last = next_beams.iter().map(|h| h.tokens[h.tokens.len() - 1]).collect();
            beams = next_beams;

            // An example is done once its best hypothesis has finished
            if (0..batch).all(|b| beams[b * k].finished) {
                tracing::debug!(steps = step + 1, beam_size = k, "beam search finished early");
                break;
            }
        }

        Ok((0..batch).map(|b| beams[b * k].tokens.clone()).collect())
    }
}

/// Top `k` extensions of one example's hypotheses, best first
fn best_candidates(group: &[Hypothesis], rows: &[Vec<f32>], k: usize) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(group.len() * k);
    for (parent, (hyp, row)) in group.iter().zip(rows).enumerate() {
        if hyp.finished {
            candidates.push(Candidate {
                parent,
                token: EOS_ID,
                score: hyp.score,
            });
            continue;
        }
        for (token, lp) in top_k(row, k) {
            candidates.push(Candidate {
                parent,
                token,
                score: hyp.score + lp,
            });
        }
    }

    // Stable sort keeps lower parent / token order on ties
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(k);
    candidates
}

/// Indices and values of the `k` largest entries, descending
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = row.iter().enumerate().map(|(i, &v)| (i as u32, v)).collect();
    let k = k.min(indexed.len());
    if k < indexed.len() {
        indexed.select_nth_unstable_by(k, |a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        indexed.truncate(k);
    }
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    indexed
}
