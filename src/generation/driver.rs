//! Batched inference driver
//!
//! Splits the examples into fixed-size batches (padding the tail batch with
//! zero source rows and category 0), decodes each batch with the configured
//! strategy, pads every result row to `max_iter` with EOS and trims the
//! output back to the real example count.

use anyhow::Result;
use candle_core::Tensor;

use super::strategy::{DecodeStrategy, StepDecoder, Strategy};
use crate::error::EcmError;
use crate::models::config::InferenceConfig;
use crate::models::embeddings::special_tokens::EOS_ID;

#[derive(Debug, Clone)]
pub struct InferenceDriver {
    batch_size: usize,
    max_iter: usize,
    strategy: Strategy,
}

impl InferenceDriver {
    pub fn new(batch_size: usize, max_iter: usize, strategy: Strategy) -> Result<Self> {
        if batch_size == 0 || max_iter == 0 {
            return Err(EcmError::Config("batch size and max_iter must be greater than zero".into()).into());
        }
        Ok(Self {
            batch_size,
            max_iter,
            strategy,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(config.infer_batch_size, config.max_length, Strategy::from_config(config))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Decode every example
    ///
    /// * `sources` - shifted source rows, all of the same length
    /// * `categories` - one emotion category per source row
    ///
    /// Returns one row of exactly `max_iter` joined ids per example.
    pub fn run<M: StepDecoder>(&self, model: &M, sources: &[Vec<u32>], categories: &[u32]) -> Result<Vec<Vec<u32>>> {
        if sources.len() != categories.len() {
            return Err(EcmError::shape("categories", sources.len(), categories.len()).into());
        }
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let time = sources[0].len();
        if let Some(row) = sources.iter().find(|r| r.len() != time) {
            return Err(EcmError::shape("source row length", time, row.len()).into());
        }

        let n = sources.len();
        let (sources, categories) = pad_examples(sources, categories, self.batch_size);
        let num_batches = sources.len() / self.batch_size;
        tracing::info!(
            examples = n,
            batches = num_batches,
            strategy = self.strategy.name(),
            "running inference"
        );

        let mut results = Vec::with_capacity(sources.len());
        for (i, (src, cat)) in sources
            .chunks(self.batch_size)
            .zip(categories.chunks(self.batch_size))
            .enumerate()
        {
            let flat: Vec<u32> = src.iter().flatten().copied().collect();
            let source_ids = Tensor::from_vec(flat, (src.len(), time), model.device())?;
            let category_ids = Tensor::new(cat, model.device())?;

            let rows = self.strategy.decode(model, &source_ids, &category_ids, self.max_iter)?;
            tracing::debug!(batch = i, "decoded batch");
            results.extend(rows.into_iter().map(|r| pad_to_max_iter(r, self.max_iter)));
        }

        results.truncate(n);
        Ok(results)
    }
}

/// Pad to a multiple of `batch_size` with all-zero source rows and category 0
pub fn pad_examples(sources: &[Vec<u32>], categories: &[u32], batch_size: usize) -> (Vec<Vec<u32>>, Vec<u32>) {
    let time = sources.first().map(|r| r.len()).unwrap_or(0);
    let remainder = sources.len() % batch_size;
    let pad = if remainder == 0 { 0 } else { batch_size - remainder };

    let mut sources = sources.to_vec();
    let mut categories = categories.to_vec();
    sources.extend(std::iter::repeat(vec![0; time]).take(pad));
    categories.extend(std::iter::repeat(0).take(pad));
    (sources, categories)
}

/// Tail-pad with EOS to exactly `max_iter` ids
pub fn pad_to_max_iter(mut row: Vec<u32>, max_iter: usize) -> Vec<u32> {
    row.truncate(max_iter);
    row.resize(max_iter, EOS_ID);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::beam::BeamSearchStrategy;
    use crate::generation::greedy::GreedyStrategy;
    use crate::generation::testing::ScriptedDecoder;

    #[test]
    fn test_pad_examples() {
        let sources = vec![vec![5, 6], vec![7, 8], vec![9, 10]];
        let (padded, cats) = pad_examples(&sources, &[1, 2, 3], 2);
        assert_eq!(padded.len(), 4);
        assert_eq!(padded[3], vec![0, 0]);
        assert_eq!(cats, vec![1, 2, 3, 0]);

        let (padded, _) = pad_examples(&sources, &[1, 2, 3], 3);
        assert_eq!(padded.len(), 3);
    }

    #[test]
    fn test_pad_to_max_iter() {
        assert_eq!(pad_to_max_iter(vec![4, 1], 4), vec![4, 1, 1, 1]);
        assert_eq!(pad_to_max_iter(vec![4, 5, 6], 3), vec![4, 5, 6]);
    }

    #[test]
    fn test_run_pads_and_trims() {
        let model = ScriptedDecoder::new(10, vec![vec![4, 1], vec![5, 6, 1]]);
        let driver = InferenceDriver::new(2, 4, Strategy::Greedy(GreedyStrategy)).unwrap();

        let sources = vec![vec![3, 4, 5]; 3];
        let out = driver.run(&model, &sources, &[0, 1, 2]).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], vec![4, 1, 1, 1]);
        assert_eq!(out[1], vec![5, 6, 1, 1]);
        assert_eq!(out[2], vec![4, 1, 1, 1]);
    }

    #[test]
    fn test_run_with_beam_search() {
        let model = ScriptedDecoder::new(10, vec![vec![4, 1], vec![5, 6, 1], vec![7, 1]]);
        let sources = vec![vec![3, 4]; 5];
        let categories = vec![0; 5];

        let strategy = Strategy::BeamSearch(BeamSearchStrategy::new(2));
        let a = InferenceDriver::new(5, 6, strategy.clone()).unwrap().run(&model, &sources, &categories).unwrap();
        let b = InferenceDriver::new(3, 6, strategy).unwrap().run(&model, &sources, &categories).unwrap();
        assert_eq!(a.len(), 5);
        assert!(a.iter().all(|r| r.len() == 6));
        assert_eq!(a[0], b[0]);
    }

    #[test]
    fn test_run_rejects_ragged_input() {
        let model = ScriptedDecoder::new(10, vec![vec![1]]);
        let driver = InferenceDriver::new(2, 4, Strategy::Greedy(GreedyStrategy)).unwrap();
        assert!(driver.run(&model, &[vec![3, 4], vec![3]], &[0, 0]).is_err());
        assert!(driver.run(&model, &[vec![3, 4]], &[0, 0]).is_err());
        assert!(driver.run(&model, &[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(InferenceDriver::new(0, 4, Strategy::Greedy(GreedyStrategy)).is_err());
    }
}
