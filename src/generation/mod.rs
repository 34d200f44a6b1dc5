//! Decoding for ECM inference
//!
//! This module provides:
//! - Decoding strategies (greedy arg-max, beam search) over the joined vocabulary
//! - The batched inference driver
//! - Post-processing of joined ids into word ids and choice flags

mod beam;
mod driver;
mod greedy;
pub mod postprocess;
mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use beam::BeamSearchStrategy;
pub use driver::{pad_examples, pad_to_max_iter, InferenceDriver};
pub use greedy::{greedy_sample, GreedyStrategy};
pub use postprocess::{demultiplex, Demultiplexed};
pub use strategy::{is_eos, DecodeStrategy, StepDecoder, Strategy};
