//! Training objective
//!
//! This module provides:
//! - `EcmLoss`: the choice-weighted cross entropy with alpha and memory regularizers
//! - `l2_penalty` over non-bias parameters
//! - `compute_perplexity`

mod loss;

pub use loss::{compute_perplexity, l2_penalty, EcmLoss, LossConfig, LossInputs, LossOutputs};
