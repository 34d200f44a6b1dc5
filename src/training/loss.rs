//! Training loss for the emotion chatting machine
//!
//! Per decoder position the loss picks one of two branches by the target's
//! choice flag:
//!
//! * generic word: `CE(generic_logits, y) - ln(1 - alpha)`
//! * emotion word: `CE(emotion_logits, y) - ln(alpha)`
//!
//! Targets get an EOS column appended (choice 0) so the `T + 1` decoder
//! steps all have a label. The masked mean over the first `T` positions is
//! the reduced loss; two regularizers and an optional L2 penalty are added
//! on top:
//!
//! | Term | Value |
//! |------|-------|
//! | `alpha_regularizer` | `mean(choice * -ln alpha)` over all positions |
//! | `memory_regularizer` | `mean_b ||final_memory_b||_2` |
//! | `l2` | `l2_regularize * sum_{non-bias} ||v||^2 / 2` |

use anyhow::{anyhow, Result};
use candle_core::{DType, Tensor, D};
use candle_nn::VarMap;

use crate::error::EcmError;
use crate::models::embeddings::special_tokens::EOS_ID;
use crate::models::output_head::{blend, PROB_FLOOR};

/// Loss settings
#[derive(Debug, Clone, Default)]
pub struct LossConfig {
    /// Weight of the L2 penalty over non-bias parameters (None disables)
    pub l2_regularize: Option<f64>,
}

/// Borrowed views of one training batch
pub struct LossInputs<'a> {
    /// [batch, T + 1, head_width]
    pub generic_logits: &'a Tensor,
    /// [batch, T + 1, head_width]
    pub emotion_logits: &'a Tensor,
    /// [batch, T + 1]
    pub alphas: &'a Tensor,
    /// [batch, T] embedding ids of the targets
    pub target_ids: &'a Tensor,
    /// [batch, T], 1.0 where the target is an emotion word
    pub choices: &'a Tensor,
    /// [batch, T], nonzero where the target position is valid
    pub sequence_mask: &'a Tensor,
    /// [batch, emo_int_units]
    pub final_memory: &'a Tensor,
    /// Parameters for the L2 penalty
    pub params: Option<&'a VarMap>,
}

/// Loss terms; tensors are scalars
#[derive(Debug, Clone)]
pub struct LossOutputs {
    pub total: Tensor,
    pub reduced: Tensor,
    pub alpha_regularizer: Tensor,
    pub memory_regularizer: Tensor,
    pub l2: Option<Tensor>,
    /// Summed `-ln P(joined label)` over valid positions
    pub cross_entropy: f64,
    pub valid_count: usize,
}

impl LossOutputs {
    pub fn perplexity(&self) -> f64 {
        compute_perplexity(self.cross_entropy, self.valid_count)
    }
}

pub struct EcmLoss {
    config: LossConfig,
}

impl EcmLoss {
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    pub fn compute(&self, inputs: &LossInputs) -> Result<LossOutputs> {
        let (batch, steps, width) = inputs.generic_logits.dims3()?;
        let time = check_shapes(inputs, batch, steps, width)?;
        let device = inputs.generic_logits.device();

        // `full` broadcasts; gather needs a contiguous index
        let eos = Tensor::full(EOS_ID, (batch, 1), device)?;
        let final_ids = Tensor::cat(&[&inputs.target_ids.to_dtype(DType::U32)?, &eos], 1)?.contiguous()?;
        let no_choice = Tensor::zeros((batch, 1), DType::F32, device)?;
        let choices = Tensor::cat(&[&inputs.choices.to_dtype(DType::F32)?, &no_choice], 1)?.contiguous()?;

        let ln_alpha = inputs.alphas.log()?;
        let ln_one_minus = inputs.alphas.affine(-1.0, 1.0)?.log()?;

        let generic_loss = (token_cross_entropy(inputs.generic_logits, &final_ids)? - &ln_one_minus)?;
        let emotion_loss = (token_cross_entropy(inputs.emotion_logits, &final_ids)? - &ln_alpha)?;
        let loss = ((generic_loss * choices.affine(-1.0, 1.0)?)? + (emotion_loss * &choices)?)?;

        let mask = inputs.sequence_mask.ne(0u8)?.to_dtype(DType::F32)?;
        let valid_count = mask.sum_all()?.to_scalar::<f32>()? as usize;
        let reduced = if valid_count == 0 {
            Tensor::zeros((), DType::F32, device)?
        } else {
            ((loss.narrow(1, 0, time)? * &mask)?.sum_all()? / valid_count as f64)?
        };

        let alpha_regularizer = (choices.clone() * ln_alpha.neg()?)?.mean_all()?;
        let memory_regularizer = inputs.final_memory.sqr()?.sum(D::Minus1)?.sqrt()?.mean_all()?;

        let mut total = ((&reduced + &alpha_regularizer)? + &memory_regularizer)?;
        let l2 = match (self.config.l2_regularize, inputs.params) {
            (Some(weight), Some(params)) => {
                let penalty = l2_penalty(params, weight)?;
                if let Some(penalty) = &penalty {
                    total = (total + penalty)?;
                }
                penalty
            }
            (Some(_), None) => {
                tracing::warn!("l2_regularize is set but no parameters were supplied; skipping L2 term");
                None
            }
            _ => None,
        };

        let cross_entropy = joined_cross_entropy(inputs, &final_ids, &choices, &mask, time, width)?;

        tracing::debug!(
            batch,
            valid_count,
            cross_entropy,
            "computed ECM loss"
        );

        Ok(LossOutputs {
            total,
            reduced,
            alpha_regularizer,
            memory_regularizer,
            l2,
            cross_entropy,
            valid_count,
        })
    }
}

/// `exp(cross_entropy / count)`; 1.0 when nothing was counted
pub fn compute_perplexity(cross_entropy: f64, count: usize) -> f64 {
    if count == 0 {
        return 1.0;
    }
    (cross_entropy / count as f64).exp()
}

/// `weight * sum(v^2) / 2` over every variable whose name does not mention `bias`
///
/// `None` when there is no such variable. The sum lives on the variables' device.
pub fn l2_penalty(params: &VarMap, weight: f64) -> Result<Option<Tensor>> {
    let vars = params
        .data()
        .lock()
        .map_err(|_| anyhow!("parameter map lock poisoned"))?;

    let mut names: Vec<&String> = vars.keys().filter(|name| !name.contains("bias")).collect();
    names.sort();

    let mut sum: Option<Tensor> = None;
    for name in names {
        let term = vars[name].as_tensor().sqr()?.sum_all()?.to_dtype(DType::F32)?;
        sum = Some(match sum {
            Some(acc) => (acc + term)?,
            None => term,
        });
    }

    Ok(match sum {
        Some(sum) => Some(sum.affine(weight / 2.0, 0.0)?),
        None => None,
    })
}

/// Per-position `-ln softmax(logits)[label]`, shape [batch, steps]
fn token_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    Ok(log_probs
        .gather(&labels.unsqueeze(D::Minus1)?.contiguous()?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?)
}

/// Sum of `-ln P_blend(label + choice * width)` over the valid positions
fn joined_cross_entropy(
    inputs: &LossInputs,
    final_ids: &Tensor,
    choices: &Tensor,
    mask: &Tensor,
    time: usize,
    width: usize,
) -> Result<f64> {
    let probs = blend(inputs.generic_logits, inputs.emotion_logits, inputs.alphas)?;
    let log_probs = probs.clamp(PROB_FLOOR, 1.0)?.log()?;

    let offsets = choices.affine(width as f64, 0.0)?.to_dtype(DType::U32)?;
    let joined = (final_ids + offsets)?;
    let picked = log_probs
        .gather(&joined.unsqueeze(D::Minus1)?.contiguous()?, D::Minus1)?
        .squeeze(D::Minus1)?
        .narrow(1, 0, time)?;

    let ce = (picked.neg()? * mask)?.sum_all()?.to_scalar::<f32>()?;
    Ok(ce as f64)
}

/// Returns `T` after checking every input against `[batch, T + 1, width]`
fn check_shapes(inputs: &LossInputs, batch: usize, steps: usize, width: usize) -> Result<usize> {
    let (mask_batch, time) = inputs.sequence_mask.dims2()?;
    if mask_batch != batch {
        return Err(EcmError::shape("sequence_mask batch", batch, mask_batch).into());
    }
    if steps != time + 1 {
        return Err(EcmError::shape("decoder steps (mask time + 1)", time + 1, steps).into());
    }

    let expect = |context: &'static str, tensor: &Tensor, dims: &[usize]| -> Result<()> {
        if tensor.dims() != dims {
            return Err(EcmError::shape(context, format!("{:?}", dims), format!("{:?}", tensor.dims())).into());
        }
        Ok(())
    };
    expect("emotion_logits", inputs.emotion_logits, &[batch, steps, width])?;
    expect("alphas", inputs.alphas, &[batch, steps])?;
    expect("target_ids", inputs.target_ids, &[batch, time])?;
    expect("choices", inputs.choices, &[batch, time])?;
    let memory_batch = inputs.final_memory.dim(0)?;
    if memory_batch != batch {
        return Err(EcmError::shape("final_memory batch", batch, memory_batch).into());
    }

    let ids: Vec<i64> = inputs.target_ids.flatten_all()?.to_dtype(DType::I64)?.to_vec1()?;
    if let Some(&id) = ids.iter().find(|&&id| id < 0 || id as usize >= width) {
        return Err(EcmError::VocabMismatch {
            id,
            space: "target",
            width,
        }
        .into());
    }

    Ok(time)
}
