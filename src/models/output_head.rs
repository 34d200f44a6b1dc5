//! Dual-softmax output head
//!
//! Two projections over the same cell output, one per vocabulary, plus a
//! scalar gate `alpha` = P(emotion word). The blended distribution is
//! `[softmax(g) * (1 - alpha) ; softmax(e) * alpha]`, so joined ids below
//! the head width are generic and ids at or above it are emotion words.

use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// Alpha is kept within `[ALPHA_EPSILON, 1 - ALPHA_EPSILON]` so that both
/// `ln(alpha)` and `ln(1 - alpha)` stay finite.
pub const ALPHA_EPSILON: f64 = 1e-7;

/// Floor applied to blended probabilities before taking the log
pub const PROB_FLOOR: f64 = 1e-12;

/// Per-step head outputs
#[derive(Debug, Clone)]
pub struct HeadOutput {
    /// [batch, head_width]
    pub generic_logits: Tensor,
    /// [batch, head_width]
    pub emotion_logits: Tensor,
    /// [batch], in `[ALPHA_EPSILON, 1 - ALPHA_EPSILON]`
    pub alpha: Tensor,
}

pub struct DualSoftmaxHead {
    generic: Linear,
    emotion: Linear,
    alpha: Linear,
    width: usize,
}

impl DualSoftmaxHead {
    pub fn new(input_size: usize, width: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            generic: linear(input_size, width, vb.pp("generic"))?,
            emotion: linear(input_size, width, vb.pp("emotion"))?,
            alpha: linear(input_size, 1, vb.pp("alpha"))?,
            width,
        })
    }

    /// Logit width of each vocabulary
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn forward(&self, output: &Tensor) -> Result<HeadOutput> {
        let alpha = candle_nn::ops::sigmoid(&self.alpha.forward(output)?)?
            .squeeze(D::Minus1)?
            .clamp(ALPHA_EPSILON, 1.0 - ALPHA_EPSILON)?;

        Ok(HeadOutput {
            generic_logits: self.generic.forward(output)?,
            emotion_logits: self.emotion.forward(output)?,
            alpha,
        })
    }
}

impl HeadOutput {
    /// Joined distribution [batch, 2 * width]; each row sums to 1
    pub fn blend(&self) -> Result<Tensor> {
        blend(&self.generic_logits, &self.emotion_logits, &self.alpha)
    }

    /// `ln` of [`HeadOutput::blend`], floored at [`PROB_FLOOR`]
    pub fn joined_log_probs(&self) -> Result<Tensor> {
        Ok(self.blend()?.clamp(PROB_FLOOR, 1.0)?.log()?)
    }
}

/// Blend generic and emotion logits of any leading shape with gate `alpha`
/// (same shape as the logits minus the last dim).
pub fn blend(generic_logits: &Tensor, emotion_logits: &Tensor, alpha: &Tensor) -> Result<Tensor> {
    let alpha = alpha.unsqueeze(D::Minus1)?;
    let one_minus = alpha.affine(-1.0, 1.0)?;

    let g = candle_nn::ops::softmax_last_dim(generic_logits)?.broadcast_mul(&one_minus)?;
    let e = candle_nn::ops::softmax_last_dim(emotion_logits)?.broadcast_mul(&alpha)?;
    Ok(Tensor::cat(&[&g, &e], D::Minus1)?)
}
