//! ECM model: encoder, emotion memory decoder and dual-softmax head
//!
//! `EcmModel` is the immutable parameter bundle. It is shared by reference
//! between the training forward pass (teacher forcing) and any number of
//! inference sessions.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{embedding, Embedding, VarBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::attention::{AdditiveAttention, AttentionMemory};
use super::cell::{LayerState, RecurrentCell, StackedCell};
use super::config::EcmConfig;
use super::embeddings::special_tokens::SOS_ID;
use super::embeddings::EmbeddingTable;
use super::encoder::Encoder;
use super::memory_cell::{EmotionMemoryState, InternalMemoryCell};
use super::output_head::{DualSoftmaxHead, HeadOutput};
use crate::error::EcmError;
use crate::generation::StepDecoder;

/// Decoder state for one batch (or one batch of beams)
#[derive(Debug, Clone)]
pub struct EcmDecodeState {
    pub cell: EmotionMemoryState<Vec<LayerState>>,
    pub attention: Option<AttentionMemory>,
}

/// Teacher-forced decoder outputs over `T + 1` steps (SOS + targets)
#[derive(Debug, Clone)]
pub struct TrainOutputs {
    /// [batch, T + 1, head_width]
    pub generic_logits: Tensor,
    /// [batch, T + 1, head_width]
    pub emotion_logits: Tensor,
    /// [batch, T + 1]
    pub alphas: Tensor,
    /// Internal memory after each step [batch, T + 1, emo_int_units]
    pub memories: Tensor,
    /// Internal memory after the last step [batch, emo_int_units]
    pub final_memory: Tensor,
}

pub struct EcmModel {
    embeddings: EmbeddingTable,
    encoder: Encoder,
    cell: InternalMemoryCell<StackedCell>,
    attention: Option<AdditiveAttention>,
    category_embedding: Embedding,
    memory_embedding: Embedding,
    head: DualSoftmaxHead,
    config: EcmConfig,
    device: Device,
}

impl EcmModel {
    /// Create model with given weights
    pub fn new(config: EcmConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let vb = vb.pp(&config.name);

        let embed_size = config.embeddings.embed_size;
        let embeddings = EmbeddingTable::new(config.embeddings.vocab_size, embed_size, vb.pp("embeddings"))?;
        let encoder = Encoder::new(&config.encoder, embed_size, vb.pp("encoder"))?;

        let dec = &config.decoder;
        let dec_vb = vb.pp("decoder");

        let attention = if dec.attn_num_units > 0 {
            Some(AdditiveAttention::new(
                encoder.output_size(),
                dec.num_units,
                dec.attn_num_units,
                dec_vb.pp("attention"),
            )?)
        } else {
            None
        };
        let context_size = attention.as_ref().map(|a| a.context_size()).unwrap_or(0);

        let base_input = embed_size + context_size + dec.emo_cat_units + dec.emo_int_units;
        let base = StackedCell::new(
            dec.cell_type,
            dec.num_layers,
            base_input,
            dec.num_units,
            dec_vb.pp("cell"),
        )?;
        let cell = InternalMemoryCell::new(base, dec.emo_int_units, dec_vb.pp("internal_memory"))?;

        let category_embedding = embedding(dec.num_emotions, dec.emo_cat_units, dec_vb.pp("emotion_category"))?;
        let memory_embedding = embedding(dec.num_emotions, dec.emo_int_units, dec_vb.pp("initial_memory"))?;

        let head = DualSoftmaxHead::new(dec.num_units, config.head_width(), dec_vb.pp("output"))?;

        Ok(Self {
            embeddings,
            encoder,
            cell,
            attention,
            category_embedding,
            memory_embedding,
            head,
            config,
            device,
        })
    }

    /// Load weights from `training.restore_from` (a directory holding
    /// `model.safetensors`, or the file itself)
    pub fn from_checkpoint(config: EcmConfig, device: &Device) -> Result<Self> {
        let restore_from = config
            .training
            .restore_from
            .clone()
            .ok_or_else(|| EcmError::Config("training.restore_from is required for inference".into()))?;
        let path = resolve_checkpoint(&restore_from);
        if !path.is_file() {
            return Err(EcmError::MissingCheckpoint { path }.into());
        }
        Self::from_safetensors(config, &path, device)
    }

    pub fn from_safetensors(config: EcmConfig, path: &Path, device: &Device) -> Result<Self> {
        tracing::info!("Loading ECM checkpoint from: {}", path.display());

        let tensors: HashMap<String, Tensor> = candle_core::safetensors::load(path, device)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let tensors = tensors
            .into_iter()
            .map(|(name, t)| {
                let t = if t.dtype() == DType::F32 { t } else { t.to_dtype(DType::F32)? };
                Ok((name, t))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        tracing::debug!("checkpoint holds {} tensors", tensors.len());

        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        Self::new(config, vb).with_context(|| format!("Checkpoint {} does not match the configuration", path.display()))
    }

    pub fn config(&self) -> &EcmConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Width of each vocabulary's logits (vocab_size + reserved ids)
    pub fn head_width(&self) -> usize {
        self.head.width()
    }

    /// Encode the source, then build the step-0 decoder state
    ///
    /// * `source_ids` - [batch, time] embedding ids (already shifted)
    /// * `categories` - [batch] emotion categories
    pub fn initial_state(&self, source_ids: &Tensor, categories: &Tensor) -> Result<EcmDecodeState> {
        let batch = source_ids.dim(0)?;
        if categories.dims() != [batch] {
            return Err(EcmError::shape("initial_state", format!("categories [{}]", batch), format!("{:?}", categories.dims())).into());
        }
        self.check_ids(source_ids, self.embeddings.num_rows(), "source embedding")?;
        self.check_ids(categories, self.config.decoder.num_emotions, "emotion category")?;

        let embedded = self.embeddings.lookup(source_ids)?;
        let encoded = self.encoder.forward(&embedded)?;

        let base = if self.config.decoder.state_pass {
            encoded.states
        } else {
            self.cell.inner().zero_state(batch, &self.device)?
        };
        let memory = self.memory_embedding.forward(categories)?;
        let category = self.category_embedding.forward(categories)?;

        let attention = match &self.attention {
            Some(attn) => Some(attn.prepare(&encoded.outputs)?),
            None => None,
        };

        Ok(EcmDecodeState {
            cell: self.cell.initial_state(base, memory, category),
            attention,
        })
    }

    /// One decoder step from embedding ids `[batch]`
    pub fn decode_step(&self, embed_ids: &Tensor, state: &EcmDecodeState) -> Result<(HeadOutput, EcmDecodeState)> {
        let x = self.embeddings.lookup(embed_ids)?;

        let x = match (&self.attention, &state.attention) {
            (Some(attn), Some(memory)) => {
                let query = self.cell.output_of(&state.cell)?;
                let (context, _) = attn.attend(&query, memory)?;
                Tensor::cat(&[&x, &context], D::Minus1)?
            }
            (None, None) => x,
            _ => anyhow::bail!("decoder state does not match the attention configuration"),
        };

        let (output, cell) = self.cell.step(&x, &state.cell)?;
        let head = self.head.forward(&output)?;

        Ok((
            head,
            EcmDecodeState {
                cell,
                attention: state.attention.clone(),
            },
        ))
    }

    /// Teacher-forced decoding over SOS + targets
    ///
    /// * `target_ids` - [batch, T] embedding ids (already shifted)
    pub fn forward_train(&self, source_ids: &Tensor, target_ids: &Tensor, categories: &Tensor) -> Result<TrainOutputs> {
        let (batch, time) = target_ids.dims2()?;
        if source_ids.dim(0)? != batch {
            return Err(EcmError::shape("forward_train", format!("source batch {}", batch), format!("source batch {}", source_ids.dim(0)?)).into());
        }
        self.check_ids(target_ids, self.head_width(), "target")?;

        let sos = Tensor::full(SOS_ID, (batch, 1), &self.device)?;
        let inputs = Tensor::cat(&[&sos, &target_ids.to_dtype(DType::U32)?], 1)?.contiguous()?;

        let mut state = self.initial_state(source_ids, categories)?;
        let mut generic = Vec::with_capacity(time + 1);
        let mut emotion = Vec::with_capacity(time + 1);
        let mut alphas = Vec::with_capacity(time + 1);
        let mut memories = Vec::with_capacity(time + 1);

        for t in 0..=time {
            let ids = inputs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            let (out, next) = self.decode_step(&ids, &state)?;
            generic.push(out.generic_logits);
            emotion.push(out.emotion_logits);
            alphas.push(out.alpha);
            memories.push(next.cell.memory.clone());
            state = next;
        }

        Ok(TrainOutputs {
            generic_logits: Tensor::stack(&generic, 1)?,
            emotion_logits: Tensor::stack(&emotion, 1)?,
            alphas: Tensor::stack(&alphas, 1)?,
            memories: Tensor::stack(&memories, 1)?,
            final_memory: state.cell.memory,
        })
    }

    /// Map joined-vocabulary ids back to embedding ids
    pub fn embedding_ids(&self, joined: &[u32]) -> Vec<u32> {
        let width = self.head_width() as u32;
        joined
            .iter()
            .map(|&id| if id >= width { id - width } else { id })
            .collect()
    }

    pub fn reorder_state(&self, state: &EcmDecodeState, indices: &Tensor) -> Result<EcmDecodeState> {
        Ok(EcmDecodeState {
            cell: self.cell.select(&state.cell, indices)?,
            attention: match &state.attention {
                Some(memory) => Some(memory.index_select(indices)?),
                None => None,
            },
        })
    }

    fn check_ids(&self, ids: &Tensor, width: usize, space: &'static str) -> Result<()> {
        let values: Vec<i64> = ids.flatten_all()?.to_dtype(DType::I64)?.to_vec1()?;
        if let Some(&id) = values.iter().find(|&&v| v < 0 || v as usize >= width) {
            return Err(EcmError::VocabMismatch { id, space, width }.into());
        }
        Ok(())
    }
}

impl StepDecoder for EcmModel {
    type State = EcmDecodeState;

    fn device(&self) -> &Device {
        &self.device
    }

    fn head_width(&self) -> usize {
        self.head.width()
    }

    fn start(&self, source_ids: &Tensor, categories: &Tensor) -> Result<Self::State> {
        self.initial_state(source_ids, categories)
    }

    fn step(&self, tokens: &[u32], state: &Self::State) -> Result<(Tensor, Self::State)> {
        let ids = Tensor::new(self.embedding_ids(tokens).as_slice(), &self.device)?;
        let (out, next) = self.decode_step(&ids, state)?;
        Ok((out.joined_log_probs()?, next))
    }

    fn reorder(&self, state: &Self::State, indices: &Tensor) -> Result<Self::State> {
        self.reorder_state(state, indices)
    }
}

fn resolve_checkpoint(restore_from: &Path) -> PathBuf {
    if restore_from.is_dir() {
        restore_from.join("model.safetensors")
    } else {
        restore_from.to_path_buf()
    }
}
