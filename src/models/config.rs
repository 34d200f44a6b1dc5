//! Model configuration for ECM

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::embeddings::special_tokens::EMBED_SHIFT;
use crate::error::EcmError;

/// Recurrent cell flavour used by the encoder and decoder stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    #[serde(alias = "LSTM")]
    Lstm,
    #[serde(alias = "GRU")]
    Gru,
}

/// Main ECM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcmConfig {
    /// Model name, used as the root prefix of checkpoint tensor names
    #[serde(rename = "Name", default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

/// Embedding table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Size of each vocabulary (generic and emotion), excluding reserved ids
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Embedding dimension
    #[serde(default = "default_embed_size")]
    pub embed_size: usize,
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    /// Units per direction
    #[serde(default = "default_encoder_units")]
    pub num_units: usize,

    #[serde(default = "default_cell_type")]
    pub cell_type: CellType,

    #[serde(default = "default_true")]
    pub bidirectional: bool,
}

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    #[serde(default = "default_decoder_units")]
    pub num_units: usize,

    #[serde(default = "default_cell_type")]
    pub cell_type: CellType,

    /// Start decoding from the encoder's final state instead of zeros
    #[serde(default = "default_true")]
    pub state_pass: bool,

    /// Number of emotion categories
    #[serde(default = "default_num_emotions")]
    pub num_emotions: usize,

    /// Emotion category embedding size
    #[serde(default = "default_emo_cat_units")]
    pub emo_cat_units: usize,

    /// Internal emotion memory size
    #[serde(default = "default_emo_int_units")]
    pub emo_int_units: usize,

    /// Attention projection size (0 disables attention)
    #[serde(default = "default_attn_num_units")]
    pub attn_num_units: usize,
}

/// Training-only scalars consumed by the loss and checkpoint restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Checkpoint directory or safetensors file
    #[serde(default)]
    pub restore_from: Option<PathBuf>,

    /// Fraction of accelerator memory the runtime may claim
    #[serde(default = "default_gpu_fraction")]
    pub gpu_fraction: f64,

    /// L2 coefficient for non-bias parameters (None disables the term)
    #[serde(default)]
    pub l2_regularize: Option<f64>,
}

/// Inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_infer_batch_size")]
    pub infer_batch_size: usize,

    /// Beam width; `None` or 1 selects greedy decoding
    #[serde(default)]
    pub beam_size: Option<usize>,

    /// Maximum number of decoding steps (`max_iter`)
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default)]
    pub infer_source_file: PathBuf,

    #[serde(default)]
    pub infer_category_file: PathBuf,

    #[serde(default = "default_max_length")]
    pub infer_source_max_length: usize,

    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    #[serde(default = "default_choice_path")]
    pub choice_path: PathBuf,
}

fn default_name() -> String {
    "ECM".to_string()
}

fn default_vocab_size() -> usize {
    40000
}

fn default_embed_size() -> usize {
    256
}

fn default_num_layers() -> usize {
    2
}

fn default_encoder_units() -> usize {
    256
}

fn default_decoder_units() -> usize {
    512
}

fn default_cell_type() -> CellType {
    CellType::Lstm
}

fn default_true() -> bool {
    true
}

fn default_num_emotions() -> usize {
    6
}

fn default_emo_cat_units() -> usize {
    100
}

fn default_emo_int_units() -> usize {
    256
}

fn default_attn_num_units() -> usize {
    256
}

fn default_gpu_fraction() -> f64 {
    1.0
}

fn default_infer_batch_size() -> usize {
    32
}

fn default_max_length() -> usize {
    30
}

fn default_output_path() -> PathBuf {
    PathBuf::from("infer_output.csv")
}

fn default_choice_path() -> PathBuf {
    PathBuf::from("infer_choice.csv")
}

impl Default for EcmConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            embeddings: EmbeddingsConfig::default(),
            encoder: EncoderConfig::default(),
            decoder: DecoderConfig::default(),
            training: TrainingConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            vocab_size: default_vocab_size(),
            embed_size: default_embed_size(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            num_layers: default_num_layers(),
            num_units: default_encoder_units(),
            cell_type: default_cell_type(),
            bidirectional: true,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            num_layers: default_num_layers(),
            num_units: default_decoder_units(),
            cell_type: default_cell_type(),
            state_pass: true,
            num_emotions: default_num_emotions(),
            emo_cat_units: default_emo_cat_units(),
            emo_int_units: default_emo_int_units(),
            attn_num_units: default_attn_num_units(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            restore_from: None,
            gpu_fraction: default_gpu_fraction(),
            l2_regularize: None,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            infer_batch_size: default_infer_batch_size(),
            beam_size: None,
            max_length: default_max_length(),
            infer_source_file: PathBuf::new(),
            infer_category_file: PathBuf::new(),
            infer_source_max_length: default_max_length(),
            output_path: default_output_path(),
            choice_path: default_choice_path(),
        }
    }
}

/// Config files may wrap everything in a top-level `configuration` key
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigDocument {
    Wrapped { configuration: EcmConfig },
    Bare(EcmConfig),
}

impl EcmConfig {
    /// Load configuration from a local JSON file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let document: ConfigDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        let config = match document {
            ConfigDocument::Wrapped { configuration } => configuration,
            ConfigDocument::Bare(config) => config,
        };
        config.validate()?;

        Ok(config)
    }

    /// Width of each output head: the vocabulary plus the reserved ids
    pub fn head_width(&self) -> usize {
        self.embeddings.vocab_size + EMBED_SHIFT as usize
    }

    /// Width of the joined generic + emotion distribution
    pub fn joined_width(&self) -> usize {
        2 * self.head_width()
    }

    /// Feature size of the encoder outputs (both directions when bidirectional)
    pub fn encoder_output_size(&self) -> usize {
        let directions = if self.encoder.bidirectional { 2 } else { 1 };
        self.encoder.num_units * directions
    }

    /// Check the shape parameters for consistency
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embeddings.vocab_size", self.embeddings.vocab_size),
            ("embeddings.embed_size", self.embeddings.embed_size),
            ("encoder.num_layers", self.encoder.num_layers),
            ("encoder.num_units", self.encoder.num_units),
            ("decoder.num_layers", self.decoder.num_layers),
            ("decoder.num_units", self.decoder.num_units),
            ("decoder.num_emotions", self.decoder.num_emotions),
            ("decoder.emo_cat_units", self.decoder.emo_cat_units),
            ("decoder.emo_int_units", self.decoder.emo_int_units),
            ("inference.infer_batch_size", self.inference.infer_batch_size),
            ("inference.max_length", self.inference.max_length),
            (
                "inference.infer_source_max_length",
                self.inference.infer_source_max_length,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(EcmError::Config(format!("{} must be greater than zero", field)).into());
            }
        }

        if self.inference.beam_size == Some(0) {
            return Err(EcmError::Config("inference.beam_size must be at least 1".into()).into());
        }

        if self.decoder.state_pass {
            if self.encoder.cell_type != self.decoder.cell_type {
                return Err(EcmError::Config(format!(
                    "decoder.state_pass requires matching cell types (encoder {:?}, decoder {:?})",
                    self.encoder.cell_type, self.decoder.cell_type
                ))
                .into());
            }
            if self.encoder.num_layers != self.decoder.num_layers {
                return Err(EcmError::Config(format!(
                    "decoder.state_pass requires matching layer counts (encoder {}, decoder {})",
                    self.encoder.num_layers, self.decoder.num_layers
                ))
                .into());
            }
            if self.encoder_output_size() != self.decoder.num_units {
                return Err(EcmError::Config(format!(
                    "decoder.state_pass requires decoder.num_units == {} (encoder state width), got {}",
                    self.encoder_output_size(),
                    self.decoder.num_units
                ))
                .into());
            }
        }

        if !(0.0..=1.0).contains(&self.training.gpu_fraction) {
            return Err(EcmError::Config(format!(
                "training.gpu_fraction must be within [0, 1], got {}",
                self.training.gpu_fraction
            ))
            .into());
        }

        Ok(())
    }
}
