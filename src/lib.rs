//! # ECM
//!
//! Pure Rust inference and training loss for the Emotional Chatting Machine,
//! a sequence-to-sequence response generator conditioned on an emotion
//! category.
//!
//! ## Features
//!
//! - **CPU**: Default, with optional MKL/Accelerate for faster BLAS
//! - **CUDA**: NVIDIA GPU acceleration
//! - **Metal**: Apple Silicon GPU acceleration
//!
//! ## Example
//!
//! ```rust,ignore
//! use ecm::{auto_device, Ecm, EcmConfig};
//!
//! let config = EcmConfig::from_file("configs/ecm.json")?;
//! let ecm = Ecm::from_config(config, &auto_device()?)?;
//! let rows = ecm.run_files()?;
//! println!("{}", rows.ids.len());
//! ```

pub mod data;
pub mod error;
pub mod generation;
pub mod models;
pub mod training;

use anyhow::{bail, Context, Result};
use candle_core::Device;
use std::path::Path;

/// Re-exports for convenience
pub use error::EcmError;
pub use generation::{Demultiplexed, InferenceDriver, Strategy};
pub use models::config::EcmConfig;
pub use models::EcmModel;
pub use training::{EcmLoss, LossConfig};

/// Inference session over a loaded model
pub struct Ecm {
    model: EcmModel,
    driver: InferenceDriver,
}

impl Ecm {
    /// Wrap an already-built model; decoding settings come from its configuration
    pub fn new(model: EcmModel) -> Result<Self> {
        let driver = InferenceDriver::from_config(&model.config().inference)?;
        Ok(Self { model, driver })
    }

    /// Restore the checkpoint named by `training.restore_from`
    pub fn from_config(config: EcmConfig, device: &Device) -> Result<Self> {
        tracing::info!("Loading ECM model '{}'", config.name);
        let model = EcmModel::from_checkpoint(config, device)?;
        Self::new(model)
    }

    pub fn from_config_file<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let config = EcmConfig::from_file(path)?;
        Self::from_config(config, device)
    }

    pub fn model(&self) -> &EcmModel {
        &self.model
    }

    pub fn config(&self) -> &EcmConfig {
        self.model.config()
    }

    pub fn driver(&self) -> &InferenceDriver {
        &self.driver
    }

    /// Decode shifted source rows; returns `max_iter`-wide rows of joined ids
    pub fn infer(&self, sources: &[Vec<u32>], categories: &[u32]) -> Result<Vec<Vec<u32>>> {
        self.driver.run(&self.model, sources, categories)
    }

    /// Decode and split into word ids and choice flags
    pub fn respond(&self, sources: &[Vec<u32>], categories: &[u32]) -> Result<Demultiplexed> {
        let raw = self.infer(sources, categories)?;
        generation::demultiplex(&raw, self.config().embeddings.vocab_size)
    }

    /// Read the configured source and category files, decode, and write
    /// both output files
    pub fn run_files(&self) -> Result<Demultiplexed> {
        let inference = &self.config().inference;

        tracing::info!("Loading inference data ...");
        let sources = data::load_sequences(
            &inference.infer_source_file,
            true,
            inference.infer_source_max_length,
        )?;
        let sources = data::shift_ids(&sources)?;
        let categories = data::load_categories(&inference.infer_category_file)?;
        if sources.len() != categories.len() {
            return Err(EcmError::Data {
                path: inference.infer_category_file.clone(),
                line: categories.len(),
                message: format!(
                    "{} categories for {} source rows",
                    categories.len(),
                    sources.len()
                ),
            }
            .into());
        }

        let rows = self
            .respond(&sources, &categories)
            .context("Inference failed")?;
        rows.write(&inference.output_path, &inference.choice_path)?;
        Ok(rows)
    }
}

/// Select the best available device
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse `auto`, `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_ascii_lowercase();
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, n)) => (
            kind.to_string(),
            n.parse::<usize>()
                .with_context(|| format!("Invalid device ordinal in '{}'", spec))?,
        ),
        None => (spec.clone(), 0),
    };

    match kind.as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(ordinal)?),
        "metal" => Ok(Device::new_metal(ordinal)?),
        other => bail!("Unknown device '{}'", other),
    }
}
