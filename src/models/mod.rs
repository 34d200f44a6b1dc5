//! Neural network models for ECM
//!
//! This module contains:
//! - `config`: Model configuration
//! - `embeddings`: Word embedding table with reserved SOS / EOS / zero rows
//! - `cell`: LSTM / GRU cells and the `RecurrentCell` capability
//! - `encoder`: Multi-layer, optionally bidirectional source encoder
//! - `attention`: Additive attention over encoder outputs
//! - `memory_cell`: Internal emotion memory wrapper cell
//! - `output_head`: Generic / emotion dual softmax with the choice gate
//! - `ecm`: The assembled model

pub mod attention;
pub mod cell;
pub mod config;
pub mod ecm;
pub mod embeddings;
pub mod encoder;
pub mod memory_cell;
pub mod output_head;

pub use cell::{Cell, LayerState, RecurrentCell, StackedCell};
pub use config::{CellType, EcmConfig};
pub use ecm::{EcmDecodeState, EcmModel, TrainOutputs};
pub use memory_cell::{EmotionMemoryState, InternalMemoryCell};
pub use output_head::{DualSoftmaxHead, HeadOutput, ALPHA_EPSILON};
