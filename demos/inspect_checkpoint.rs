//! Inspect tensor names and shapes in an ECM checkpoint
//!
//! Usage:
//!     cargo run --example inspect_checkpoint -- path/to/model.safetensors
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("checkpoints/model.safetensors"));
    if !path.exists() {
        anyhow::bail!("Checkpoint not found: {}", path.display());
    }

    let tensors: HashMap<String, Tensor> = candle_core::safetensors::load(&path, &device)?;
    let mut keys: Vec<_> = tensors.keys().collect();
    keys.sort();

    let sections = [
        "embeddings",
        "encoder",
        "decoder.attention",
        "decoder.cell",
        "decoder.internal_memory",
        "decoder.emotion_category",
        "decoder.initial_memory",
        "decoder.output",
    ];
    for section in sections {
        let section_keys: Vec<_> = keys
            .iter()
            .filter(|k| k.contains(&format!(".{}.", section)))
            .collect();
        if section_keys.is_empty() {
            continue;
        }
        println!("-- {} --", section);
        let mut params = 0usize;
        for k in &section_keys {
            let t = &tensors[k.as_str()];
            params += t.elem_count();
            println!("  {}: {:?} {:?}", k, t.dims(), t.dtype());
        }
        println!("  ({} tensors, {} parameters)", section_keys.len(), params);
    }

    let total: usize = tensors.values().map(|t| t.elem_count()).sum();
    println!("\n{} tensors, {} parameters", tensors.len(), total);
    Ok(())
}
