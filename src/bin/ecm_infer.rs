//! ECM inference over configured input files
//!
//! Reads the source and category files named in the configuration, decodes
//! a response per row and writes the word-id and choice files.
//!
//! Usage:
//!     cargo run --release --features cli --bin ecm_infer -- --config configs/ecm.json

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use ecm::{parse_device, Ecm, EcmConfig};

/// Run ECM inference
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "configs/ecm.json")]
    config: PathBuf,

    /// Device: auto, cpu, cuda[:N], metal[:N]
    #[arg(short, long, default_value = "auto")]
    device: String,

    /// Checkpoint directory or file (overrides training.restore_from)
    #[arg(long)]
    restore_from: Option<PathBuf>,

    /// Beam width (overrides inference.beam_size; 1 = greedy)
    #[arg(long)]
    beam_size: Option<usize>,

    /// Word-id output file (overrides inference.output_path)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Choice output file (overrides inference.choice_path)
    #[arg(long)]
    choice_output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = EcmConfig::from_file(&args.config)?;
    if let Some(path) = args.restore_from {
        config.training.restore_from = Some(path);
    }
    if let Some(width) = args.beam_size {
        config.inference.beam_size = Some(width);
    }
    if let Some(path) = args.output {
        config.inference.output_path = path;
    }
    if let Some(path) = args.choice_output {
        config.inference.choice_path = path;
    }
    config.validate()?;

    println!("=== ECM Inference ===");
    println!("Model: {}", config.name);
    println!("Sources: {}", config.inference.infer_source_file.display());
    println!("Categories: {}", config.inference.infer_category_file.display());

    let device = parse_device(&args.device)?;
    let ecm = Ecm::from_config(config, &device)?;
    println!("Strategy: {}", ecm.driver().strategy().name());

    let start = Instant::now();
    let rows = ecm.run_files()?;
    let elapsed = start.elapsed();

    println!("\nDecoded {} rows in {:.2}s", rows.ids.len(), elapsed.as_secs_f64());
    println!("Responses: {}", ecm.config().inference.output_path.display());
    println!("Choices: {}", ecm.config().inference.choice_path.display());

    Ok(())
}
