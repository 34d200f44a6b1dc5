//! Decode a few rows with randomly initialised weights
//!
//! Shows the joined ids produced by greedy and beam search and how they are
//! split into word ids and emotion-word choices.

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use ecm::generation::{demultiplex, BeamSearchStrategy, GreedyStrategy, InferenceDriver, Strategy};
use ecm::{EcmConfig, EcmModel};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let device = Device::Cpu;
    let mut config = EcmConfig::default();
    config.embeddings.vocab_size = 50;
    config.embeddings.embed_size = 16;
    config.encoder.num_units = 16;
    config.decoder.num_units = 32;
    config.decoder.emo_cat_units = 8;
    config.decoder.emo_int_units = 16;
    config.decoder.attn_num_units = 16;
    let vocab_size = config.embeddings.vocab_size;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = EcmModel::new(config, vb)?;
    println!("Head width: {} (joined {})", model.head_width(), 2 * model.head_width());

    // Shifted source rows (2 = left padding)
    let sources = vec![vec![2, 2, 10, 11, 12], vec![20, 21, 22, 23, 24], vec![2, 2, 2, 30, 40]];
    let categories = [0, 2, 5];

    for strategy in [
        Strategy::Greedy(GreedyStrategy),
        Strategy::BeamSearch(BeamSearchStrategy::new(4)),
    ] {
        println!("\n=== {} ===", strategy.name());
        let driver = InferenceDriver::new(2, 8, strategy)?;
        let raw = driver.run(&model, &sources, &categories)?;
        let rows = demultiplex(&raw, vocab_size)?;
        for ((joined, ids), choices) in raw.iter().zip(&rows.ids).zip(&rows.choices) {
            println!("joined:  {:?}", joined);
            println!("ids:     {:?}", ids);
            println!("choices: {:?}", choices);
        }
    }

    Ok(())
}
