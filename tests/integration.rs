//! Integration tests for ECM
//!
//! These tests verify the full pipeline works correctly with mock weights.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use ecm::models::config::{CellType, DecoderConfig, EmbeddingsConfig, EncoderConfig};
use ecm::EcmConfig;

/// Small model configuration shared by the tests
fn small_config() -> EcmConfig {
    let mut config = EcmConfig {
        embeddings: EmbeddingsConfig {
            vocab_size: 30,
            embed_size: 8,
        },
        encoder: EncoderConfig {
            num_layers: 2,
            num_units: 5,
            cell_type: CellType::Gru,
            bidirectional: true,
        },
        decoder: DecoderConfig {
            num_layers: 2,
            num_units: 10,
            cell_type: CellType::Gru,
            state_pass: true,
            num_emotions: 6,
            emo_cat_units: 4,
            emo_int_units: 6,
            attn_num_units: 7,
        },
        ..Default::default()
    };
    config.inference.infer_batch_size = 2;
    config.inference.max_length = 5;
    config.inference.infer_source_max_length = 4;
    config
}

/// Create a mock VarBuilder for testing without real weights
fn create_mock_vb(varmap: &VarMap, device: &Device) -> VarBuilder<'static> {
    VarBuilder::from_varmap(varmap, DType::F32, device)
}

mod driver_tests {
    use anyhow::Result;
    use candle_core::{Device, Tensor};
    use ecm::generation::{
        demultiplex, pad_examples, GreedyStrategy, InferenceDriver, StepDecoder, Strategy,
    };

    const HEAD_WIDTH: usize = 13; // vocab 10 + 3 reserved

    /// Emits word 7 (joined 10), then emotion word 2 (joined 18), then EOS
    struct StubDecoder {
        device: Device,
    }

    impl StepDecoder for StubDecoder {
        type State = usize;

        fn device(&self) -> &Device {
            &self.device
        }

        fn head_width(&self) -> usize {
            HEAD_WIDTH
        }

        fn start(&self, _source_ids: &Tensor, _categories: &Tensor) -> Result<usize> {
            Ok(0)
        }

        fn step(&self, tokens: &[u32], step: &usize) -> Result<(Tensor, usize)> {
            let joined = 2 * HEAD_WIDTH;
            let target = match step {
                0 => 10,
                1 => 18,
                _ => 1,
            };
            let mut flat = vec![-10.0f32; tokens.len() * joined];
            for row in 0..tokens.len() {
                flat[row * joined + target] = 0.0;
            }
            Ok((Tensor::from_vec(flat, (tokens.len(), joined), &self.device)?, step + 1))
        }

        fn reorder(&self, state: &usize, _indices: &Tensor) -> Result<usize> {
            Ok(*state)
        }
    }

    #[test]
    fn test_eos_at_step_two() {
        let model = StubDecoder { device: Device::Cpu };
        let driver = InferenceDriver::new(2, 4, Strategy::Greedy(GreedyStrategy)).unwrap();

        let sources = vec![vec![2, 2, 5], vec![4, 5, 6], vec![2, 7, 8]];
        let raw = driver.run(&model, &sources, &[0, 3, 5]).unwrap();
        assert_eq!(raw.len(), 3);
        for row in &raw {
            assert_eq!(row, &vec![10, 18, 1, 1]);
        }

        let out = demultiplex(&raw, 10).unwrap();
        assert_eq!(out.ids[0], vec![7, 2, -1, -1]);
        assert_eq!(out.choices[0], vec![0, 1, 0, 0]);
    }

    #[test]
    fn test_pad_examples_keeps_prefix() {
        let sources: Vec<Vec<u32>> = (0..7).map(|i| vec![i + 3, i + 4]).collect();
        let categories: Vec<u32> = (0..7).map(|i| i % 6).collect();

        for batch_size in 1..=8 {
            let (padded, padded_cats) = pad_examples(&sources, &categories, batch_size);
            assert_eq!(padded.len() % batch_size, 0);
            assert_eq!(padded.len(), padded_cats.len());
            assert_eq!(&padded[..7], &sources[..]);
            assert_eq!(&padded_cats[..7], &categories[..]);
        }
    }
}

mod model_tests {
    use super::*;
    use candle_core::Tensor;
    use ecm::generation::{BeamSearchStrategy, GreedyStrategy, InferenceDriver, Strategy};
    use ecm::training::{EcmLoss, LossConfig, LossInputs};
    use ecm::{Ecm, EcmModel};

    #[test]
    fn test_greedy_session() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();
        let ecm = Ecm::new(model).unwrap();

        let sources = vec![vec![2, 2, 5, 9], vec![4, 5, 6, 7], vec![2, 7, 8, 32]];
        let out = ecm.respond(&sources, &[0, 3, 5]).unwrap();
        assert_eq!(out.ids.len(), 3);
        for (ids, choices) in out.ids.iter().zip(&out.choices) {
            assert_eq!(ids.len(), 5);
            assert!(ids.iter().all(|&id| (-1..30).contains(&id)));
            assert!(choices.iter().all(|&c| c <= 1));
        }
    }

    #[test]
    fn test_beam_search_rows() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();

        let driver = InferenceDriver::new(2, 5, Strategy::BeamSearch(BeamSearchStrategy::new(3))).unwrap();
        let sources = vec![vec![2, 2, 5, 9], vec![4, 5, 6, 7], vec![2, 7, 8, 32]];
        let raw = driver.run(&model, &sources, &[1, 2, 3]).unwrap();
        assert_eq!(raw.len(), 3);
        assert!(raw.iter().all(|r| r.len() == 5));
        assert!(raw.iter().flatten().all(|&id| (id as usize) < 66));
    }

    /// Padding to a batch multiple and trimming afterwards must not change
    /// any example's decoded row
    #[test]
    fn test_rows_independent_of_batch_size() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();

        let sources: Vec<Vec<u32>> = (0..7u32)
            .map(|i| vec![2 + i % 2, 3 + i, 10 + 2 * i, 32 - i])
            .collect();
        let categories: Vec<u32> = (0..7u32).map(|i| i % 6).collect();

        let strategies = [
            Strategy::Greedy(GreedyStrategy),
            Strategy::BeamSearch(BeamSearchStrategy::new(3)),
        ];
        for strategy in strategies {
            // 7 examples in one exact batch: no padding rows
            let reference = InferenceDriver::new(7, 5, strategy.clone())
                .unwrap()
                .run(&model, &sources, &categories)
                .unwrap();
            assert_eq!(reference.len(), 7);

            for batch_size in 1..=8 {
                let driver = InferenceDriver::new(batch_size, 5, strategy.clone()).unwrap();
                let rows = driver.run(&model, &sources, &categories).unwrap();
                assert_eq!(rows, reference, "{} with batch size {}", strategy.name(), batch_size);
            }
        }
    }

    #[test]
    fn test_greedy_is_deterministic() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();
        let driver = InferenceDriver::new(2, 5, Strategy::Greedy(GreedyStrategy)).unwrap();

        let sources = vec![vec![2, 2, 5, 9], vec![4, 5, 6, 7]];
        let a = driver.run(&model, &sources, &[0, 1]).unwrap();
        let b = driver.run(&model, &sources, &[0, 1]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_training_loss_backpropagates() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();

        let source = Tensor::new(&[[2u32, 5, 6, 7], [2, 2, 9, 10]], &device).unwrap();
        let target = Tensor::new(&[[5u32, 9, 1], [7, 1, 1]], &device).unwrap();
        let choices = Tensor::new(&[[0f32, 1.0, 0.0], [1.0, 0.0, 0.0]], &device).unwrap();
        let mask = Tensor::new(&[[1u8, 1, 1], [1, 1, 0]], &device).unwrap();
        let categories = Tensor::new(&[2u32, 4], &device).unwrap();

        let train = model.forward_train(&source, &target, &categories).unwrap();
        let loss = EcmLoss::new(LossConfig {
            l2_regularize: Some(1e-4),
        });
        let out = loss
            .compute(&LossInputs {
                generic_logits: &train.generic_logits,
                emotion_logits: &train.emotion_logits,
                alphas: &train.alphas,
                target_ids: &target,
                choices: &choices,
                sequence_mask: &mask,
                final_memory: &train.final_memory,
                params: Some(&varmap),
            })
            .unwrap();

        assert_eq!(out.valid_count, 5);
        let total = out.total.to_scalar::<f32>().unwrap();
        assert!(total.is_finite() && total > 0.0);
        assert!(out.perplexity() > 1.0);

        let grads = out.total.backward().unwrap();
        let vars = varmap.data().lock().unwrap();
        let gate = &vars["ECM.decoder.internal_memory.write_gate.weight"];
        assert!(grads.get(gate.as_tensor()).is_some());
    }
}

mod pipeline_tests {
    use super::*;
    use ecm::{Ecm, EcmError, EcmModel};

    #[test]
    fn test_run_files_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let device = Device::Cpu;

        // Save random weights as the checkpoint
        let varmap = VarMap::new();
        EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();
        varmap.save(dir.path().join("model.safetensors")).unwrap();

        let sources = dir.path().join("source.csv");
        let categories = dir.path().join("category.csv");
        std::fs::write(&sources, "5 10 20\n1 2 3 4 5 6\n\"7 8\"\n").unwrap();
        std::fs::write(&categories, "0\n3\n5\n").unwrap();

        let mut config = small_config();
        config.training.restore_from = Some(dir.path().to_path_buf());
        config.inference.beam_size = Some(2);
        config.inference.infer_source_file = sources;
        config.inference.infer_category_file = categories;
        config.inference.output_path = dir.path().join("out.csv");
        config.inference.choice_path = dir.path().join("choice.csv");

        let config_path = dir.path().join("config.json");
        let document = serde_json::json!({ "configuration": config });
        std::fs::write(&config_path, serde_json::to_string_pretty(&document).unwrap()).unwrap();

        let ecm = Ecm::from_config_file(&config_path, &device).unwrap();
        let rows = ecm.run_files().unwrap();
        assert_eq!(rows.ids.len(), 3);

        let out = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
        let choice = std::fs::read_to_string(dir.path().join("choice.csv")).unwrap();
        assert_eq!(out.lines().count(), 3);
        assert_eq!(choice.lines().count(), 3);
        for line in out.lines() {
            assert_eq!(line.split(' ').count(), 5);
        }
        for line in choice.lines() {
            assert!(line.split(' ').all(|c| c == "0" || c == "1"));
        }
    }

    #[test]
    fn test_category_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = EcmModel::new(small_config(), create_mock_vb(&varmap, &device)).unwrap();

        let sources = dir.path().join("source.csv");
        let categories = dir.path().join("category.csv");
        std::fs::write(&sources, "5 10 20\n1 2 3\n").unwrap();
        std::fs::write(&categories, "0\n").unwrap();

        let mut config = model.config().clone();
        config.inference.infer_source_file = sources;
        config.inference.infer_category_file = categories;
        let model = EcmModel::new(config, create_mock_vb(&varmap, &device)).unwrap();

        let err = Ecm::new(model).unwrap().run_files().unwrap_err();
        assert!(matches!(err.downcast_ref::<EcmError>(), Some(EcmError::Data { .. })));
    }

    #[test]
    fn test_missing_checkpoint() {
        let mut config = small_config();
        config.training.restore_from = Some("/nonexistent/checkpoint".into());
        let err = Ecm::from_config(config, &Device::Cpu).err().unwrap();
        assert!(err.to_string().contains("cannot find the checkpoint"));
    }
}
