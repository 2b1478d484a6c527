//! Speller: авторегрессивный декодер LAS.
//!
//! На каждом шаге:
//! 1. вход = concat(токен [B, V], контекст [B, L]) проходит через стек RNN;
//! 2. attention выхода RNN по всем кадрам Listener даёт новый контекст;
//! 3. concat(выход RNN, контекст) → Linear(2D → V) → log_softmax.
//!
//! Следующий токен берётся из ground truth (teacher forcing) или выбирается по
//! `DecodeMode`. Ранней остановки нет: число шагов = длина ground truth либо
//! `max_label_len`.
//!
//! Весовые ключи:
//! - speller.rnn_layer.weight_ih_l{k}: [G*D, V + L] для k = 0, [G*D, D] далее
//! - speller.attention.*
//! - speller.character_distribution.{weight,bias}: [V, 2D]

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use las_core::{DecodeMode, LasConfig, LasError, LasResult};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

use crate::attention::Attention;
use crate::onehot::one_hot_batch;
use crate::rnn::{RecurrentCell, RnnState};

/// Результат одного шага декодера.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// log-вероятности классов [B, V].
    pub log_probs: Tensor,
    /// Новое состояние каждого слоя RNN.
    pub hidden: Vec<RnnState>,
    /// Контекст attention [B, L].
    pub context: Tensor,
    /// Веса attention по головам, каждый [B, T].
    pub scores: Vec<Tensor>,
}

/// Результат полного прогона декодера.
#[derive(Debug, Clone)]
pub struct SpellerOutput {
    /// log-вероятности на каждом шаге, [B, V].
    pub log_probs: Vec<Tensor>,
    /// Веса attention на каждом шаге (по одному тензору [B, T] на голову).
    pub attention: Vec<Vec<Tensor>>,
    /// Токен, поданный на вход следующему шагу, [B, V].
    pub tokens: Vec<Tensor>,
    /// Был ли применён teacher forcing.
    pub teacher_forced: bool,
}

impl SpellerOutput {
    pub fn num_steps(&self) -> usize {
        self.log_probs.len()
    }

    /// argmax по классам на каждом шаге: [B][steps].
    pub fn argmax_ids(&self) -> Result<Vec<Vec<usize>>> {
        let mut per_step = Vec::with_capacity(self.log_probs.len());
        for lp in &self.log_probs {
            per_step.push(lp.argmax(D::Minus1)?.to_vec1::<u32>()?);
        }
        let batch = per_step.first().map(|s| s.len()).unwrap_or(0);
        Ok((0..batch)
            .map(|b| per_step.iter().map(|s| s[b] as usize).collect())
            .collect())
    }
}

/// Выбор следующего входного токена по log-вероятностям шага [B, V].
pub fn next_token<R: Rng + ?Sized>(
    mode: DecodeMode,
    log_probs: &Tensor,
    rng: &mut R,
) -> Result<Tensor> {
    let (_, vocab) = log_probs.dims2()?;
    let indices: Vec<Option<usize>> = match mode {
        DecodeMode::Raw => return Ok(log_probs.clone()),
        DecodeMode::Greedy => log_probs
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|i| Some(i as usize))
            .collect(),
        DecodeMode::Sample => {
            // Категориальное распределение по softmax(log_probs) = exp(log_probs).
            let probs = log_probs.exp()?.to_dtype(DType::F32)?.to_vec2::<f32>()?;
            let mut indices = Vec::with_capacity(probs.len());
            for row in &probs {
                let dist = WeightedIndex::new(row).map_err(candle_core::Error::wrap)?;
                indices.push(Some(dist.sample(rng)));
            }
            indices
        }
    };
    one_hot_batch(&indices, vocab, log_probs.device())?.to_dtype(log_probs.dtype())
}

pub struct Speller {
    rnn_layers: Vec<RecurrentCell>,
    attention: Attention,
    character_distribution: Linear,
    label_dim: usize,
    feature_dim: usize,
    max_label_len: usize,
    decode_mode: DecodeMode,
}

impl Speller {
    pub fn load(config: &LasConfig, vb: VarBuilder) -> LasResult<Self> {
        config.validate()?;

        let hidden = config.speller_hidden_dim;
        let label_dim = config.output_class_dim;
        let feature_dim = config.listener_output_dim();

        let rnn_vb = vb.pp("rnn_layer");
        let mut rnn_layers = Vec::with_capacity(config.speller_rnn_layers);
        for k in 0..config.speller_rnn_layers {
            let input_size = if k == 0 { label_dim + feature_dim } else { hidden };
            rnn_layers.push(RecurrentCell::load(
                config.rnn_unit,
                input_size,
                hidden,
                k,
                "",
                &rnn_vb,
            )?);
        }

        let attention = Attention::load(&config.attention, hidden, feature_dim, vb.pp("attention"))?;
        let character_distribution =
            linear(hidden + feature_dim, label_dim, vb.pp("character_distribution"))?;

        debug!(
            "Speller загружен: {} слоёв RNN ({}), hidden {}, словарь {}, голов attention {}",
            rnn_layers.len(),
            config.rnn_unit,
            hidden,
            label_dim,
            attention.num_heads()
        );

        Ok(Self {
            rnn_layers,
            attention,
            character_distribution,
            label_dim,
            feature_dim,
            max_label_len: config.max_label_len,
            decode_mode: config.decode_mode,
        })
    }

    pub fn label_dim(&self) -> usize {
        self.label_dim
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode
    }

    /// Нулевое состояние всех слоёв RNN.
    pub fn initial_state(&self, batch: usize, dtype: DType, device: &Device) -> Result<Vec<RnnState>> {
        self.rnn_layers
            .iter()
            .map(|cell| cell.zero_state(batch, dtype, device))
            .collect()
    }

    /// Один шаг декодера.
    ///
    /// `input`: [B, 1, V + L] или [B, V + L]; `hidden`: состояние каждого слоя RNN.
    pub fn forward_step(
        &self,
        input: &Tensor,
        hidden: &[RnnState],
        listener_feature: &Tensor,
    ) -> Result<StepOutput> {
        if hidden.len() != self.rnn_layers.len() {
            candle_core::bail!(
                "expected {} recurrent states, got {}",
                self.rnn_layers.len(),
                hidden.len()
            );
        }

        let mut x = if input.rank() == 3 {
            input.squeeze(1)?
        } else {
            input.clone()
        };
        let mut new_hidden = Vec::with_capacity(hidden.len());
        for (cell, state) in self.rnn_layers.iter().zip(hidden) {
            let next = cell.step(&x, state)?;
            x = next.h().clone();
            new_hidden.push(next);
        }

        // x: выход последнего слоя RNN [B, D]
        let attended = self.attention.forward(&x.unsqueeze(1)?, listener_feature)?;
        let logits = self
            .character_distribution
            .forward(&Tensor::cat(&[&x, &attended.context], D::Minus1)?)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;

        Ok(StepOutput {
            log_probs,
            hidden: new_hidden,
            context: attended.context,
            scores: attended.scores,
        })
    }

    /// Полный прогон декодера по выходу Listener [B, T, L].
    ///
    /// `ground_truth`: one-hot [B, S, V]. Без него teacher forcing отключён.
    /// Решение о teacher forcing принимается один раз на вызов по `rng`.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        listener_feature: &Tensor,
        ground_truth: Option<&Tensor>,
        teacher_force_rate: f64,
        rng: &mut R,
    ) -> LasResult<SpellerOutput> {
        if !(0.0..=1.0).contains(&teacher_force_rate) {
            return Err(LasError::Config(format!(
                "teacher_force_rate must be within [0, 1], got {teacher_force_rate}"
            )));
        }

        let (batch, time, feature) = listener_feature.dims3()?;
        if feature != self.feature_dim {
            return Err(LasError::shape("Speller listener feature width", self.feature_dim, feature));
        }
        if time == 0 {
            return Err(LasError::shape("Speller listener time steps", "at least 1", time));
        }
        if let Some(gt) = ground_truth {
            let (gt_batch, _, gt_labels) = gt.dims3()?;
            if gt_batch != batch || gt_labels != self.label_dim {
                return Err(LasError::shape(
                    "Speller ground truth",
                    format!("[{batch}, S, {}]", self.label_dim),
                    format!("{:?}", gt.dims()),
                ));
            }
        }

        let rate = if ground_truth.is_some() { teacher_force_rate } else { 0.0 };
        let teacher_forced = rng.gen::<f64>() < rate;
        let forced_truth = ground_truth.filter(|_| teacher_forced);
        let max_step = match forced_truth {
            Some(gt) => gt.dim(1)?,
            None => self.max_label_len,
        };

        let dtype = listener_feature.dtype();
        let device = listener_feature.device();

        // Первый вход: нулевой токен + первый кадр Listener.
        let start_token = Tensor::zeros((batch, self.label_dim), dtype, device)?;
        let first_frame = listener_feature.narrow(1, 0, 1)?.squeeze(1)?;
        let mut rnn_input = Tensor::cat(&[&start_token, &first_frame], D::Minus1)?;
        let mut hidden = self.initial_state(batch, dtype, device)?;

        let mut output = SpellerOutput {
            log_probs: Vec::with_capacity(max_step),
            attention: Vec::with_capacity(max_step),
            tokens: Vec::with_capacity(max_step),
            teacher_forced,
        };

        for step in 0..max_step {
            let step_out = self.forward_step(&rnn_input, &hidden, listener_feature)?;

            let token = match forced_truth {
                Some(gt) => gt.narrow(1, step, 1)?.squeeze(1)?.to_dtype(dtype)?,
                None => next_token(self.decode_mode, &step_out.log_probs, rng)?,
            };
            rnn_input = Tensor::cat(&[&token, &step_out.context], D::Minus1)?;
            hidden = step_out.hidden;

            if las_core::debug::enabled() {
                eprintln!(
                    "[Speller] step {}: log_probs {:?}, context {:?}",
                    step,
                    step_out.log_probs.dims(),
                    step_out.context.dims()
                );
            }

            output.log_probs.push(step_out.log_probs);
            output.attention.push(step_out.scores);
            output.tokens.push(token);
        }

        debug!(
            "Speller: {} шагов, teacher forcing: {}",
            output.num_steps(),
            teacher_forced
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onehot::one_hot_sequence;
    use candle_nn::VarMap;
    use las_core::AttentionConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config(decode_mode: DecodeMode) -> LasConfig {
        LasConfig {
            input_feature_dim: 4,
            listener_hidden_dim: 3,
            listener_layers: 1,
            speller_hidden_dim: 6,
            speller_rnn_layers: 2,
            output_class_dim: 5,
            max_label_len: 7,
            attention: AttentionConfig {
                mlp_dim: 4,
                ..AttentionConfig::default()
            },
            decode_mode,
            ..LasConfig::demo()
        }
    }

    fn speller(varmap: &VarMap, config: &LasConfig) -> Speller {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        Speller::load(config, vb).unwrap()
    }

    fn listener_feature(batch: usize, time: usize) -> Tensor {
        Tensor::randn(0f32, 1., (batch, time, 6), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_free_running_length() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Greedy));
        let mut rng = StdRng::seed_from_u64(0);

        let out = speller
            .forward(&listener_feature(2, 3), None, 1.0, &mut rng)
            .unwrap();
        assert!(!out.teacher_forced);
        assert_eq!(out.num_steps(), 7);
        assert_eq!(out.attention.len(), 7);
        assert_eq!(out.log_probs[0].dims(), &[2, 5]);
        assert_eq!(out.attention[0][0].dims(), &[2, 3]);

        for lp in &out.log_probs {
            for row in lp.exp().unwrap().to_vec2::<f32>().unwrap() {
                assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_teacher_forced_length() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Greedy));
        let mut rng = StdRng::seed_from_u64(0);

        let truth = one_hot_sequence(&[vec![1, 2, 3], vec![0, 4, 4]], 5, &Device::Cpu).unwrap();
        let out = speller
            .forward(&listener_feature(2, 3), Some(&truth), 1.0, &mut rng)
            .unwrap();
        assert!(out.teacher_forced);
        assert_eq!(out.num_steps(), 3);
        assert_eq!(
            out.tokens[1].to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 0.0, 1.0, 0.0, 0.0], vec![0.0, 0.0, 0.0, 0.0, 1.0]]
        );
    }

    #[test]
    fn test_zero_rate_never_forces() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Greedy));
        let mut rng = StdRng::seed_from_u64(3);

        let truth = one_hot_sequence(&[vec![1, 2]], 5, &Device::Cpu).unwrap();
        let out = speller
            .forward(&listener_feature(1, 2), Some(&truth), 0.0, &mut rng)
            .unwrap();
        assert!(!out.teacher_forced);
        assert_eq!(out.num_steps(), 7);
    }

    #[test]
    fn test_greedy_tokens_are_argmax_one_hot() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Greedy));
        let mut rng = StdRng::seed_from_u64(1);

        let out = speller
            .forward(&listener_feature(2, 4), None, 0.0, &mut rng)
            .unwrap();
        for (lp, token) in out.log_probs.iter().zip(&out.tokens) {
            let argmax = lp.argmax(D::Minus1).unwrap().to_vec1::<u32>().unwrap();
            for (row, &best) in token.to_vec2::<f32>().unwrap().iter().zip(&argmax) {
                assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
                assert_eq!(row.iter().sum::<f32>(), 1.0);
                assert_eq!(row[best as usize], 1.0);
            }
        }
    }

    #[test]
    fn test_raw_mode_feeds_log_probs() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Raw));
        let mut rng = StdRng::seed_from_u64(1);

        let out = speller
            .forward(&listener_feature(1, 2), None, 0.0, &mut rng)
            .unwrap();
        assert_eq!(
            out.tokens[0].to_vec2::<f32>().unwrap(),
            out.log_probs[0].to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_sampled_frequencies_follow_distribution() {
        let probs = [0.6f32, 0.3, 0.1];
        let rows = 4000;
        let log_probs = Tensor::new(&probs, &Device::Cpu)
            .unwrap()
            .log()
            .unwrap()
            .unsqueeze(0)
            .unwrap()
            .repeat((rows, 1))
            .unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let tokens = next_token(DecodeMode::Sample, &log_probs, &mut rng).unwrap();
        let counts = tokens.sum(0).unwrap().to_vec1::<f32>().unwrap();

        for (count, p) in counts.iter().zip(probs) {
            let freq = count / rows as f32;
            assert!((freq - p).abs() < 0.03, "freq {freq} vs p {p}");
        }
    }

    #[test]
    fn test_forward_step_accepts_three_dim_input() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Greedy));
        let hidden = speller.initial_state(1, DType::F32, &Device::Cpu).unwrap();
        let input = Tensor::zeros((1, 1, 11), DType::F32, &Device::Cpu).unwrap();

        let out = speller
            .forward_step(&input, &hidden, &listener_feature(1, 5))
            .unwrap();
        assert_eq!(out.log_probs.dims(), &[1, 5]);
        assert_eq!(out.context.dims(), &[1, 6]);
        assert_eq!(out.hidden.len(), 2);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let varmap = VarMap::new();
        let speller = speller(&varmap, &small_config(DecodeMode::Greedy));
        let mut rng = StdRng::seed_from_u64(0);

        let err = speller.forward(&listener_feature(1, 2), None, 1.5, &mut rng);
        assert!(matches!(err, Err(LasError::Config(_))));

        let truth = one_hot_sequence(&[vec![1, 2]], 4, &Device::Cpu).unwrap();
        let err = speller.forward(&listener_feature(1, 2), Some(&truth), 1.0, &mut rng);
        assert!(matches!(err, Err(LasError::Shape { .. })));
    }

    #[test]
    fn test_pytorch_key_names() {
        let varmap = VarMap::new();
        let _ = speller(&varmap, &small_config(DecodeMode::Greedy));
        let data = varmap.data().lock().unwrap();

        // Вход первого слоя: V + L = 5 + 6.
        assert_eq!(data["rnn_layer.weight_ih_l0"].as_tensor().dims(), &[24, 11]);
        assert_eq!(data["rnn_layer.weight_ih_l1"].as_tensor().dims(), &[24, 6]);
        assert_eq!(data["character_distribution.weight"].as_tensor().dims(), &[5, 12]);
        assert!(data.contains_key("attention.psi.bias"));
    }
}
