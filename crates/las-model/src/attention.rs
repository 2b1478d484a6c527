//! Dot-product attention Speller над кадрами Listener.
//!
//! Весовые ключи (только при `use_mlp`):
//! - speller.attention.phi.{weight,bias}: [mlp_dim * heads, D]
//! - speller.attention.psi.{weight,bias}: [mlp_dim, L]
//! - speller.attention.dim_reduce.{weight,bias}: [L, L * heads] (только при heads > 1)

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use las_core::{AttentionActivation, AttentionConfig, AttentionMode, LasError, LasResult};

/// Результат одного шага attention.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Веса внимания по головам, каждый [B, T]; строки суммируются в 1.
    pub scores: Vec<Tensor>,
    /// Контекстный вектор [B, L].
    pub context: Tensor,
}

/// MLP-проекции запроса и кадров Listener.
struct Preprocess {
    phi: Linear,
    psi: Linear,
    activation: AttentionActivation,
}

impl Preprocess {
    fn activate(&self, x: Tensor) -> Result<Tensor> {
        match self.activation {
            AttentionActivation::Relu => x.relu(),
            AttentionActivation::None => Ok(x),
        }
    }
}

pub struct Attention {
    mode: AttentionMode,
    preprocess: Option<Preprocess>,
    dim_reduce: Option<Linear>,
    mlp_dim: usize,
    num_heads: usize,
}

impl Attention {
    /// `query_dim`: ширина выхода RNN Speller (D), `feature_dim`: ширина кадра Listener (L).
    pub fn load(
        config: &AttentionConfig,
        query_dim: usize,
        feature_dim: usize,
        vb: VarBuilder,
    ) -> LasResult<Self> {
        let heads = config.multi_head;
        if heads == 0 {
            return Err(LasError::Config("attention.multi_head must be >= 1".into()));
        }
        if heads > 1 && !config.use_mlp {
            return Err(LasError::Config(format!(
                "attention.multi_head={heads} requires use_mlp"
            )));
        }
        if !config.use_mlp && query_dim != feature_dim {
            return Err(LasError::Config(format!(
                "dot attention without MLP needs equal widths, got query {query_dim} and feature {feature_dim}"
            )));
        }

        let preprocess = if config.use_mlp {
            Some(Preprocess {
                phi: linear(query_dim, config.mlp_dim * heads, vb.pp("phi"))?,
                psi: linear(feature_dim, config.mlp_dim, vb.pp("psi"))?,
                activation: config.activation,
            })
        } else {
            None
        };
        let dim_reduce = if heads > 1 {
            Some(linear(feature_dim * heads, feature_dim, vb.pp("dim_reduce"))?)
        } else {
            None
        };

        Ok(Self {
            mode: config.mode,
            preprocess,
            dim_reduce,
            mlp_dim: config.mlp_dim,
            num_heads: heads,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// decoder_state [B, 1, D], listener_feature [B, T, L] → scores + context [B, L].
    pub fn forward(&self, decoder_state: &Tensor, listener_feature: &Tensor) -> Result<AttentionOutput> {
        let listener_feature = listener_feature.contiguous()?;
        let (query, keys) = match &self.preprocess {
            Some(p) => (
                p.activate(p.phi.forward(decoder_state)?)?,
                p.activate(p.psi.forward(&listener_feature)?)?,
            ),
            None => (decoder_state.clone(), listener_feature.clone()),
        };
        // [B, K, T]
        let keys_t = keys.transpose(1, 2)?.contiguous()?;

        let mut scores = Vec::with_capacity(self.num_heads);
        let mut contexts = Vec::with_capacity(self.num_heads);
        for head in 0..self.num_heads {
            let q = if self.num_heads == 1 {
                query.clone()
            } else {
                query
                    .narrow(D::Minus1, head * self.mlp_dim, self.mlp_dim)?
                    .contiguous()?
            };
            let (score, context) = self.score_head(&q, &keys_t, &listener_feature)?;
            scores.push(score);
            contexts.push(context);
        }

        let context = match &self.dim_reduce {
            Some(reduce) => reduce.forward(&Tensor::cat(&contexts, D::Minus1)?)?,
            None => contexts.remove(0),
        };

        Ok(AttentionOutput { scores, context })
    }

    /// Одна голова: q [B, 1, K], keys_t [B, K, T] → (score [B, T], context [B, L]).
    fn score_head(&self, q: &Tensor, keys_t: &Tensor, values: &Tensor) -> Result<(Tensor, Tensor)> {
        let energy = match self.mode {
            AttentionMode::Dot => q.matmul(keys_t)?.squeeze(1)?,
        };
        let score = candle_nn::ops::softmax_last_dim(&energy)?;
        let context = score.unsqueeze(1)?.matmul(values)?.squeeze(1)?;
        Ok((score, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    /// Контекст без matmul: Σ_t score[b, t] * feature[b, t, :].
    fn weighted_sum(score: &Tensor, features: &Tensor) -> Tensor {
        features
            .broadcast_mul(&score.unsqueeze(2).unwrap())
            .unwrap()
            .sum(1)
            .unwrap()
    }

    fn config(use_mlp: bool, multi_head: usize) -> AttentionConfig {
        AttentionConfig {
            use_mlp,
            mlp_dim: 5,
            multi_head,
            ..AttentionConfig::default()
        }
    }

    #[test]
    fn test_scores_are_distributions() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attention = Attention::load(&config(true, 1), 8, 8, vb).unwrap();

        let state = Tensor::randn(0f32, 1., (2, 1, 8), &Device::Cpu).unwrap();
        let features = Tensor::randn(0f32, 1., (2, 7, 8), &Device::Cpu).unwrap();
        let out = attention.forward(&state, &features).unwrap();

        assert_eq!(out.scores.len(), 1);
        assert_eq!(out.scores[0].dims(), &[2, 7]);
        assert_eq!(out.context.dims(), &[2, 8]);
        for row in out.scores[0].to_vec2::<f32>().unwrap() {
            assert!(row.iter().all(|&p| p >= 0.0));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_raw_dot_product_matches_weighted_sum() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attention = Attention::load(&config(false, 1), 4, 4, vb).unwrap();
        assert!(varmap.all_vars().is_empty());

        let state = Tensor::randn(0f32, 1., (1, 1, 4), &Device::Cpu).unwrap();
        let features = Tensor::randn(0f32, 1., (1, 5, 4), &Device::Cpu).unwrap();
        let out = attention.forward(&state, &features).unwrap();

        let energy = features
            .broadcast_mul(&state)
            .unwrap()
            .sum(2)
            .unwrap();
        let expected_score = candle_nn::ops::softmax_last_dim(&energy).unwrap();
        assert!(max_abs_diff(&out.scores[0], &expected_score) < 1e-5);
        assert!(max_abs_diff(&out.context, &weighted_sum(&expected_score, &features)) < 1e-5);
    }

    #[test]
    fn test_single_head_skips_reduction() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attention = Attention::load(&config(true, 1), 6, 6, vb).unwrap();
        {
            let data = varmap.data().lock().unwrap();
            assert!(data.contains_key("phi.weight"));
            assert!(!data.keys().any(|k| k.starts_with("dim_reduce")));
        }

        let state = Tensor::randn(0f32, 1., (3, 1, 6), &Device::Cpu).unwrap();
        let features = Tensor::randn(0f32, 1., (3, 4, 6), &Device::Cpu).unwrap();
        let out = attention.forward(&state, &features).unwrap();

        // Контекст одной головы = взвешенная сумма исходных кадров.
        let expected = weighted_sum(&out.scores[0], &features);
        assert!(max_abs_diff(&out.context, &expected) < 1e-5);
    }

    #[test]
    fn test_multi_head_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attention = Attention::load(&config(true, 3), 6, 6, vb).unwrap();
        assert_eq!(attention.num_heads(), 3);

        let state = Tensor::randn(0f32, 1., (2, 1, 6), &Device::Cpu).unwrap();
        let features = Tensor::randn(0f32, 1., (2, 4, 6), &Device::Cpu).unwrap();
        let out = attention.forward(&state, &features).unwrap();

        assert_eq!(out.scores.len(), 3);
        for score in &out.scores {
            assert_eq!(score.dims(), &[2, 4]);
        }
        assert_eq!(out.context.dims(), &[2, 6]);

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["phi.weight"].as_tensor().dims(), &[15, 6]);
        assert_eq!(data["dim_reduce.weight"].as_tensor().dims(), &[6, 18]);
    }

    #[test]
    fn test_multi_head_requires_mlp() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            Attention::load(&config(false, 2), 6, 6, vb),
            Err(LasError::Config(_))
        ));
    }
}
