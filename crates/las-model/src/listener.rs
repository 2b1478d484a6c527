//! Listener: стек пирамидальных двунаправленных RNN.
//!
//! Каждый слой склеивает соседние кадры ([B, T, F] → [B, T/2, 2F]) и прогоняет
//! двунаправленный RNN, так что после N слоёв время сжато в 2^N раз.
//!
//! Весовые ключи:
//! - listener.pLSTM_layer{i}.BLSTM.weight_ih_l0: [G*hidden, input]
//! - listener.pLSTM_layer{i}.BLSTM.weight_ih_l0_reverse: [G*hidden, input]
//! - ...

use candle_core::Tensor;
use candle_nn::VarBuilder;
use las_core::{LasConfig, LasError, LasResult, RnnUnit};
use tracing::debug;

use crate::rnn::{BiRnn, RnnState};

/// Один пирамидальный слой.
pub struct PyramidalEncoderLayer {
    rnn: BiRnn,
    input_dim: usize,
}

impl PyramidalEncoderLayer {
    /// `input_dim`: ширина кадра до склейки (F). RNN получает 2F.
    pub fn load(
        unit: RnnUnit,
        input_dim: usize,
        hidden_dim: usize,
        vb: VarBuilder,
    ) -> LasResult<Self> {
        let rnn = BiRnn::load(unit, 2 * input_dim, hidden_dim, &vb.pp("BLSTM"))?;
        Ok(Self { rnn, input_dim })
    }

    /// [B, T, F] → ([B, T/2, 2H], финальные состояния обоих направлений).
    pub fn forward(&self, input: &Tensor) -> LasResult<(Tensor, (RnnState, RnnState))> {
        let (batch, time, feature) = input.dims3()?;
        if feature != self.input_dim {
            return Err(LasError::shape(
                "PyramidalEncoderLayer feature width",
                self.input_dim,
                feature,
            ));
        }
        if time == 0 || time % 2 != 0 {
            return Err(LasError::shape(
                "PyramidalEncoderLayer time steps",
                "an even non-zero length",
                time,
            ));
        }

        let merged = input
            .contiguous()?
            .reshape((batch, time / 2, feature * 2))?;
        Ok(self.rnn.forward(&merged)?)
    }
}

/// Пирамидальный энкодер.
pub struct Listener {
    layers: Vec<PyramidalEncoderLayer>,
    input_dim: usize,
}

impl Listener {
    pub fn load(config: &LasConfig, vb: VarBuilder) -> LasResult<Self> {
        if config.listener_layers == 0 {
            return Err(LasError::Config(
                "Listener should have at least 1 layer".into(),
            ));
        }

        let mut layers = Vec::with_capacity(config.listener_layers);
        for i in 0..config.listener_layers {
            let input_dim = if i == 0 {
                config.input_feature_dim
            } else {
                config.listener_output_dim()
            };
            let layer = PyramidalEncoderLayer::load(
                config.rnn_unit,
                input_dim,
                config.listener_hidden_dim,
                vb.pp(format!("pLSTM_layer{i}")),
            )?;
            layers.push(layer);
        }

        debug!(
            "Listener загружен: {} слоёв, {} → {} ({})",
            layers.len(),
            config.input_feature_dim,
            config.listener_output_dim(),
            config.rnn_unit
        );

        Ok(Self {
            layers,
            input_dim: config.input_feature_dim,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Во сколько раз сжимается время.
    pub fn time_reduction(&self) -> usize {
        1usize << self.layers.len()
    }

    /// [B, T, F] → [B, T/2^N, 2H].
    ///
    /// T должно делиться на 2^N; проверяется до прогона слоёв.
    pub fn forward(&self, input: &Tensor) -> LasResult<Tensor> {
        let (_, time, feature) = input.dims3()?;
        if feature != self.input_dim {
            return Err(LasError::shape("Listener feature width", self.input_dim, feature));
        }
        let reduction = self.time_reduction();
        if time == 0 || time % reduction != 0 {
            return Err(LasError::shape(
                "Listener time steps",
                format!("a non-zero multiple of {reduction}"),
                time,
            ));
        }

        let mut output = input.clone();
        for layer in &self.layers {
            let (next, _) = layer.forward(&output)?;
            output = next;
        }

        if las_core::debug::enabled() {
            eprintln!("[Listener] {:?} → {:?}", input.dims(), output.dims());
        }
        Ok(output)
    }
}
