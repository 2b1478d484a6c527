//! Рекуррентные ячейки LSTM / GRU с весами в формате PyTorch.
//!
//! Весовые ключи (`{suffix}` = "" или "_reverse" для обратного направления):
//! - weight_ih_l{i}{suffix}: [G*hidden, input]
//! - weight_hh_l{i}{suffix}: [G*hidden, hidden]
//! - bias_ih_l{i}{suffix}: [G*hidden]
//! - bias_hh_l{i}{suffix}: [G*hidden]
//!
//! G = 4 для LSTM (i, f, g, o) и 3 для GRU (r, z, n).

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::init::Init;
use candle_nn::VarBuilder;
use las_core::RnnUnit;

/// Веса одной ячейки. Общие для LSTM и GRU, различается только число гейтов.
struct CellWeights {
    weight_ih: Tensor, // [G*hidden, input_size]
    weight_hh: Tensor, // [G*hidden, hidden_size]
    bias_ih: Tensor,   // [G*hidden]
    bias_hh: Tensor,   // [G*hidden]
}

impl CellWeights {
    fn load(
        gates: usize,
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        suffix: &str,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let gate_size = gates * hidden_size;
        // Инициализация как в torch.nn.LSTM: U(-1/sqrt(hidden), 1/sqrt(hidden)).
        // Используется только при загрузке через VarMap.
        let k = 1.0 / (hidden_size as f64).sqrt();
        let init = Init::Uniform { lo: -k, up: k };
        let get = |shape: (usize, usize), name: &str| {
            vb.get_with_hints(shape, &format!("{name}_l{layer_idx}{suffix}"), init)
        };
        let weight_ih = get((gate_size, input_size), "weight_ih")?;
        let weight_hh = get((gate_size, hidden_size), "weight_hh")?;
        let bias_ih = vb.get_with_hints(gate_size, &format!("bias_ih_l{layer_idx}{suffix}"), init)?;
        let bias_hh = vb.get_with_hints(gate_size, &format!("bias_hh_l{layer_idx}{suffix}"), init)?;
        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih,
            bias_hh,
        })
    }

    /// x @ W_ih^T + b_ih: [B, G*hidden]
    fn input_gates(&self, x: &Tensor) -> Result<Tensor> {
        x.matmul(&self.weight_ih.t()?)?.broadcast_add(&self.bias_ih)
    }

    /// h @ W_hh^T + b_hh: [B, G*hidden]
    fn hidden_gates(&self, h: &Tensor) -> Result<Tensor> {
        h.matmul(&self.weight_hh.t()?)?.broadcast_add(&self.bias_hh)
    }
}

fn sigmoid(x: &Tensor) -> Result<Tensor> {
    candle_nn::Activation::Sigmoid.forward(x)
}

/// Ячейка LSTM.
///
/// Формулы:
/// gates = x @ W_ih^T + b_ih + h @ W_hh^T + b_hh
/// i, f, g, o = gates.chunk(4)
/// c = sigmoid(f) * c_prev + sigmoid(i) * tanh(g)
/// h = sigmoid(o) * tanh(c)
pub struct LstmCell {
    weights: CellWeights,
    hidden_size: usize,
}

impl LstmCell {
    pub fn load(
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        suffix: &str,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let weights = CellWeights::load(4, input_size, hidden_size, layer_idx, suffix, vb)?;
        Ok(Self {
            weights,
            hidden_size,
        })
    }

    /// Один шаг: x [B, input], (h, c) [B, hidden] → (h', c').
    pub fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor)> {
        let gates = (self.weights.input_gates(x)? + self.weights.hidden_gates(h)?)?;

        let hs = self.hidden_size;
        let i_gate = sigmoid(&gates.narrow(D::Minus1, 0, hs)?)?;
        let f_gate = sigmoid(&gates.narrow(D::Minus1, hs, hs)?)?;
        let g_gate = gates.narrow(D::Minus1, 2 * hs, hs)?.tanh()?;
        let o_gate = sigmoid(&gates.narrow(D::Minus1, 3 * hs, hs)?)?;

        let c_new = ((f_gate * c)? + (i_gate * g_gate)?)?;
        let h_new = (o_gate * c_new.tanh()?)?;
        Ok((h_new, c_new))
    }
}

/// Ячейка GRU (порядок гейтов PyTorch: r, z, n).
///
/// r = sigmoid(x_r + h_r), z = sigmoid(x_z + h_z)
/// n = tanh(x_n + r * h_n)
/// h = (1 - z) * n + z * h_prev
pub struct GruCell {
    weights: CellWeights,
    hidden_size: usize,
}

impl GruCell {
    pub fn load(
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        suffix: &str,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let weights = CellWeights::load(3, input_size, hidden_size, layer_idx, suffix, vb)?;
        Ok(Self {
            weights,
            hidden_size,
        })
    }

    pub fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gi = self.weights.input_gates(x)?;
        let gh = self.weights.hidden_gates(h)?;
        let hs = self.hidden_size;

        let r = sigmoid(&(gi.narrow(D::Minus1, 0, hs)? + gh.narrow(D::Minus1, 0, hs)?)?)?;
        let z = sigmoid(&(gi.narrow(D::Minus1, hs, hs)? + gh.narrow(D::Minus1, hs, hs)?)?)?;
        let n = (gi.narrow(D::Minus1, 2 * hs, hs)? + (r * gh.narrow(D::Minus1, 2 * hs, hs)?)?)?
            .tanh()?;

        // (1 - z) * n + z * h = n + z * (h - n)
        let h_new = (&n + (z * (h - &n)?)?)?;
        Ok(h_new)
    }
}

/// Рекуррентное состояние одного слоя.
#[derive(Debug, Clone)]
pub enum RnnState {
    Lstm { h: Tensor, c: Tensor },
    Gru { h: Tensor },
}

impl RnnState {
    /// Скрытое состояние h: [B, hidden].
    pub fn h(&self) -> &Tensor {
        match self {
            Self::Lstm { h, .. } => h,
            Self::Gru { h } => h,
        }
    }
}

/// Ячейка с единым интерфейсом `step` / `seq` для обоих типов RNN.
pub enum RecurrentCell {
    Lstm(LstmCell),
    Gru(GruCell),
}

impl RecurrentCell {
    pub fn load(
        unit: RnnUnit,
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        suffix: &str,
        vb: &VarBuilder,
    ) -> Result<Self> {
        Ok(match unit {
            RnnUnit::Lstm => {
                Self::Lstm(LstmCell::load(input_size, hidden_size, layer_idx, suffix, vb)?)
            }
            RnnUnit::Gru => Self::Gru(GruCell::load(input_size, hidden_size, layer_idx, suffix, vb)?),
        })
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            Self::Lstm(cell) => cell.hidden_size,
            Self::Gru(cell) => cell.hidden_size,
        }
    }

    /// Нулевое начальное состояние для батча.
    pub fn zero_state(&self, batch: usize, dtype: DType, device: &Device) -> Result<RnnState> {
        let zeros = || Tensor::zeros((batch, self.hidden_size()), dtype, device);
        Ok(match self {
            Self::Lstm(_) => RnnState::Lstm {
                h: zeros()?,
                c: zeros()?,
            },
            Self::Gru(_) => RnnState::Gru { h: zeros()? },
        })
    }

    /// Один шаг по времени: x [B, input].
    pub fn step(&self, x: &Tensor, state: &RnnState) -> Result<RnnState> {
        match (self, state) {
            (Self::Lstm(cell), RnnState::Lstm { h, c }) => {
                let (h, c) = cell.step(x, h, c)?;
                Ok(RnnState::Lstm { h, c })
            }
            (Self::Gru(cell), RnnState::Gru { h }) => Ok(RnnState::Gru {
                h: cell.step(x, h)?,
            }),
            _ => candle_core::bail!("recurrent state does not match the cell type"),
        }
    }

    /// Прогон по последовательности [B, T, input].
    ///
    /// Возвращает выходы [B, T, hidden] в исходном порядке времени и финальное состояние.
    /// При `reverse` последовательность обходится с конца.
    pub fn seq(&self, xs: &Tensor, reverse: bool) -> Result<(Tensor, RnnState)> {
        let (batch, seq_len, _) = xs.dims3()?;
        let mut state = self.zero_state(batch, xs.dtype(), xs.device())?;
        let mut outputs = Vec::with_capacity(seq_len);

        for i in 0..seq_len {
            let t = if reverse { seq_len - 1 - i } else { i };
            let x_t = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            state = self.step(&x_t, &state)?;
            outputs.push(state.h().clone());
        }
        if reverse {
            outputs.reverse();
        }

        Ok((Tensor::stack(&outputs, 1)?, state))
    }
}

/// Однослойный двунаправленный RNN (`bidirectional=True, batch_first=True`).
pub struct BiRnn {
    fwd: RecurrentCell,
    bwd: RecurrentCell,
}

impl BiRnn {
    pub fn load(unit: RnnUnit, input_size: usize, hidden_size: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            fwd: RecurrentCell::load(unit, input_size, hidden_size, 0, "", vb)?,
            bwd: RecurrentCell::load(unit, input_size, hidden_size, 0, "_reverse", vb)?,
        })
    }

    /// xs [B, T, input] → ([B, T, 2*hidden], (состояние прямого, состояние обратного)).
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, (RnnState, RnnState))> {
        let (fwd_out, fwd_state) = self.fwd.seq(xs, false)?;
        let (bwd_out, bwd_state) = self.bwd.seq(xs, true)?;
        let output = Tensor::cat(&[fwd_out, bwd_out], D::Minus1)?;
        Ok((output, (fwd_state, bwd_state)))
    }
}
