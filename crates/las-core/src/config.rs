//! Конфигурационные структуры для LAS и извлечения признаков.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LasError, LasResult};

/// Тип рекуррентного блока для Listener и Speller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RnnUnit {
    /// LSTM: скрытое состояние (h, c).
    Lstm,
    /// GRU: только h.
    Gru,
}

impl FromStr for RnnUnit {
    type Err = LasError;

    fn from_str(s: &str) -> LasResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lstm" => Ok(Self::Lstm),
            "gru" => Ok(Self::Gru),
            other => Err(LasError::Config(format!(
                "unsupported rnn unit '{other}' (expected: lstm, gru)"
            ))),
        }
    }
}

impl fmt::Display for RnnUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lstm => write!(f, "lstm"),
            Self::Gru => write!(f, "gru"),
        }
    }
}

/// В JSON строковые перечисления разбираются тем же `FromStr`, что и в CLI.
macro_rules! string_serde {
    ($ty:ty) => {
        impl TryFrom<String> for $ty {
            type Error = LasError;

            fn try_from(s: String) -> LasResult<Self> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.to_string()
            }
        }
    };
}

string_serde!(RnnUnit);
string_serde!(AttentionMode);
string_serde!(AttentionActivation);

/// Функция оценки внимания. Определено только скалярное произведение.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttentionMode {
    #[default]
    Dot,
}

impl FromStr for AttentionMode {
    type Err = LasError;

    fn from_str(s: &str) -> LasResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dot" => Ok(Self::Dot),
            other => Err(LasError::Config(format!(
                "attention mode '{other}' is not supported (only 'dot')"
            ))),
        }
    }
}

impl fmt::Display for AttentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dot => write!(f, "dot"),
        }
    }
}

/// Активация после MLP-проекций в attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttentionActivation {
    #[default]
    Relu,
    None,
}

impl FromStr for AttentionActivation {
    type Err = LasError;

    fn from_str(s: &str) -> LasResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Self::Relu),
            "none" => Ok(Self::None),
            other => Err(LasError::Config(format!(
                "unsupported attention activation '{other}' (expected: relu, none)"
            ))),
        }
    }
}

impl fmt::Display for AttentionActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relu => write!(f, "relu"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Политика выбора следующего входного токена Speller без teacher forcing.
///
/// В JSON хранится числом: 0, 1 или 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DecodeMode {
    /// 0: log-вероятности шага подаются на вход как есть.
    Raw,
    /// 1: one-hot от argmax.
    #[default]
    Greedy,
    /// 2: one-hot от индекса, выбранного из категориального распределения.
    Sample,
}

impl TryFrom<u8> for DecodeMode {
    type Error = LasError;

    fn try_from(v: u8) -> LasResult<Self> {
        match v {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Greedy),
            2 => Ok(Self::Sample),
            other => Err(LasError::Config(format!(
                "decode_mode {other} is invalid (expected 0, 1 or 2)"
            ))),
        }
    }
}

impl From<DecodeMode> for u8 {
    fn from(mode: DecodeMode) -> u8 {
        match mode {
            DecodeMode::Raw => 0,
            DecodeMode::Greedy => 1,
            DecodeMode::Sample => 2,
        }
    }
}

/// Конфигурация attention-блока Speller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// Пропускать состояние декодера и выход Listener через линейные проекции.
    pub use_mlp: bool,

    /// Размерность пространства attention одной головы (при `use_mlp`).
    pub mlp_dim: usize,

    /// Активация после проекций.
    pub activation: AttentionActivation,

    /// Функция оценки.
    pub mode: AttentionMode,

    /// Количество голов.
    pub multi_head: usize,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            use_mlp: true,
            mlp_dim: 64,
            activation: AttentionActivation::Relu,
            mode: AttentionMode::Dot,
            multi_head: 1,
        }
    }
}

/// Конфигурация модели LAS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LasConfig {
    /// Ширина входного кадра признаков (39 для MFCC + Δ + ΔΔ).
    pub input_feature_dim: usize,

    /// Скрытая размерность одного направления Listener.
    pub listener_hidden_dim: usize,

    /// Количество пирамидальных слоёв (сжатие по времени 2^N).
    pub listener_layers: usize,

    /// Скрытая размерность Speller. Должна быть равна 2 × `listener_hidden_dim`.
    pub speller_hidden_dim: usize,

    /// Количество слоёв RNN в Speller.
    pub speller_rnn_layers: usize,

    /// Размер словаря (число классов на выходе).
    pub output_class_dim: usize,

    /// Число шагов декодирования без teacher forcing.
    pub max_label_len: usize,

    /// Тип рекуррентного блока.
    pub rnn_unit: RnnUnit,

    /// Использовать ускоритель (CUDA), если доступен.
    pub use_gpu: bool,

    /// Параметры attention.
    pub attention: AttentionConfig,

    /// Политика декодирования.
    pub decode_mode: DecodeMode,
}

impl Default for LasConfig {
    fn default() -> Self {
        Self::kspon()
    }
}

impl LasConfig {
    /// Конфигурация для KsponSpeech: 39-мерные MFCC, 53 метки чамо.
    pub fn kspon() -> Self {
        Self {
            input_feature_dim: 39,
            listener_hidden_dim: 256,
            listener_layers: 3,
            speller_hidden_dim: 512,
            speller_rnn_layers: 1,
            output_class_dim: 53,
            max_label_len: 128,
            rnn_unit: RnnUnit::Lstm,
            use_gpu: false,
            attention: AttentionConfig::default(),
            decode_mode: DecodeMode::Greedy,
        }
    }

    /// Небольшая конфигурация для smoke-тестов: вход 80, 3 слоя по 160, 30 классов.
    pub fn demo() -> Self {
        Self {
            input_feature_dim: 80,
            listener_hidden_dim: 160,
            listener_layers: 3,
            speller_hidden_dim: 320,
            speller_rnn_layers: 1,
            output_class_dim: 30,
            max_label_len: 48,
            rnn_unit: RnnUnit::Lstm,
            use_gpu: false,
            attention: AttentionConfig::default(),
            decode_mode: DecodeMode::Greedy,
        }
    }

    /// Загрузить конфигурацию из JSON-файла и проверить её.
    pub fn from_json_file(path: impl AsRef<Path>) -> LasResult<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        // Недопустимые значения полей (режим attention, decode_mode, ...) это
        // ошибка конфигурации, а не синтаксиса JSON.
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            if e.is_data() {
                LasError::Config(e.to_string())
            } else {
                LasError::Json(e)
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Ширина выхода Listener (конкатенация двух направлений).
    pub fn listener_output_dim(&self) -> usize {
        2 * self.listener_hidden_dim
    }

    /// Во сколько раз Listener сжимает время.
    pub fn time_reduction(&self) -> usize {
        1usize << self.listener_layers
    }

    /// Проверить согласованность параметров.
    pub fn validate(&self) -> LasResult<()> {
        let cfg_err = |msg: String| -> LasResult<()> { Err(LasError::Config(msg)) };

        if self.input_feature_dim == 0 {
            return cfg_err("input_feature_dim must be > 0".into());
        }
        if self.listener_hidden_dim == 0 {
            return cfg_err("listener_hidden_dim must be > 0".into());
        }
        if self.listener_layers == 0 {
            return cfg_err("Listener should have at least 1 layer".into());
        }
        if self.listener_layers >= usize::BITS as usize {
            return cfg_err(format!("listener_layers={} is too large", self.listener_layers));
        }
        if self.speller_rnn_layers == 0 {
            return cfg_err("speller_rnn_layers must be >= 1".into());
        }
        if self.output_class_dim == 0 {
            return cfg_err("output_class_dim (vocabulary size) must be > 0".into());
        }
        if self.max_label_len == 0 {
            return cfg_err("max_label_len must be > 0".into());
        }
        // Контекст (ширина выхода Listener) подаётся обратно на вход RNN Speller
        // и конкатенируется с её выходом перед проекцией в словарь.
        if self.speller_hidden_dim != self.listener_output_dim() {
            return cfg_err(format!(
                "speller_hidden_dim={} must equal 2 * listener_hidden_dim={}",
                self.speller_hidden_dim,
                self.listener_output_dim()
            ));
        }

        let att = &self.attention;
        if att.multi_head == 0 {
            return cfg_err("attention.multi_head must be >= 1".into());
        }
        if att.use_mlp && att.mlp_dim == 0 {
            return cfg_err("attention.mlp_dim must be > 0 when use_mlp is set".into());
        }
        if att.multi_head > 1 && !att.use_mlp {
            return cfg_err(format!(
                "attention.multi_head={} requires use_mlp (heads split the projected query)",
                att.multi_head
            ));
        }

        Ok(())
    }
}

/// Параметры MFCC-экстрактора.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfccConfig {
    /// Ожидаемая частота дискретизации в Гц.
    pub sample_rate: u32,

    /// Длина окна в секундах.
    pub win_len: f32,

    /// Шаг окна в секундах.
    pub win_step: f32,

    /// Количество кепстральных коэффициентов.
    pub num_cep: usize,

    /// Количество треугольных фильтров.
    pub n_filt: usize,

    /// Размер FFT.
    pub n_fft: usize,

    /// Нижняя граница фильтров в Гц.
    pub low_freq: f32,

    /// Верхняя граница фильтров в Гц (`None` = sample_rate / 2).
    pub high_freq: Option<f32>,

    /// Коэффициент pre-emphasis.
    pub preemph: f32,

    /// Параметр синусоидального лифтера (0 = без лифтера).
    pub ceplifter: usize,

    /// Заменить c0 на логарифм энергии кадра.
    pub append_energy: bool,

    /// Полуширина окна регрессии для Δ.
    pub delta_n: usize,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            win_len: 0.025,
            win_step: 0.01,
            num_cep: 13,
            n_filt: 26,
            n_fft: 512,
            low_freq: 0.0,
            high_freq: None,
            preemph: 0.97,
            ceplifter: 22,
            append_energy: true,
            delta_n: 2,
        }
    }
}

impl MfccConfig {
    /// Длина кадра в отсчётах.
    pub fn frame_len(&self) -> usize {
        round_half_up(self.win_len * self.sample_rate as f32)
    }

    /// Шаг кадра в отсчётах.
    pub fn frame_step(&self) -> usize {
        round_half_up(self.win_step * self.sample_rate as f32)
    }

    /// Ширина итогового кадра: MFCC + Δ + ΔΔ.
    pub fn feature_dim(&self) -> usize {
        3 * self.num_cep
    }

    /// Верхняя граница фильтров в Гц.
    pub fn high_freq(&self) -> f32 {
        self.high_freq.unwrap_or(self.sample_rate as f32 / 2.0)
    }

    pub fn validate(&self) -> LasResult<()> {
        if self.frame_len() == 0 || self.frame_step() == 0 {
            return Err(LasError::Config(format!(
                "frame length/step must be positive (got {} / {})",
                self.frame_len(),
                self.frame_step()
            )));
        }
        if self.num_cep == 0 || self.num_cep > self.n_filt {
            return Err(LasError::Config(format!(
                "num_cep={} must be in 1..={}",
                self.num_cep, self.n_filt
            )));
        }
        if self.high_freq() > self.sample_rate as f32 / 2.0 {
            return Err(LasError::Config(format!(
                "high_freq {} exceeds Nyquist {}",
                self.high_freq(),
                self.sample_rate / 2
            )));
        }
        if self.delta_n == 0 {
            return Err(LasError::Config("delta_n must be >= 1".into()));
        }
        Ok(())
    }
}

fn round_half_up(v: f32) -> usize {
    (v + 0.5).floor().max(0.0) as usize
}
