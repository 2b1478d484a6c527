//! Общие типы для LAS.
//!
//! Содержит буфер аудио и матрицу акустических признаков, которые
//! передаются между крейтами `audio`, `las-model` и CLI.

use candle_core::{Device, Tensor};

use crate::error::{LasError, LasResult};

// ---------------------------------------------------------------------------
// Аудио-буфер
// ---------------------------------------------------------------------------

/// Буфер необработанного аудио.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Аудио-сэмплы (нормализованы к [-1.0, 1.0)).
    pub samples: Vec<f32>,

    /// Частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Количество каналов.
    pub channels: usize,

    /// Сэмплы получены из 16-битного целочисленного PCM.
    pub from_pcm16: bool,
}

impl AudioBuffer {
    /// Создать новый буфер аудио.
    pub fn new(samples: Vec<f32>, sample_rate: usize, channels: usize) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            from_pcm16: false,
        }
    }

    /// Буфер из нормализованных 16-битных целых сэмплов (WAV int16, сырой PCM).
    pub fn from_pcm16(samples: Vec<f32>, sample_rate: usize, channels: usize) -> Self {
        Self {
            from_pcm16: true,
            ..Self::new(samples, sample_rate, channels)
        }
    }

    /// Длительность в секундах.
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / (self.sample_rate * self.channels) as f32
    }

    /// Количество сэмплов на канал.
    pub fn num_samples(&self) -> usize {
        self.samples.len() / self.channels
    }
}

// ---------------------------------------------------------------------------
// Последовательность акустических признаков
// ---------------------------------------------------------------------------

/// Матрица признаков одной записи: `num_frames` кадров по `dim` значений.
///
/// Хранится построчно (кадр за кадром). После создания не изменяется.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    data: Vec<f32>,
    num_frames: usize,
    dim: usize,
}

impl FeatureSequence {
    /// Собрать из плоского буфера `[num_frames * dim]`.
    pub fn new(data: Vec<f32>, num_frames: usize, dim: usize) -> LasResult<Self> {
        if data.len() != num_frames * dim {
            return Err(LasError::shape(
                "FeatureSequence::new",
                format!("{num_frames} x {dim} = {} values", num_frames * dim),
                format!("{} values", data.len()),
            ));
        }
        Ok(Self {
            data,
            num_frames,
            dim,
        })
    }

    /// Собрать из списка кадров одинаковой ширины.
    pub fn from_frames(frames: Vec<Vec<f32>>) -> LasResult<Self> {
        let dim = frames.first().map(|f| f.len()).unwrap_or(0);
        if let Some(bad) = frames.iter().find(|f| f.len() != dim) {
            return Err(LasError::shape("FeatureSequence::from_frames", dim, bad.len()));
        }
        let num_frames = frames.len();
        let data = frames.into_iter().flatten().collect();
        Ok(Self {
            data,
            num_frames,
            dim,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Кадр с индексом `idx`.
    pub fn frame(&self, idx: usize) -> Option<&[f32]> {
        if idx >= self.num_frames {
            return None;
        }
        Some(&self.data[idx * self.dim..(idx + 1) * self.dim])
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1)).take(self.num_frames)
    }

    /// Дополнить нулевыми кадрами до длины, кратной `multiple`.
    ///
    /// Listener требует длину, кратную 2^N.
    pub fn pad_to_multiple(&self, multiple: usize) -> Self {
        if multiple <= 1 || self.num_frames % multiple == 0 {
            return self.clone();
        }
        let target = self.num_frames.div_ceil(multiple) * multiple;
        let mut data = self.data.clone();
        data.resize(target * self.dim, 0.0);
        Self {
            data,
            num_frames: target,
            dim: self.dim,
        }
    }

    /// Тензор формы [1, num_frames, dim].
    pub fn to_tensor(&self, device: &Device) -> LasResult<Tensor> {
        Ok(Tensor::from_slice(
            &self.data,
            (1, self.num_frames, self.dim),
            device,
        )?)
    }
}
