//! Полная модель LAS: Listener → Speller.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use las_core::{FeatureSequence, LasConfig, LasError, LasResult};
use las_text::Vocabulary;
use rand::Rng;
use tracing::{debug, info};

use crate::listener::Listener;
use crate::speller::{Speller, SpellerOutput};

/// Listen, Attend and Spell.
pub struct Las {
    config: LasConfig,
    listener: Listener,
    speller: Speller,
    device: Device,
    dtype: DType,
}

impl Las {
    /// Собрать модель из VarBuilder с префиксами `listener.*` и `speller.*`.
    pub fn new(config: LasConfig, vb: VarBuilder) -> LasResult<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let dtype = vb.dtype();

        let listener = Listener::load(&config, vb.pp("listener"))?;
        let speller = Speller::load(&config, vb.pp("speller"))?;

        debug!(
            "LAS собран: вход {}, сжатие времени x{}, словарь {}, decode_mode {:?}",
            config.input_feature_dim,
            listener.time_reduction(),
            config.output_class_dim,
            config.decode_mode
        );

        Ok(Self {
            config,
            listener,
            speller,
            device,
            dtype,
        })
    }

    /// Загрузка весов из одного или нескольких safetensors файлов (ключи PyTorch).
    pub fn from_safetensors<P: AsRef<Path>>(
        config: LasConfig,
        paths: &[P],
        device: &Device,
    ) -> LasResult<Self> {
        // F32 на CPU (BF16 matmul на CPU не поддерживается), BF16 на GPU.
        let dtype = if device.is_metal() || device.is_cuda() {
            DType::BF16
        } else {
            DType::F32
        };
        info!("Загрузка весов LAS: {} файл(ов), {:?}", paths.len(), dtype);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
        Self::new(config, vb)
    }

    /// Модель со случайными весами (инициализация как в PyTorch).
    ///
    /// Возвращает и `VarMap`, чтобы веса можно было сохранить через `VarMap::save`.
    pub fn with_random_weights(config: LasConfig, device: &Device) -> LasResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    /// Устройство по флагу `use_gpu`: CUDA, если доступна, иначе CPU.
    pub fn device_for(config: &LasConfig) -> LasResult<Device> {
        if config.use_gpu {
            Ok(Device::cuda_if_available(0)?)
        } else {
            Ok(Device::Cpu)
        }
    }

    pub fn config(&self) -> &LasConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn speller(&self) -> &Speller {
        &self.speller
    }

    /// Прямой проход.
    ///
    /// # Arguments
    /// * `features` - признаки [B, T, F], T кратно 2^listener_layers
    /// * `ground_truth` - one-hot [B, S, V] для teacher forcing
    /// * `teacher_force_rate` - вероятность teacher forcing на весь вызов
    /// * `rng` - источник случайности (teacher forcing и режим Sample)
    pub fn forward<R: Rng + ?Sized>(
        &self,
        features: &Tensor,
        ground_truth: Option<&Tensor>,
        teacher_force_rate: f64,
        rng: &mut R,
    ) -> LasResult<SpellerOutput> {
        let features = if features.dtype() != self.dtype {
            features.to_dtype(self.dtype)?
        } else {
            features.clone()
        };

        let listener_feature = self.listener.forward(&features)?;
        self.speller
            .forward(&listener_feature, ground_truth, teacher_force_rate, rng)
    }

    /// Распознать одну запись: argmax на каждом шаге → метки словаря.
    ///
    /// Признаки дополняются нулевыми кадрами до длины, кратной 2^listener_layers.
    pub fn transcribe<R: Rng + ?Sized>(
        &self,
        features: &FeatureSequence,
        vocab: &Vocabulary,
        rng: &mut R,
    ) -> LasResult<String> {
        if vocab.len() != self.config.output_class_dim {
            return Err(LasError::Config(format!(
                "vocabulary has {} labels, model outputs {} classes",
                vocab.len(),
                self.config.output_class_dim
            )));
        }
        if features.num_frames() == 0 {
            return Err(LasError::shape("Las::transcribe", "at least 1 frame", 0));
        }

        let padded = features.pad_to_multiple(self.listener.time_reduction());
        let input = padded.to_tensor(&self.device)?;
        let output = self.forward(&input, None, 0.0, rng)?;

        let ids = output.argmax_ids()?;
        let text = ids
            .first()
            .map(|ids| vocab.decode(ids))
            .unwrap_or_default();

        debug!(
            "transcribe: {} кадров → {} шагов → {:?}",
            features.num_frames(),
            output.num_steps(),
            text
        );
        Ok(text)
    }
}
