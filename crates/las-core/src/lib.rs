//! # las-core
//!
//! Базовые типы, конфигурация и ошибки для LAS (Listen, Attend and Spell).
//!
//! Этот крейт предоставляет общие абстракции для остальных крейтов workspace:
//!
//! - Общие типы данных (`AudioBuffer`, `FeatureSequence`)
//! - Конфигурация модели ([`LasConfig`]) и признаков ([`MfccConfig`])
//! - Унифицированная обработка ошибок через [`LasError`]

pub mod config;
pub mod debug;
pub mod error;
pub mod types;

pub use config::{
    AttentionActivation, AttentionConfig, AttentionMode, DecodeMode, LasConfig, MfccConfig,
    RnnUnit,
};
pub use error::{LasError, LasResult};
pub use types::{AudioBuffer, FeatureSequence};
