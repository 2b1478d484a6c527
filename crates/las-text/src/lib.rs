//! # las-text
//!
//! Текстовая сторона LAS для корейского языка:
//!
//! - Разложение слогов хангыля на чамо (начальная, средняя, конечная)
//! - Фиксированный словарь меток ([`Vocabulary`])
//! - Нормализация транскриптов KsponSpeech (CP949) в последовательность чамо

pub mod jamo;
pub mod normalize;
pub mod vocab;

pub use jamo::{FINALS, INITIALS, MEDIALS, NO_FINAL, SPACE_TOKEN, is_syllable, split_syllable};
pub use normalize::{normalize_transcript, read_transcript};
pub use vocab::Vocabulary;
