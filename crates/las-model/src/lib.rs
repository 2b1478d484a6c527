//! Listen, Attend and Spell: чистая Rust-реализация на Candle.
//!
//! - [`Listener`]: пирамидальный двунаправленный RNN-энкодер (сжатие времени 2^N)
//! - [`Attention`]: dot-product attention, опционально с MLP-проекциями и несколькими головами
//! - [`Speller`]: авторегрессивный декодер с teacher forcing и тремя политиками выбора токена
//! - [`Las`]: композиция Listener → Speller
//!
//! Только прямой проход: обучение, функции потерь и beam search не реализуются.

pub mod attention;
pub mod listener;
pub mod model;
pub mod onehot;
pub mod rnn;
pub mod speller;

pub use attention::{Attention, AttentionOutput};
pub use listener::{Listener, PyramidalEncoderLayer};
pub use model::Las;
pub use onehot::{one_hot, one_hot_batch, one_hot_sequence};
pub use rnn::{BiRnn, RecurrentCell, RnnState};
pub use speller::{Speller, SpellerOutput, StepOutput};
