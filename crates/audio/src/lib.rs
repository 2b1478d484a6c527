//! # audio
//!
//! Audio processing module for LAS.
//!
//! This crate handles:
//! - WAV and raw 16-bit PCM loading with sample rate validation
//! - PCM <-> float conversion
//! - MFCC extraction with first and second order deltas

pub mod loader;
pub mod mfcc;
pub mod pcm;

pub use loader::{load_audio, load_pcm, load_wav};
pub use mfcc::MfccExtractor;
pub use pcm::{bytes_to_float, float_to_bytes, float_to_pcm, pcm_to_float};
