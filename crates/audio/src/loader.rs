//! WAV and raw PCM file loading.

use std::path::Path;

use hound::WavReader;
use las_core::{AudioBuffer, LasError, LasResult};
use tracing::debug;

use crate::pcm::{bytes_to_pcm, pcm_to_float};

/// Read a WAV file into an AudioBuffer.
///
/// Only 16-bit integer PCM (the format KsponSpeech is converted to) and
/// 32-bit float WAVs are accepted. Integer samples are scaled by 1/32768,
/// same as raw PCM input, and the buffer is marked as int16-sourced.
pub fn load_wav(path: impl AsRef<Path>) -> LasResult<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .map_err(|e| LasError::Audio(format!("cannot open WAV {:?}: {}", path, e)))?;

    let spec = reader.spec();
    let read_err = |e: hound::Error| LasError::Audio(format!("cannot read {:?}: {}", path, e));

    let (samples, from_pcm16) = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let pcm = reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_err)?;
            (pcm_to_float(&pcm), true)
        }
        (hound::SampleFormat::Float, 32) => {
            let samples = reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_err)?;
            (samples, false)
        }
        (format, bits) => {
            return Err(LasError::Audio(format!(
                "unsupported WAV sample format {:?} with {} bits in {:?}",
                format, bits, path
            )));
        }
    };

    debug!(
        "WAV {:?}: {} Hz, {} ch, {} samples",
        path,
        spec.sample_rate,
        spec.channels,
        samples.len()
    );

    let rate = spec.sample_rate as usize;
    let channels = spec.channels as usize;
    Ok(if from_pcm16 {
        AudioBuffer::from_pcm16(samples, rate, channels)
    } else {
        AudioBuffer::new(samples, rate, channels)
    })
}

/// Load a headerless mono signed 16-bit little-endian PCM file.
///
/// Raw streams carry no header, so the caller states the sample rate.
pub fn load_pcm(path: impl AsRef<Path>, sample_rate: usize) -> LasResult<AudioBuffer> {
    let bytes = std::fs::read(path.as_ref())?;
    let samples = pcm_to_float(&bytes_to_pcm(&bytes)?);
    Ok(AudioBuffer::from_pcm16(samples, sample_rate, 1))
}

/// Load `.wav` or `.pcm` input for feature extraction.
///
/// WAV files must match `sample_rate` and be mono; raw PCM is assumed to
/// already be at `sample_rate`.
pub fn load_audio(path: impl AsRef<Path>, sample_rate: usize) -> LasResult<AudioBuffer> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let buffer = match ext.as_deref() {
        Some("wav") => {
            let buffer = load_wav(path)?;
            if buffer.sample_rate != sample_rate {
                return Err(LasError::Audio(format!(
                    "sample rate of {} is not allowed, only {}",
                    buffer.sample_rate, sample_rate
                )));
            }
            buffer
        }
        Some("pcm") => load_pcm(path, sample_rate)?,
        _ => {
            return Err(LasError::Audio(format!(
                "Unsupported audio file {:?} (expected .wav or .pcm)",
                path
            )));
        }
    };

    if buffer.channels != 1 {
        return Err(LasError::Audio(format!(
            "only mono audio is supported, got {} channels",
            buffer.channels
        )));
    }

    Ok(buffer)
}
