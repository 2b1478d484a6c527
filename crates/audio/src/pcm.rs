//! 16-bit PCM <-> float conversion.
//!
//! Floats are scaled by 2^15: `-1.0` maps to `i16::MIN`, values at or above
//! `1.0` clip to `i16::MAX`. No dithering is applied.

use las_core::{LasError, LasResult};

const PCM_16_SCALE: f32 = 32768.0;

/// Convert PCM samples to floats in [-1.0, 1.0).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM_16_SCALE).collect()
}

/// Convert floats to PCM, clipping anything outside [-1.0, 1.0).
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            (s * PCM_16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Decode little-endian 16-bit PCM bytes into floats.
pub fn bytes_to_float(bytes: &[u8]) -> LasResult<Vec<f32>> {
    Ok(pcm_to_float(&bytes_to_pcm(bytes)?))
}

/// Encode floats as little-endian 16-bit PCM bytes.
pub fn float_to_bytes(samples: &[f32]) -> Vec<u8> {
    float_to_pcm(samples)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect()
}

pub(crate) fn bytes_to_pcm(bytes: &[u8]) -> LasResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(LasError::Audio(format!(
            "PCM stream has odd length {} (expected 16-bit samples)",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_one_step() {
        let signal: Vec<f32> = (0..2000).map(|i| -1.0 + i as f32 / 1000.0).collect();
        let back = pcm_to_float(&float_to_pcm(&signal));
        for (orig, rec) in signal.iter().zip(back.iter()) {
            assert!((orig - rec).abs() <= 1.0 / 32768.0, "{orig} -> {rec}");
        }
    }

    #[test]
    fn test_out_of_range_clips() {
        let pcm = float_to_pcm(&[1.0, 1.5, -1.0, -3.0, 0.0]);
        assert_eq!(pcm, vec![i16::MAX, i16::MAX, i16::MIN, i16::MIN, 0]);
    }

    #[test]
    fn test_bytes_round_trip() {
        let signal = [0.25f32, -0.5, 0.0];
        let bytes = float_to_bytes(&signal);
        assert_eq!(bytes.len(), 6);
        assert_eq!(bytes_to_float(&bytes).unwrap(), signal.to_vec());
    }

    #[test]
    fn test_odd_byte_count_is_error() {
        assert!(matches!(bytes_to_float(&[0, 1, 2]), Err(LasError::Audio(_))));
    }
}
