//! MFCC extraction with Δ and ΔΔ.
//!
//! Pipeline per utterance:
//! 1. Pre-emphasis `y[n] = x[n] - α·x[n-1]`
//! 2. Framing (25 ms / 10 ms, rectangular window, zero padded tail)
//! 3. Power spectrum `|FFT|² / n_fft`
//! 4. Triangular mel filterbank (HTK mel scale, bin-rounded edges)
//! 5. `ln` → DCT-II (orthonormal) → sinusoidal lifter
//! 6. c0 replaced by log frame energy
//! 7. Δ and ΔΔ by linear regression over ±`delta_n` frames (edge padded)

use std::f64::consts::PI;

use las_core::{AudioBuffer, FeatureSequence, LasError, LasResult, MfccConfig};
use rustfft::{FftPlanner, num_complex::Complex};
use tracing::debug;

/// Amplitude scale of 16-bit PCM. Buffers decoded from int16 are scaled back
/// to integer range before extraction; float WAV samples are used as is.
const PCM_16_SCALE: f32 = 32768.0;

/// MFCC + Δ + ΔΔ extractor.
#[derive(Debug)]
pub struct MfccExtractor {
    config: MfccConfig,
    filterbank: Vec<Vec<f64>>,
    dct: Vec<Vec<f64>>,
    lifter: Vec<f64>,
}

impl MfccExtractor {
    /// Create an extractor; filterbank, DCT matrix and lifter are precomputed.
    pub fn new(config: MfccConfig) -> LasResult<Self> {
        config.validate()?;
        let filterbank = create_filterbank(
            config.n_filt,
            config.n_fft,
            config.sample_rate as f64,
            config.low_freq as f64,
            config.high_freq() as f64,
        )?;
        let dct = dct_ortho_matrix(config.num_cep, config.n_filt);
        let lifter = lifter_coefficients(config.num_cep, config.ceplifter);

        Ok(Self {
            config,
            filterbank,
            dct,
            lifter,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Width of each output frame.
    pub fn feature_dim(&self) -> usize {
        self.config.feature_dim()
    }

    /// Number of frames produced for a signal of `num_samples` samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        let frame_len = self.config.frame_len();
        let frame_step = self.config.frame_step();
        if num_samples <= frame_len {
            1
        } else {
            1 + (num_samples - frame_len).div_ceil(frame_step)
        }
    }

    /// Extract features from a mono buffer.
    pub fn extract_buffer(&self, buffer: &AudioBuffer) -> LasResult<FeatureSequence> {
        if buffer.channels != 1 {
            return Err(LasError::Audio(format!(
                "MFCC requires mono audio, got {} channels",
                buffer.channels
            )));
        }
        if buffer.sample_rate != self.config.sample_rate as usize {
            return Err(LasError::Audio(format!(
                "sample rate of {} is not allowed, only {}",
                buffer.sample_rate, self.config.sample_rate
            )));
        }
        if buffer.from_pcm16 {
            let scaled: Vec<f32> = buffer.samples.iter().map(|&s| s * PCM_16_SCALE).collect();
            self.extract(&scaled)
        } else {
            self.extract(&buffer.samples)
        }
    }

    /// Extract `[frames, 3 * num_cep]` features from raw amplitudes.
    pub fn extract(&self, samples: &[f32]) -> LasResult<FeatureSequence> {
        let mfcc = self.mfcc(samples)?;
        let d_mfcc = delta(&mfcc, self.config.delta_n);
        let a_mfcc = delta(&d_mfcc, self.config.delta_n);

        let frames: Vec<Vec<f32>> = mfcc
            .iter()
            .zip(d_mfcc.iter())
            .zip(a_mfcc.iter())
            .map(|((c, d), a)| {
                c.iter()
                    .chain(d.iter())
                    .chain(a.iter())
                    .map(|&v| v as f32)
                    .collect()
            })
            .collect();

        debug!(
            "MFCC: {} samples -> {} frames x {}",
            samples.len(),
            frames.len(),
            self.feature_dim()
        );

        FeatureSequence::from_frames(frames)
    }

    /// Static cepstra `[frames][num_cep]`.
    pub fn mfcc(&self, samples: &[f32]) -> LasResult<Vec<Vec<f64>>> {
        if samples.is_empty() {
            return Err(LasError::Audio("cannot extract MFCC from an empty signal".into()));
        }

        let emphasized = preemphasis(samples, self.config.preemph as f64);
        let power = self.power_spectrum(&emphasized);

        let cepstra = power
            .iter()
            .map(|frame| {
                let energy = floor_eps(frame.iter().sum::<f64>());

                let log_mel: Vec<f64> = self
                    .filterbank
                    .iter()
                    .map(|filter| {
                        let e: f64 = frame.iter().zip(filter.iter()).map(|(p, f)| p * f).sum();
                        floor_eps(e).ln()
                    })
                    .collect();

                let mut cep: Vec<f64> = self
                    .dct
                    .iter()
                    .zip(self.lifter.iter())
                    .map(|(basis, lift)| {
                        lift * basis.iter().zip(log_mel.iter()).map(|(b, m)| b * m).sum::<f64>()
                    })
                    .collect();

                if self.config.append_energy {
                    cep[0] = energy.ln();
                }
                cep
            })
            .collect();

        Ok(cepstra)
    }

    /// Frame the signal and compute `|FFT|² / n_fft` for each frame.
    fn power_spectrum(&self, signal: &[f64]) -> Vec<Vec<f64>> {
        let n_fft = self.config.n_fft;
        let frame_len = self.config.frame_len();
        let frame_step = self.config.frame_step();
        let num_frames = self.num_frames(signal.len());

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let mut buffer = vec![Complex::new(0.0f64, 0.0); n_fft];

        // Кадр длиннее n_fft обрезается, короче дополняется нулями.
        let used = frame_len.min(n_fft);

        (0..num_frames)
            .map(|frame_idx| {
                let start = frame_idx * frame_step;
                for (i, slot) in buffer.iter_mut().enumerate() {
                    let sample = if i < used {
                        signal.get(start + i).copied().unwrap_or(0.0)
                    } else {
                        0.0
                    };
                    *slot = Complex::new(sample, 0.0);
                }
                fft.process(&mut buffer);
                buffer
                    .iter()
                    .take(n_fft / 2 + 1)
                    .map(|c| c.norm_sqr() / n_fft as f64)
                    .collect()
            })
            .collect()
    }
}

/// Regression deltas over ±`n` frames with edge padding.
pub fn delta(features: &[Vec<f64>], n: usize) -> Vec<Vec<f64>> {
    if features.is_empty() || n == 0 {
        return features.iter().map(|f| vec![0.0; f.len()]).collect();
    }
    let last = features.len() - 1;
    let denominator = 2.0 * (1..=n).map(|i| (i * i) as f64).sum::<f64>();
    let dim = features[0].len();

    (0..features.len())
        .map(|t| {
            let mut out = vec![0.0; dim];
            for k in 1..=n {
                let next = &features[(t + k).min(last)];
                let prev = &features[t.saturating_sub(k)];
                for d in 0..dim {
                    out[d] += k as f64 * (next[d] - prev[d]);
                }
            }
            out.iter_mut().for_each(|v| *v /= denominator);
            out
        })
        .collect()
}

fn preemphasis(samples: &[f32], coeff: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(samples.len());
    out.push(samples[0] as f64);
    for w in samples.windows(2) {
        out.push(w[1] as f64 - coeff * w[0] as f64);
    }
    out
}

fn floor_eps(v: f64) -> f64 {
    if v == 0.0 {
        f64::EPSILON
    } else {
        v
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// FFT bin of each of the `n_filt + 2` filter edges, evenly spaced in mel.
///
/// Edges must be strictly increasing: two edges in one bin leave a filter
/// with an empty slope.
fn filterbank_bins(
    n_filt: usize,
    n_fft: usize,
    sample_rate: f64,
    low_freq: f64,
    high_freq: f64,
) -> LasResult<Vec<usize>> {
    let low_mel = hz_to_mel(low_freq);
    let high_mel = hz_to_mel(high_freq);

    let bins: Vec<usize> = (0..n_filt + 2)
        .map(|i| {
            let mel = low_mel + i as f64 * (high_mel - low_mel) / (n_filt + 1) as f64;
            ((n_fft + 1) as f64 * mel_to_hz(mel) / sample_rate).floor() as usize
        })
        .collect();

    if let Some(i) = bins.windows(2).position(|w| w[1] <= w[0]) {
        return Err(LasError::Config(format!(
            "mel filterbank collapses: edges {} and {} both fall into FFT bin {} \
             (n_filt={} is too large for n_fft={})",
            i,
            i + 1,
            bins[i],
            n_filt,
            n_fft
        )));
    }
    Ok(bins)
}

/// Triangular filterbank `[n_filt][n_fft/2 + 1]` with edges rounded to FFT bins.
fn create_filterbank(
    n_filt: usize,
    n_fft: usize,
    sample_rate: f64,
    low_freq: f64,
    high_freq: f64,
) -> LasResult<Vec<Vec<f64>>> {
    let bins = filterbank_bins(n_filt, n_fft, sample_rate, low_freq, high_freq)?;

    let n_freqs = n_fft / 2 + 1;
    let mut filterbank = vec![vec![0.0f64; n_freqs]; n_filt];

    for (j, filter) in filterbank.iter_mut().enumerate() {
        let (left, center, right) = (bins[j], bins[j + 1], bins[j + 2]);
        for i in left..center.min(n_freqs) {
            filter[i] = (i - left) as f64 / (center - left) as f64;
        }
        for i in center..right.min(n_freqs) {
            filter[i] = (right - i) as f64 / (right - center) as f64;
        }
    }

    Ok(filterbank)
}

/// Rows of the orthonormal DCT-II, truncated to `num_cep`.
fn dct_ortho_matrix(num_cep: usize, n: usize) -> Vec<Vec<f64>> {
    (0..num_cep)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / n as f64).sqrt()
            } else {
                (2.0 / n as f64).sqrt()
            };
            (0..n)
                .map(|i| scale * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .collect()
        })
        .collect()
}

fn lifter_coefficients(num_cep: usize, l: usize) -> Vec<f64> {
    if l == 0 {
        return vec![1.0; num_cep];
    }
    let l = l as f64;
    (0..num_cep)
        .map(|i| 1.0 + (l / 2.0) * (PI * i as f64 / l).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> MfccExtractor {
        MfccExtractor::new(MfccConfig::default()).unwrap()
    }

    #[test]
    fn test_num_frames() {
        let ex = extractor();
        assert_eq!(ex.num_frames(100), 1);
        assert_eq!(ex.num_frames(400), 1);
        assert_eq!(ex.num_frames(401), 2);
        assert_eq!(ex.num_frames(16_000), 99);
    }

    #[test]
    fn test_filterbank_shape() {
        let fb = create_filterbank(26, 512, 16000.0, 0.0, 8000.0).unwrap();
        assert_eq!(fb.len(), 26);
        assert_eq!(fb[0].len(), 257);
        for filter in &fb {
            assert!(filter.iter().all(|&v| (0.0..=1.0).contains(&v)));
            assert!(filter.iter().sum::<f64>() > 0.0);
        }
    }

    #[test]
    fn test_collapsing_filterbank_is_config_error() {
        let config = MfccConfig {
            n_filt: 200,
            ..MfccConfig::default()
        };
        let err = MfccExtractor::new(config).unwrap_err();
        assert!(matches!(err, LasError::Config(_)), "{err:?}");

        let bins = filterbank_bins(26, 512, 16000.0, 0.0, 8000.0).unwrap();
        assert!(bins.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_mel_roundtrip() {
        for hz in [0.0, 300.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dct_is_orthonormal() {
        let dct = dct_ortho_matrix(26, 26);
        for a in 0..26 {
            for b in 0..26 {
                let dot: f64 = dct[a].iter().zip(dct[b].iter()).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_lifter() {
        let lift = lifter_coefficients(13, 22);
        assert_eq!(lift[0], 1.0);
        assert!((lift[11] - 12.0).abs() < 1e-9);
        assert_eq!(lifter_coefficients(3, 0), vec![1.0; 3]);
    }

    #[test]
    fn test_delta_of_constant_is_zero() {
        let feats = vec![vec![3.0, -1.0]; 6];
        for row in delta(&feats, 2) {
            assert!(row.iter().all(|v| v.abs() < 1e-12));
        }
    }

    #[test]
    fn test_delta_of_ramp_is_slope_inside() {
        let feats: Vec<Vec<f64>> = (0..10).map(|t| vec![2.0 * t as f64]).collect();
        let d = delta(&feats, 2);
        for row in &d[2..8] {
            assert!((row[0] - 2.0).abs() < 1e-12);
        }
        // На краях окно упирается в повторённый крайний кадр.
        assert!(d[0][0] < 2.0);
    }

    #[test]
    fn test_preemphasis() {
        let out = preemphasis(&[1.0, 1.0, 2.0], 0.97);
        assert_eq!(out[0], 1.0);
        assert!((out[1] - 0.03).abs() < 1e-6);
        assert!((out[2] - 1.03).abs() < 1e-6);
    }

    #[test]
    fn test_silence_gives_finite_features() {
        let ex = extractor();
        let feats = ex.extract(&vec![0.0; 1600]).unwrap();
        assert_eq!(feats.dim(), 39);
        assert!(feats.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_empty_signal_is_error() {
        let ex = extractor();
        assert!(matches!(ex.extract(&[]), Err(LasError::Audio(_))));
    }
}
