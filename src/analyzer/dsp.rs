//! Frame-based signal primitives: framing, STFT/ISTFT, spectral centroid,
//! harmonic/percussive separation and tempo estimation.
//!
//! All frame functions use centered frames: the signal is padded by
//! `frame_length / 2` on both sides, giving `1 + len / hop` frames.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Lowest and highest tempo the beat estimator will report.
const MIN_BPM: f64 = 30.0;
const MAX_BPM: f64 = 320.0;

/// Tempo prior: log-normal around 120 BPM, one octave wide.
const PRIOR_BPM: f64 = 120.0;
const PRIOR_OCTAVES: f64 = 1.0;

/// Log compression gain for the onset envelope.
const ONSET_LOG_GAIN: f32 = 100.0;

const TINY: f32 = 1e-10;

fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop
}

/// Signal padded by `frame / 2` zeros on each side.
fn pad_zero(samples: &[f32], frame: usize) -> Vec<f32> {
    let pad = frame / 2;
    let mut out = vec![0.0; samples.len() + 2 * pad];
    out[pad..pad + samples.len()].copy_from_slice(samples);
    out
}

/// Signal padded by repeating its first/last sample.
fn pad_edge(samples: &[f32], frame: usize) -> Vec<f32> {
    let pad = frame / 2;
    let first = samples.first().copied().unwrap_or(0.0);
    let last = samples.last().copied().unwrap_or(0.0);
    let mut out = Vec::with_capacity(samples.len() + 2 * pad);
    out.extend(std::iter::repeat_n(first, pad));
    out.extend_from_slice(samples);
    out.extend(std::iter::repeat_n(last, pad));
    out
}

/// Iterate centered frames of a padded signal.
fn frames<'a>(padded: &'a [f32], len: usize, frame: usize, hop: usize) -> impl Iterator<Item = &'a [f32]> + 'a {
    (0..frame_count(len, hop)).map(move |t| {
        let start = t * hop;
        let end = (start + frame).min(padded.len());
        &padded[start..end]
    })
}

/// Per-frame root-mean-square amplitude (no window applied).
pub fn rms_frames(samples: &[f32], frame: usize, hop: usize) -> Vec<f64> {
    let padded = pad_zero(samples, frame);
    frames(&padded, samples.len(), frame, hop)
        .map(|f| {
            let sum: f64 = f.iter().map(|&x| (x as f64) * (x as f64)).sum();
            (sum / frame as f64).sqrt()
        })
        .collect()
}

/// Per-frame fraction of adjacent samples whose sign bit differs.
pub fn zero_crossing_rate(samples: &[f32], frame: usize, hop: usize) -> Vec<f64> {
    let padded = pad_edge(samples, frame);
    frames(&padded, samples.len(), frame, hop)
        .map(|f| {
            let crossings = f
                .windows(2)
                .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
                .count();
            crossings as f64 / frame as f64
        })
        .collect()
}

/// Periodic Hann window.
pub fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        .collect()
}

/// Short-time Fourier transform, one-sided: `frames × (n_fft / 2 + 1)` bins.
pub struct Stft {
    pub n_fft: usize,
    pub hop: usize,
    pub frames: Vec<Vec<Complex<f32>>>,
}

impl Stft {
    pub fn compute(samples: &[f32], n_fft: usize, hop: usize) -> Self {
        let window = hann(n_fft);
        let padded = pad_zero(samples, n_fft);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);
        let bins = n_fft / 2 + 1;

        let mut buf = vec![Complex::new(0.0, 0.0); n_fft];
        let frames = frames(&padded, samples.len(), n_fft, hop)
            .map(|f| {
                for (i, slot) in buf.iter_mut().enumerate() {
                    let x = f.get(i).copied().unwrap_or(0.0);
                    *slot = Complex::new(x * window[i], 0.0);
                }
                fft.process(&mut buf);
                buf[..bins].to_vec()
            })
            .collect();

        Self { n_fft, hop, frames }
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn magnitudes(&self) -> Vec<Vec<f32>> {
        self.frames
            .iter()
            .map(|f| f.iter().map(|c| c.norm()).collect())
            .collect()
    }

    /// Inverse transform by weighted overlap-add, trimmed to `length` samples.
    pub fn inverse(&self, length: usize) -> Vec<f32> {
        let n = self.n_fft;
        let window = hann(n);
        let ifft = FftPlanner::<f32>::new().plan_fft_inverse(n);
        let pad = n / 2;
        let total = n + self.hop * self.frames.len().saturating_sub(1);

        let mut out = vec![0.0_f32; total];
        let mut norm = vec![0.0_f32; total];
        let mut buf = vec![Complex::new(0.0, 0.0); n];

        for (t, frame) in self.frames.iter().enumerate() {
            // Rebuild the full spectrum from the one-sided half
            for k in 0..n {
                buf[k] = if k < frame.len() {
                    frame[k]
                } else {
                    frame[n - k].conj()
                };
            }
            ifft.process(&mut buf);

            let start = t * self.hop;
            for i in 0..n {
                let w = window[i];
                out[start + i] += buf[i].re / n as f32 * w;
                norm[start + i] += w * w;
            }
        }

        for (o, &w) in out.iter_mut().zip(&norm) {
            if w > TINY {
                *o /= w;
            }
        }

        let mut trimmed: Vec<f32> = out.into_iter().skip(pad).take(length).collect();
        trimmed.resize(length, 0.0);
        trimmed
    }
}

/// Per-frame spectral centroid in Hz. Frames without energy give 0.
pub fn spectral_centroid(stft: &Stft, sample_rate: u32) -> Vec<f64> {
    let bin_hz = sample_rate as f64 / stft.n_fft as f64;
    stft.frames
        .iter()
        .map(|frame| {
            let mut total = 0.0_f64;
            let mut weighted = 0.0_f64;
            for (k, c) in frame.iter().enumerate() {
                let mag = c.norm() as f64;
                total += mag;
                weighted += mag * k as f64 * bin_hz;
            }
            if total > 0.0 { weighted / total } else { 0.0 }
        })
        .collect()
}

/// Map an out-of-range index back into `0..n` by mirroring at the edges.
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -i - 1
    } else if i >= n {
        2 * n - i - 1
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}

fn median_of(window: &mut [f32]) -> f32 {
    let mid = window.len() / 2;
    let (_, m, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Harmonic part of a spectrogram via median-filtering HPSS.
///
/// Harmonic energy is smooth in time, percussive energy is smooth in
/// frequency. Each bin keeps `H² / (H² + P²)` of its complex value, where H
/// and P are the time- and frequency-axis medians of the magnitude.
pub fn harmonic_component(stft: &Stft, kernel: usize) -> Stft {
    let mags = stft.magnitudes();
    let n_frames = mags.len();
    let bins = stft.bins();
    let half = (kernel / 2) as isize;
    let mut window = vec![0.0_f32; kernel.max(1)];

    // Time-axis median per bin
    let mut harm = vec![vec![0.0_f32; bins]; n_frames];
    for k in 0..bins {
        for t in 0..n_frames {
            for (j, slot) in window.iter_mut().enumerate() {
                let src = reflect(t as isize + j as isize - half, n_frames);
                *slot = mags[src][k];
            }
            harm[t][k] = median_of(&mut window);
        }
    }

    // Frequency-axis median per frame
    let mut perc = vec![vec![0.0_f32; bins]; n_frames];
    for t in 0..n_frames {
        for k in 0..bins {
            for (j, slot) in window.iter_mut().enumerate() {
                let src = reflect(k as isize + j as isize - half, bins);
                *slot = mags[t][src];
            }
            perc[t][k] = median_of(&mut window);
        }
    }

    let frames = stft
        .frames
        .iter()
        .enumerate()
        .map(|(t, frame)| {
            frame
                .iter()
                .enumerate()
                .map(|(k, &c)| {
                    let h = harm[t][k];
                    let p = perc[t][k];
                    let z = h.max(p);
                    if z < TINY {
                        return Complex::new(0.0, 0.0);
                    }
                    let (h, p) = ((h / z).powi(2), (p / z).powi(2));
                    c * (h / (h + p))
                })
                .collect()
        })
        .collect();

    Stft {
        n_fft: stft.n_fft,
        hop: stft.hop,
        frames,
    }
}

/// Onset strength: mean positive change of log-compressed magnitude per
/// frame, smoothed with a short triangular kernel.
pub fn onset_strength(stft: &Stft) -> Vec<f64> {
    let log_mags: Vec<Vec<f32>> = stft
        .frames
        .iter()
        .map(|f| f.iter().map(|c| (1.0 + ONSET_LOG_GAIN * c.norm()).ln()).collect())
        .collect();

    let bins = stft.bins() as f64;
    let mut flux = vec![0.0_f64; log_mags.len()];
    for t in 1..log_mags.len() {
        let rise: f64 = log_mags[t]
            .iter()
            .zip(&log_mags[t - 1])
            .map(|(&cur, &prev)| (cur - prev).max(0.0) as f64)
            .sum();
        flux[t] = rise / bins;
    }

    (0..flux.len())
        .map(|t| {
            let prev = if t > 0 { flux[t - 1] } else { 0.0 };
            let next = flux.get(t + 1).copied().unwrap_or(0.0);
            0.25 * prev + 0.5 * flux[t] + 0.25 * next
        })
        .collect()
}

fn tempo_prior(bpm: f64) -> f64 {
    let octaves = (bpm / PRIOR_BPM).log2() / PRIOR_OCTAVES;
    (-0.5 * octaves * octaves).exp()
}

/// Estimate tempo (BPM) from an onset envelope sampled every `hop` samples.
///
/// Picks the autocorrelation lag with the best prior-weighted score and
/// refines it with parabolic interpolation. Returns `None` when the envelope
/// has no periodic structure to lock onto.
pub fn estimate_tempo(onset: &[f64], sample_rate: u32, hop: usize) -> Option<f64> {
    let frame_rate = sample_rate as f64 / hop as f64;
    let n = onset.len();
    if n < 4 {
        return None;
    }

    let mean = onset.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = onset.iter().map(|v| v - mean).collect();
    if centered.iter().all(|v| v.abs() < 1e-12) {
        return None;
    }

    let min_lag = ((60.0 * frame_rate / MAX_BPM).ceil() as usize).max(2);
    let max_lag = ((60.0 * frame_rate / MIN_BPM).floor() as usize).min(n - 2);
    if min_lag >= max_lag {
        return None;
    }

    let acf = |lag: usize| -> f64 {
        centered[..n - lag]
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum()
    };
    let score = |lag: usize| -> f64 {
        let bpm = 60.0 * frame_rate / lag as f64;
        acf(lag) * tempo_prior(bpm)
    };

    let scores: Vec<(usize, f64)> = (min_lag - 1..=max_lag + 1).map(|l| (l, score(l))).collect();
    // Interior candidates only, so both parabola neighbours exist
    let (best_idx, best) = scores[1..scores.len() - 1]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
        .map(|(i, s)| (i + 1, *s))?;
    if best.1 <= 0.0 {
        return None;
    }

    let (l, c, r) = (scores[best_idx - 1].1, best.1, scores[best_idx + 1].1);
    let denom = l - 2.0 * c + r;
    let delta = if denom < 0.0 {
        (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    let lag = best.0 as f64 + delta;
    Some(60.0 * frame_rate / lag)
}
