use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC decode error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("Invalid stream: {0}")]
    InvalidStream(String),
}

/// Mono waveform ready for analysis.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// Load at most `max_secs` of an audio file as mono at `target_rate`.
pub fn load_audio(path: &Path, max_secs: f64, target_rate: u32) -> Result<Waveform, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let (interleaved, channels, rate) = match ext.as_str() {
        "wav" => read_wav(path, max_secs)?,
        "flac" => read_flac(path, max_secs)?,
        other => return Err(DecodeError::UnsupportedFormat(other.to_string())),
    };

    let mono = downmix(&interleaved, channels);
    Ok(Waveform {
        samples: resample_linear(&mono, rate, target_rate),
        sample_rate: target_rate,
    })
}

/// Interleaved sample count for `max_secs` of audio, saturating at `usize::MAX`.
fn frame_limit(max_secs: f64, rate: u32, channels: usize) -> usize {
    ((max_secs * rate as f64).floor() as usize).saturating_mul(channels)
}

fn read_wav(path: &Path, max_secs: f64) -> Result<(Vec<f32>, usize, u32), DecodeError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    check_stream(spec.sample_rate, spec.channels as usize)?;
    let limit = frame_limit(max_secs, spec.sample_rate, spec.channels as usize);

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(limit)
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample as u32);
            reader
                .samples::<i32>()
                .take(limit)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok((samples, spec.channels as usize, spec.sample_rate))
}

fn read_flac(path: &Path, max_secs: f64) -> Result<(Vec<f32>, usize, u32), DecodeError> {
    let mut reader = claxon::FlacReader::open(path)?;
    let info = reader.streaminfo();
    check_stream(info.sample_rate, info.channels as usize)?;
    let limit = frame_limit(max_secs, info.sample_rate, info.channels as usize);
    let scale = int_scale(info.bits_per_sample);

    let samples = reader
        .samples()
        .take(limit)
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((samples, info.channels as usize, info.sample_rate))
}

fn check_stream(rate: u32, channels: usize) -> Result<(), DecodeError> {
    if rate == 0 {
        return Err(DecodeError::InvalidStream("sample rate is 0".into()));
    }
    if channels == 0 {
        return Err(DecodeError::InvalidStream("no channels".into()));
    }
    Ok(())
}

/// Full-scale value for signed integer samples of the given bit depth.
fn int_scale(bits: u32) -> f32 {
    (1u64 << bits.clamp(1, 32).saturating_sub(1)) as f32
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampling.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}
