use super::decode::{self, Waveform};
use super::dsp::{self, Stft};
use super::ExtractionError;
use crate::config::ExtractorConfig;
use crate::db::models::{Feature, FeatureRecord, FeatureValues};
use crate::scanner::ClipRef;

/// Spectral centroid (Hz) is divided by this before it enters valence.
const VALENCE_CENTROID_NORM: f64 = 4000.0;

/// Tempo (BPM) is divided by this before it enters danceability.
const DANCE_TEMPO_NORM: f64 = 200.0;

/// Decode a clip and compute its feature record.
pub fn extract_clip(clip: &ClipRef, params: &ExtractorConfig) -> Result<FeatureRecord, ExtractionError> {
    let wave = decode::load_audio(&clip.path, params.max_duration_secs, params.target_sample_rate)?;
    log::debug!(
        "Decoded {}/{}: {:.1}s at {} Hz",
        clip.genre,
        clip.filename,
        wave.duration_secs(),
        wave.sample_rate
    );

    let features = compute_features(&wave, params)?;
    Ok(FeatureRecord {
        filename: clip.filename.clone(),
        genre: clip.genre.clone(),
        features,
    })
}

/// The five descriptors of a mono waveform.
pub fn compute_features(wave: &Waveform, params: &ExtractorConfig) -> Result<FeatureValues, ExtractionError> {
    let samples = &wave.samples;
    if samples.is_empty() {
        return Err(ExtractionError::Empty);
    }
    if samples.iter().all(|&s| s == 0.0) {
        return Err(ExtractionError::Silent);
    }

    let (frame, hop) = (params.frame_length, params.hop_length);
    let stft = Stft::compute(samples, frame, hop);

    // Tempo: autocorrelation of the onset envelope
    let onset = dsp::onset_strength(&stft);
    let tempo = dsp::estimate_tempo(&onset, wave.sample_rate, hop).ok_or(ExtractionError::NoTempo)?;

    // Energy: mean frame RMS
    let energy = mean(&dsp::rms_frames(samples, frame, hop));
    // Loudness is defined as the same RMS mean as energy
    let loudness = energy;

    // Valence: brightness averaged with harmonic amplitude
    let centroid = mean(&dsp::spectral_centroid(&stft, wave.sample_rate));
    let harmonic = dsp::harmonic_component(&stft, params.hpss_kernel).inverse(samples.len());
    let harmonic_mean = harmonic.iter().map(|x| x.abs() as f64).sum::<f64>() / harmonic.len() as f64;
    let valence = (centroid / VALENCE_CENTROID_NORM + harmonic_mean) / 2.0;

    // Danceability: tempo averaged with zero crossing rate
    let zcr = mean(&dsp::zero_crossing_rate(samples, frame, hop));
    let danceability = (tempo / DANCE_TEMPO_NORM + zcr) / 2.0;

    let values = FeatureValues {
        tempo,
        energy,
        loudness,
        valence,
        danceability,
    };
    for feature in Feature::ALL {
        if !values.get(feature).is_finite() {
            return Err(ExtractionError::NonFinite(feature.column()));
        }
    }
    Ok(values)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
