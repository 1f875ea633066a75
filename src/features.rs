use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Analysis hop length assumed when the payload doesn't carry one.
pub const DEFAULT_HOP_LENGTH: u32 = 512;
/// Sample rate assumed when the payload doesn't carry one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Tempo assumed when beat tracking produced nothing.
pub const DEFAULT_TEMPO: f64 = 120.0;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Invalid features: {0}")]
    InvalidFeatures(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Feature payload exactly as the analysis service emits it.
///
/// Everything is optional here; `FeatureSet::try_from` decides what is
/// required and rejects the rest with a reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFeatures {
    pub spectral_centroid: Option<Vec<f64>>,
    pub spectral_rolloff: Option<Vec<f64>>,
    pub spectral_bandwidth: Option<Vec<f64>>,
    pub zero_crossing_rate: Option<Vec<f64>>,
    pub mfcc: Option<Vec<Vec<f64>>>,
    pub chroma: Option<Vec<Vec<f64>>>,
    pub tempo: Option<f64>,
    pub beats: Option<Vec<f64>>,
    pub onsets: Option<Vec<f64>>,
    pub harmonic_strength: Option<f64>,
    pub percussive_strength: Option<f64>,
    pub key: Option<String>,
    pub duration: Option<f64>,
    pub sample_rate: Option<u32>,
    pub hop_length: Option<u32>,
}

/// Frame-level spectral descriptors, one value per analysis hop.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFeatures {
    pub centroid: Vec<f64>,
    pub rolloff: Vec<f64>,
    pub bandwidth: Vec<f64>,
    pub zero_crossing_rate: Vec<f64>,
    /// Coefficient-major: `mfcc[coefficient][frame]`.
    pub mfcc: Vec<Vec<f64>>,
}

/// Tempo plus beat/onset timestamps in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RhythmFeatures {
    pub tempo: f64,
    pub beats: Vec<f64>,
    pub onsets: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicFeatures {
    /// Pitch-class-major: `chroma[pitch_class][frame]`.
    pub chroma: Vec<Vec<f64>>,
    pub harmonic_strength: Option<f64>,
    pub percussive_strength: Option<f64>,
    pub key: Option<String>,
}

/// Validated, read-only features for one audio input.
///
/// Fields are private so the only way to get one is through validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    spectral: SpectralFeatures,
    rhythm: RhythmFeatures,
    harmonic: HarmonicFeatures,
    duration: f64,
    sample_rate: u32,
    hop_length: u32,
}

impl FeatureSet {
    pub fn from_json_str(s: &str) -> Result<Self, FeatureError> {
        let raw: RawFeatures = serde_json::from_str(s)?;
        Self::try_from(raw)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, FeatureError> {
        Self::from_json_file_with_hop(path, DEFAULT_HOP_LENGTH)
    }

    /// Like [`from_json_file`](Self::from_json_file), with `hop_length` used
    /// when the payload doesn't name one.
    pub fn from_json_file_with_hop(path: &Path, hop_length: u32) -> Result<Self, FeatureError> {
        let contents = std::fs::read_to_string(path)?;
        let mut raw: RawFeatures = serde_json::from_str(&contents)?;
        raw.hop_length = raw.hop_length.or(Some(hop_length));
        let set = Self::try_from(raw)?;
        log::debug!(
            "Loaded features from {} ({:.1}s, {} frames)",
            path.display(),
            set.duration,
            set.spectral.centroid.len()
        );
        Ok(set)
    }

    pub fn spectral(&self) -> &SpectralFeatures {
        &self.spectral
    }

    pub fn rhythm(&self) -> &RhythmFeatures {
        &self.rhythm
    }

    pub fn harmonic(&self) -> &HarmonicFeatures {
        &self.harmonic
    }

    pub fn tempo(&self) -> f64 {
        self.rhythm.tempo
    }

    pub fn beats(&self) -> &[f64] {
        &self.rhythm.beats
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn hop_length(&self) -> u32 {
        self.hop_length
    }

    /// Feature frames per second (analysis hop rate, not video fps).
    pub fn feature_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_length as f64
    }
}

impl TryFrom<RawFeatures> for FeatureSet {
    type Error = FeatureError;

    fn try_from(raw: RawFeatures) -> Result<Self, Self::Error> {
        let centroid = required_series("spectral_centroid", raw.spectral_centroid)?;
        let rolloff = required_series("spectral_rolloff", raw.spectral_rolloff)?;
        let zero_crossing_rate = required_series("zero_crossing_rate", raw.zero_crossing_rate)?;
        let bandwidth = optional_series("spectral_bandwidth", raw.spectral_bandwidth)?;
        let mfcc = matrix("mfcc", raw.mfcc)?;
        let chroma = matrix("chroma", raw.chroma)?;
        let beats = timestamps("beats", raw.beats)?;
        let onsets = timestamps("onsets", raw.onsets)?;

        let tempo = raw.tempo.unwrap_or(DEFAULT_TEMPO);
        if !tempo.is_finite() || tempo < 0.0 {
            return Err(invalid(format!("tempo must be finite and >= 0, got {tempo}")));
        }

        let duration = raw
            .duration
            .ok_or_else(|| invalid("duration is missing".to_string()))?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(invalid(format!("duration must be finite and > 0, got {duration}")));
        }

        let sample_rate = raw.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        if sample_rate == 0 {
            return Err(invalid("sample_rate must be > 0".to_string()));
        }
        let hop_length = raw.hop_length.unwrap_or(DEFAULT_HOP_LENGTH);
        if hop_length == 0 {
            return Err(invalid("hop_length must be > 0".to_string()));
        }

        let nyquist = sample_rate as f64 / 2.0;
        if let Some(i) = centroid.iter().position(|&c| !(0.0..=nyquist).contains(&c)) {
            return Err(invalid(format!(
                "spectral_centroid[{i}] = {} is outside 0..={nyquist} Hz",
                centroid[i]
            )));
        }

        for (name, value) in [
            ("harmonic_strength", raw.harmonic_strength),
            ("percussive_strength", raw.percussive_strength),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(invalid(format!("{name} is not finite")));
            }
        }

        Ok(Self {
            spectral: SpectralFeatures {
                centroid,
                rolloff,
                bandwidth,
                zero_crossing_rate,
                mfcc,
            },
            rhythm: RhythmFeatures {
                tempo,
                beats,
                onsets,
            },
            harmonic: HarmonicFeatures {
                chroma,
                harmonic_strength: raw.harmonic_strength,
                percussive_strength: raw.percussive_strength,
                key: raw.key,
            },
            duration,
            sample_rate,
            hop_length,
        })
    }
}

fn invalid(reason: String) -> FeatureError {
    FeatureError::InvalidFeatures(reason)
}

fn required_series(name: &str, values: Option<Vec<f64>>) -> Result<Vec<f64>, FeatureError> {
    match values {
        None => Err(invalid(format!("{name} is missing"))),
        Some(v) if v.is_empty() => Err(invalid(format!("{name} is empty"))),
        Some(v) => check_finite(name, v),
    }
}

fn optional_series(name: &str, values: Option<Vec<f64>>) -> Result<Vec<f64>, FeatureError> {
    check_finite(name, values.unwrap_or_default())
}

fn check_finite(name: &str, values: Vec<f64>) -> Result<Vec<f64>, FeatureError> {
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(invalid(format!("{name}[{i}] is not finite")));
    }
    Ok(values)
}

fn timestamps(name: &str, values: Option<Vec<f64>>) -> Result<Vec<f64>, FeatureError> {
    let values = optional_series(name, values)?;
    if let Some(i) = values.iter().position(|&t| t < 0.0) {
        return Err(invalid(format!("{name}[{i}] is negative")));
    }
    Ok(values)
}

fn matrix(name: &str, rows: Option<Vec<Vec<f64>>>) -> Result<Vec<Vec<f64>>, FeatureError> {
    let rows = rows.unwrap_or_default();
    if let Some(first) = rows.first() {
        let width = first.len();
        for (r, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(invalid(format!(
                    "{name} row {r} has {} columns, expected {width}",
                    row.len()
                )));
            }
            if let Some(c) = row.iter().position(|v| !v.is_finite()) {
                return Err(invalid(format!("{name}[{r}][{c}] is not finite")));
            }
        }
    }
    Ok(rows)
}

/// Population mean and standard deviation. `(0, 0)` for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}
