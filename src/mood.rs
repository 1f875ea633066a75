use crate::features::{FeatureSet, mean_std};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MoodError {
    #[error("Invalid features: {0}")]
    InvalidFeatures(String),
    #[error("Degenerate input: mood scores sum to zero")]
    DegenerateInput,
    #[error("Unknown mood label: {0}")]
    InvalidMood(String),
}

/// The fixed mood vocabulary, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Energetic,
    Calm,
    Happy,
    Sad,
    Aggressive,
    Relaxed,
    Excited,
    Melancholic,
}

impl Mood {
    pub const ALL: [Mood; 8] = [
        Mood::Energetic,
        Mood::Calm,
        Mood::Happy,
        Mood::Sad,
        Mood::Aggressive,
        Mood::Relaxed,
        Mood::Excited,
        Mood::Melancholic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Energetic => "energetic",
            Self::Calm => "calm",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Aggressive => "aggressive",
            Self::Relaxed => "relaxed",
            Self::Excited => "excited",
            Self::Melancholic => "melancholic",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = MoodError;

    /// Exact match only: labels come from our own output, not free text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MoodError::InvalidMood(s.to_string()))
    }
}

/// The four normalized scalars every mood formula is built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoodIndicators {
    pub brightness: f64,
    pub energy: f64,
    pub rhythmic_complexity: f64,
    pub tempo_factor: f64,
}

impl MoodIndicators {
    /// Derive indicators from raw frame series.
    ///
    /// brightness = mean centroid / 4 kHz, energy = mean rolloff / 8 kHz,
    /// rhythmic complexity = std of ZCR, tempo factor = tempo / 120 capped at 2.
    pub fn from_series(
        spectral_centroid: &[f64],
        spectral_rolloff: &[f64],
        zero_crossing_rate: &[f64],
        tempo: f64,
    ) -> Result<Self, MoodError> {
        for (name, series) in [
            ("spectral_centroid", spectral_centroid),
            ("spectral_rolloff", spectral_rolloff),
            ("zero_crossing_rate", zero_crossing_rate),
        ] {
            if series.is_empty() {
                return Err(MoodError::InvalidFeatures(format!("{name} is empty")));
            }
        }

        let (centroid_mean, _) = mean_std(spectral_centroid);
        let (rolloff_mean, _) = mean_std(spectral_rolloff);
        let (_, zcr_std) = mean_std(zero_crossing_rate);

        Ok(Self {
            brightness: centroid_mean / 4000.0,
            energy: rolloff_mean / 8000.0,
            rhythmic_complexity: zcr_std,
            tempo_factor: (tempo / 120.0).min(2.0),
        })
    }

    pub fn from_features(features: &FeatureSet) -> Result<Self, MoodError> {
        let spectral = features.spectral();
        Self::from_series(
            &spectral.centroid,
            &spectral.rolloff,
            &spectral.zero_crossing_rate,
            features.tempo(),
        )
    }
}

/// Normalized distribution over the 8 moods, plus the ranking and the
/// indicators it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoodScore {
    weights: [(Mood, f64); 8],
    ranked: Vec<(Mood, f64)>,
    indicators: MoodIndicators,
}

impl MoodScore {
    /// Weights in canonical `Mood::ALL` order.
    pub fn weights(&self) -> &[(Mood, f64); 8] {
        &self.weights
    }

    /// Weights sorted descending.
    pub fn ranked(&self) -> &[(Mood, f64)] {
        &self.ranked
    }

    pub fn weight(&self, mood: Mood) -> f64 {
        self.weights
            .iter()
            .find(|(m, _)| *m == mood)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn top_mood(&self) -> Mood {
        self.ranked[0].0
    }

    pub fn confidence(&self) -> f64 {
        self.ranked[0].1
    }

    /// Ranks 2 through 4.
    pub fn secondary_moods(&self) -> &[(Mood, f64)] {
        &self.ranked[1..4]
    }

    pub fn indicators(&self) -> &MoodIndicators {
        &self.indicators
    }
}

/// Deterministic mood scoring. Stateless; a unit struct so it can be
/// passed around and swapped like the other services.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoodEngine;

impl MoodEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, features: &FeatureSet) -> Result<MoodScore, MoodError> {
        let indicators = MoodIndicators::from_features(features)?;
        let score = self.score_indicators(&indicators)?;
        log::info!(
            "Audio mood analyzed: {} ({:.2})",
            score.top_mood(),
            score.confidence()
        );
        Ok(score)
    }

    pub fn score_indicators(&self, ind: &MoodIndicators) -> Result<MoodScore, MoodError> {
        let raw = raw_scores(ind);

        // Out-of-range indicators (tempo > 120, centroid > 4 kHz) can push a
        // formula negative; a mood can't have negative evidence.
        let floored = raw.map(|(m, s)| (m, if s.is_finite() { s.max(0.0) } else { f64::NAN }));
        let total: f64 = floored.iter().map(|(_, s)| s).sum();
        if !total.is_finite() || total <= f64::EPSILON {
            return Err(MoodError::DegenerateInput);
        }

        let weights = floored.map(|(m, s)| (m, s / total));

        let mut ranked = weights.to_vec();
        // Stable sort: ties keep canonical order.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(MoodScore {
            weights,
            ranked,
            indicators: *ind,
        })
    }
}

// ── Mood formulas ─────────────────────────────────────────────────────
// Fixed linear combinations of the four indicators. Each row's weights sum
// to 1 so in-range indicators give in-range raw scores.
fn raw_scores(ind: &MoodIndicators) -> [(Mood, f64); 8] {
    let b = ind.brightness;
    let e = ind.energy;
    let rc = ind.rhythmic_complexity;
    let tf = ind.tempo_factor;

    [
        (Mood::Energetic, 0.4 * e + 0.6 * tf),
        (Mood::Calm, 0.6 * (1.0 - e) + 0.4 * (1.0 - tf)),
        (Mood::Happy, 0.5 * b + 0.3 * tf + 0.2 * e),
        (Mood::Sad, 0.5 * (1.0 - b) + 0.5 * (1.0 - tf)),
        (Mood::Aggressive, 0.4 * e + 0.3 * rc + 0.3 * tf),
        (Mood::Relaxed, 0.5 * (1.0 - e) + 0.5 * (1.0 - rc)),
        (Mood::Excited, 0.3 * e + 0.4 * tf + 0.3 * rc),
        (Mood::Melancholic, 0.4 * (1.0 - b) + 0.4 * (1.0 - tf) + 0.2 * (1.0 - e)),
    ]
}
