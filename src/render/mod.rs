pub mod particles;
pub mod progress;
pub mod raster;
pub mod reactive;
pub mod service;
pub mod sink;

use crate::features::FeatureSet;
use crate::visuals::{Rgb, VisualParameters};
use raster::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds either side of a beat that still count as "on" the beat.
pub const BEAT_WINDOW: f64 = 0.1;

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_NUM_PARTICLES: u32 = 100;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Invalid render config: {0}")]
    InvalidConfig(String),
    #[error("Render failed: {0}")]
    RenderFailure(String),
    #[error("ffmpeg not found, required for video encoding")]
    EncoderNotFound,
    #[error("Render cancelled")]
    Cancelled,
    #[error("Render worker exited without a result")]
    WorkerLost,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Strength of the nearest beat at time `t`: `1 - |t-b|·10` for beats
/// within [`BEAT_WINDOW`], maximised over all such beats, else 0.
pub fn beat_intensity(t: f64, beats: &[f64]) -> f64 {
    beats
        .iter()
        .map(|&b| (t - b).abs())
        .filter(|d| *d < BEAT_WINDOW)
        .map(|d| 1.0 - d * 10.0)
        .fold(0.0, f64::max)
        .clamp(0.0, 1.0)
}

/// Number of output frames for a clip: `round(duration · fps)`.
pub fn frame_count(duration: f64, fps: u32) -> u64 {
    let n = (duration * fps as f64).round();
    if n.is_finite() && n > 0.0 { n as u64 } else { 0 }
}

pub fn frame_time(index: u64, fps: u32) -> f64 {
    index as f64 / fps as f64
}

/// Index into a feature series sampled at `feature_rate` frames/second.
pub fn feature_index(t: f64, feature_rate: f64) -> usize {
    let i = t * feature_rate;
    if i.is_finite() && i > 0.0 { i as usize } else { 0 }
}

/// Something that yields frames in order. Particle simulations are
/// stateful, so `next_frame` must be called sequentially.
pub trait FrameSource: Send {
    fn total_frames(&self) -> u64;
    fn fps(&self) -> u32;
    fn dimensions(&self) -> (u32, u32);
    fn next_frame(&mut self) -> Option<Frame>;
}

fn check_dimensions(fps: u32, width: u32, height: u32) -> Result<(), RenderError> {
    if fps == 0 {
        return Err(RenderError::InvalidConfig("fps must be positive".to_string()));
    }
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidConfig(format!(
            "frame size {width}x{height} is empty"
        )));
    }
    Ok(())
}

fn check_feature_rate(rate: Option<f64>) -> Result<(), RenderError> {
    match rate {
        Some(r) if !(r.is_finite() && r > 0.0) => Err(RenderError::InvalidConfig(format!(
            "feature_rate must be positive, got {r}"
        ))),
        _ => Ok(()),
    }
}

fn resolve_feature_rate(configured: Option<f64>, features: &FeatureSet) -> f64 {
    configured.unwrap_or_else(|| features.feature_rate())
}

fn check_palette(palette: &Option<Vec<Rgb>>) -> Result<(), RenderError> {
    match palette {
        Some(p) if p.is_empty() => Err(RenderError::InvalidConfig("palette is empty".to_string())),
        _ => Ok(()),
    }
}

/// Settings for the audio-reactive renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Frames per second of the feature series; derived from the feature
    /// set's sample rate and hop length when unset.
    pub feature_rate: Option<f64>,
    pub palette: Option<Vec<Rgb>>,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            feature_rate: None,
            palette: None,
        }
    }
}

impl VisualConfig {
    pub fn validate(&self) -> Result<(), RenderError> {
        check_dimensions(self.fps, self.width, self.height)?;
        check_palette(&self.palette)?;
        check_feature_rate(self.feature_rate)
    }

    pub fn with_visual_parameters(mut self, params: &VisualParameters) -> Self {
        self.palette = Some(params.color_palette.clone());
        self
    }
}

/// Settings for the particle renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub num_particles: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub feature_rate: Option<f64>,
    pub palette: Option<Vec<Rgb>>,
    /// Draw a centroid-driven bar strip along the bottom edge.
    pub spectral_overlay: bool,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            num_particles: DEFAULT_NUM_PARTICLES,
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            seed: DEFAULT_SEED,
            feature_rate: None,
            palette: None,
            spectral_overlay: false,
        }
    }
}

impl ParticleConfig {
    pub fn validate(&self) -> Result<(), RenderError> {
        check_dimensions(self.fps, self.width, self.height)?;
        check_palette(&self.palette)?;
        check_feature_rate(self.feature_rate)
    }

    /// Take particle count and palette from mapped visual parameters.
    pub fn with_visual_parameters(mut self, params: &VisualParameters) -> Self {
        self.num_particles = params.particles.count;
        self.palette = Some(params.color_palette.clone());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mood::{MoodEngine, MoodIndicators};
    use crate::visuals::VisualParameterMapper;

    #[test]
    fn test_beat_intensity_window() {
        let beats = [1.0, 2.0];
        assert_eq!(beat_intensity(1.0, &beats), 1.0);
        assert!((beat_intensity(1.05, &beats) - 0.5).abs() < 1e-9);
        assert_eq!(beat_intensity(1.1, &beats), 0.0);
        assert_eq!(beat_intensity(1.5, &beats), 0.0);
        assert_eq!(beat_intensity(0.0, &[]), 0.0);
    }

    #[test]
    fn test_beat_intensity_takes_strongest() {
        // Closer beat listed first must not be overwritten by a weaker one.
        let beats = [1.0, 1.08];
        assert_eq!(beat_intensity(1.0, &beats), 1.0);
    }

    #[test]
    fn test_frame_count_rounds() {
        assert_eq!(frame_count(10.0, 30), 300);
        assert_eq!(frame_count(0.99, 30), 30);
        assert_eq!(frame_count(0.0, 30), 0);
        assert_eq!(frame_count(f64::NAN, 30), 0);
    }

    #[test]
    fn test_feature_index_truncates() {
        assert_eq!(feature_index(1.0, 86.13), 86);
        assert_eq!(feature_index(0.999, 30.0), 29);
        assert_eq!(feature_index(-1.0, 30.0), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(VisualConfig::default().validate().is_ok());
        let bad = VisualConfig {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(RenderError::InvalidConfig(_))));
        let bad = ParticleConfig {
            height: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = ParticleConfig {
            palette: Some(vec![]),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = ParticleConfig {
            feature_rate: Some(0.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_particle_config_from_visuals() {
        let score = MoodEngine::new()
            .score_indicators(&MoodIndicators {
                brightness: 0.5,
                energy: 0.6,
                rhythmic_complexity: 0.1,
                tempo_factor: 1.0,
            })
            .unwrap();
        let params = VisualParameterMapper::new().map(120.0, &score);
        let cfg = ParticleConfig::default().with_visual_parameters(&params);
        assert_eq!(cfg.num_particles, 170);
        assert_eq!(cfg.palette.as_deref(), Some(params.color_palette.as_slice()));
        assert_eq!(cfg.seed, DEFAULT_SEED);
    }

    #[test]
    fn test_config_serde_defaults() {
        let cfg: ParticleConfig = serde_json::from_str(r#"{"num_particles": 5}"#).unwrap();
        assert_eq!(cfg.num_particles, 5);
        assert_eq!((cfg.fps, cfg.width, cfg.height), (30, 1920, 1080));
    }
}
