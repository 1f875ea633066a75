use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::features::DEFAULT_HOP_LENGTH;
use crate::models::cache::DEFAULT_CAPACITY;
use crate::render::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::render::{
    DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_NUM_PARTICLES, DEFAULT_SEED, DEFAULT_WIDTH,
    ParticleConfig, VisualConfig,
};

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where rendered videos go (overrides XDG default).
    pub output_dir: Option<PathBuf>,
    /// Where model files live (overrides XDG default).
    pub model_dir: Option<PathBuf>,
    /// Models kept resident before FIFO eviction.
    pub model_cache_size: usize,
    /// Number of render workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Frames between progress reports.
    pub progress_interval: u64,
    /// Analysis hop length assumed when a feature file omits it.
    pub hop_length: u32,
    pub render: RenderDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            model_dir: None,
            model_cache_size: DEFAULT_CAPACITY,
            workers: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            hop_length: DEFAULT_HOP_LENGTH,
            render: RenderDefaults::default(),
        }
    }
}

/// Render settings applied before CLI overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub num_particles: u32,
    pub seed: u64,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            num_particles: DEFAULT_NUM_PARTICLES,
            seed: DEFAULT_SEED,
        }
    }
}

impl RenderDefaults {
    pub fn visual_config(&self) -> VisualConfig {
        VisualConfig {
            fps: self.fps,
            width: self.width,
            height: self.height,
            ..Default::default()
        }
    }

    pub fn particle_config(&self) -> ParticleConfig {
        ParticleConfig {
            num_particles: self.num_particles,
            fps: self.fps,
            width: self.width,
            height: self.height,
            seed: self.seed,
            ..Default::default()
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/moodviz/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn resolve_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| data_subdir("videos"))
    }

    pub fn resolve_model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| data_subdir("models"))
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// `name` under the XDG data directory, or under the current directory when
/// no home is available.
fn data_subdir(name: &str) -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.data_dir().join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.model_cache_size, 3);
        assert_eq!(config.progress_interval, 100);
        assert_eq!(config.hop_length, 512);
        assert_eq!(config.render.fps, 30);
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            model_cache_size = 5
            workers = 3

            [render]
            width = 640
            height = 360
            "#,
        )
        .unwrap();
        assert_eq!(config.model_cache_size, 5);
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.render.width, 640);
        assert_eq!(config.render.fps, 30);
        let particles = config.render.particle_config();
        assert_eq!((particles.width, particles.height), (640, 360));
        assert_eq!(particles.num_particles, 100);
    }

    #[test]
    fn test_explicit_dirs_win() {
        let config = AppConfig::from_toml(r#"output_dir = "/tmp/out""#).unwrap();
        assert_eq!(config.resolve_output_dir(), PathBuf::from("/tmp/out"));
        assert!(config.resolve_model_dir().ends_with("models"));
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(AppConfig::from_toml("workers = \"many\"").is_err());
    }
}
