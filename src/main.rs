use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use moodviz::config::AppConfig;
use moodviz::features::FeatureSet;
use moodviz::models::cache::ModelCache;
use moodviz::models::{ModelManager, ModelStore};
use moodviz::mood::MoodEngine;
use moodviz::render::service::{OutputFormat, RenderKind, RenderRequest, RenderService};
use moodviz::visuals::VisualParameterMapper;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "moodviz", version, about = "Audio mood scoring and audio-reactive video rendering")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RenderStyle {
    /// Beat-pulsed circle, waveform and frequency bars
    Reactive,
    /// Beat-driven particle system
    Particles,
}

#[derive(Subcommand)]
enum Commands {
    /// Score the eight moods for a feature file
    Mood {
        /// Feature JSON produced by the analysis service
        features: PathBuf,
    },

    /// Print the visual parameters derived from tempo and mood
    Visuals {
        features: PathBuf,
    },

    /// Classify genre from the MFCCs in a feature file
    Genre {
        features: PathBuf,
    },

    /// Render a video from a feature file
    Render {
        #[arg(value_enum)]
        style: RenderStyle,

        features: PathBuf,

        #[arg(long)]
        fps: Option<u32>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// Particle count (particles style only)
        #[arg(long)]
        particles: Option<u32>,

        /// Simulation seed (particles style only)
        #[arg(long)]
        seed: Option<u64>,

        /// Write PNG frames plus a manifest instead of encoding with ffmpeg
        #[arg(long)]
        frames: bool,

        /// Output directory (defaults to config output_dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Take palette (and particle count) from the mood analysis
        #[arg(long)]
        from_mood: bool,

        /// Draw the spectral bar strip over particles
        #[arg(long)]
        overlay: bool,

        /// Number of render workers (0 = auto)
        #[arg(short, long, default_value = "0")]
        jobs: usize,
    },

    /// Show size, frame rate, frame count and duration of a rendered output
    Probe {
        path: PathBuf,
    },

    /// Load the default models and show cache status
    Models,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    match cli.command {
        Commands::Mood { features } => {
            let features = load_features(&features, &config)?;
            let score = MoodEngine::new()
                .score(&features)
                .context("Mood scoring failed")?;

            println!(
                "Top mood: {} (confidence {:.3})",
                score.top_mood(),
                score.confidence()
            );
            println!();
            println!("{:<12} {:>7}", "mood", "weight");
            println!("{}", "-".repeat(20));
            for (mood, weight) in score.ranked() {
                println!("{:<12} {:>7.3}", mood.as_str(), weight);
            }
            let ind = score.indicators();
            println!();
            println!(
                "brightness {:.3}  energy {:.3}  rhythmic complexity {:.3}  tempo factor {:.3}",
                ind.brightness, ind.energy, ind.rhythmic_complexity, ind.tempo_factor
            );
        }

        Commands::Visuals { features } => {
            let features = load_features(&features, &config)?;
            let score = MoodEngine::new()
                .score(&features)
                .context("Mood scoring failed")?;
            let params = VisualParameterMapper::new().map(features.tempo(), &score);
            println!("{}", serde_json::to_string_pretty(&params)?);
        }

        Commands::Genre { features } => {
            let features = load_features(&features, &config)?;
            let manager = model_manager(&config);
            manager
                .load_default_models()
                .context("Failed to load models")?;
            let prediction = manager
                .classify_genre(&features.spectral().mfcc)
                .context("Genre classification failed")?;

            println!(
                "Top genre: {} ({:.1}%)",
                prediction.top_genre,
                prediction.confidence * 100.0
            );
            for (genre, p) in &prediction.predictions {
                println!("  {:<14} {:>6.1}%", genre, p * 100.0);
            }
        }

        Commands::Render {
            style,
            features,
            fps,
            width,
            height,
            particles,
            seed,
            frames,
            out_dir,
            from_mood,
            overlay,
            jobs,
        } => {
            let features = load_features(&features, &config)?;

            let visuals = if from_mood {
                let score = MoodEngine::new()
                    .score(&features)
                    .context("Mood scoring failed")?;
                log::info!("Using {} palette", score.top_mood());
                Some(VisualParameterMapper::new().map(features.tempo(), &score))
            } else {
                None
            };

            let kind = match style {
                RenderStyle::Reactive => {
                    let mut cfg = config.render.visual_config();
                    if let Some(v) = &visuals {
                        cfg = cfg.with_visual_parameters(v);
                    }
                    cfg.fps = fps.unwrap_or(cfg.fps);
                    cfg.width = width.unwrap_or(cfg.width);
                    cfg.height = height.unwrap_or(cfg.height);
                    RenderKind::Reactive(cfg)
                }
                RenderStyle::Particles => {
                    let mut cfg = config.render.particle_config();
                    if let Some(v) = &visuals {
                        cfg = cfg.with_visual_parameters(v);
                    }
                    cfg.fps = fps.unwrap_or(cfg.fps);
                    cfg.width = width.unwrap_or(cfg.width);
                    cfg.height = height.unwrap_or(cfg.height);
                    cfg.num_particles = particles.unwrap_or(cfg.num_particles);
                    cfg.seed = seed.unwrap_or(cfg.seed);
                    cfg.spectral_overlay = overlay;
                    RenderKind::Particles(cfg)
                }
            };

            let out_dir = out_dir.unwrap_or_else(|| config.resolve_output_dir());
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let service = RenderService::new(workers, &out_dir, config.progress_interval)
                .context("Failed to start render workers")?;

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} frames ({eta}) {msg}",
                )?
                .progress_chars("#>-"),
            );

            let format = if frames {
                OutputFormat::Frames
            } else {
                OutputFormat::Mp4
            };
            let request = RenderRequest::new(Arc::new(features), kind)
                .with_format(format)
                .with_notifier(Arc::new(pb.clone()));
            let handle = service.submit(request);
            log::info!("Render job {} -> {}", handle.job_id(), handle.output_path().display());

            let path = handle.wait_blocking().context("Render failed")?;
            pb.finish_and_clear();
            println!("Render complete: {}", path.display());
        }

        Commands::Probe { path } => {
            let info = moodviz::render::sink::probe(&path)
                .with_context(|| format!("Failed to probe {}", path.display()))?;
            println!(
                "{}: {}x{} @ {:.2} fps, {} frames ({:.2}s)",
                path.display(),
                info.width,
                info.height,
                info.fps,
                info.frame_count,
                info.duration()
            );
        }

        Commands::Models => {
            let manager = model_manager(&config);
            manager
                .load_default_models()
                .context("Failed to load models")?;
            let status = manager.status();

            println!(
                "Models ready: {} ({}/{} cached)",
                status.ready, status.cache_size, status.max_cache_size
            );
            for name in &status.models_loaded {
                println!("  {}", name);
            }
            for (key, value) in &status.details {
                println!("  {:<28} {}", key, value);
            }
        }
    }

    Ok(())
}

fn load_features(path: &Path, config: &AppConfig) -> Result<FeatureSet> {
    FeatureSet::from_json_file_with_hop(path, config.hop_length)
        .with_context(|| format!("Failed to load features from {}", path.display()))
}

fn model_manager(config: &AppConfig) -> ModelManager {
    let model_dir = config.resolve_model_dir();
    log::info!("Model directory: {}", model_dir.display());
    ModelManager::new(
        Arc::new(ModelCache::new(config.model_cache_size)),
        ModelStore::new(model_dir),
    )
}
