//! Beat-driven particle simulation.
//!
//! One tick per output frame. State carries across ticks (positions,
//! compounding beat boosts, decaying life), so frame *i* depends on every
//! tick before it; random access goes through [`ParticleRenderer::frame_at`],
//! which replays from tick 0 with the same seed.

use super::raster::{self, Frame};
use super::reactive::{self, NUM_BARS};
use super::{
    FrameSource, ParticleConfig, RenderError, beat_intensity, frame_count, frame_time,
    resolve_feature_rate,
};
use crate::features::FeatureSet;
use crate::visuals::Rgb;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Life below this respawns the particle.
pub const RESPAWN_THRESHOLD: f64 = 0.1;
pub const LIFE_DECAY: f64 = 0.998;
const VELOCITY_BOOST: f64 = 0.5;
const SIZE_BOOST: f64 = 0.3;
/// Velocity factor applied on leaving the canvas.
const BOUNCE: f64 = -0.8;
const OVERLAY_HEIGHT: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub size: f64,
    pub color: Rgb,
    /// Always in `(0, 1]`.
    pub life: f64,
}

/// Owns the particles of one render job. Never shared between jobs.
pub struct ParticleSystem {
    particles: Vec<Particle>,
    rng: ChaCha8Rng,
    width: f64,
    height: f64,
}

impl ParticleSystem {
    pub fn new(count: usize, width: u32, height: u32, seed: u64, palette: Option<&[Rgb]>) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (w, h) = (width.max(1) as f64, height.max(1) as f64);
        let particles = (0..count)
            .map(|_| {
                let x = rng.random_range(0.0..w);
                let y = rng.random_range(0.0..h);
                let vx = rng.random_range(-2.0..2.0);
                let vy = rng.random_range(-2.0..2.0);
                let size = rng.random_range(2.0..8.0);
                let color = match palette {
                    Some(p) if !p.is_empty() => p[rng.random_range(0..p.len())],
                    _ => [
                        rng.random_range(100..255u8),
                        rng.random_range(100..255u8),
                        rng.random_range(100..255u8),
                    ],
                };
                Particle {
                    x,
                    y,
                    vx,
                    vy,
                    size,
                    color,
                    life: 1.0,
                }
            })
            .collect();
        Self {
            particles,
            rng,
            width: w,
            height: h,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Advance one frame at time `t`.
    pub fn tick(&mut self, t: f64, beats: &[f64]) {
        let beat = beat_intensity(t, beats);
        for p in &mut self.particles {
            p.x += p.vx;
            p.y += p.vy;

            // Boosts persist and compound over consecutive beat frames.
            if beat > 0.0 {
                p.vx *= 1.0 + beat * VELOCITY_BOOST;
                p.vy *= 1.0 + beat * VELOCITY_BOOST;
                p.size *= 1.0 + beat * SIZE_BOOST;
            }

            if p.x < 0.0 || p.x > self.width {
                p.vx *= BOUNCE;
            }
            if p.y < 0.0 || p.y > self.height {
                p.vy *= BOUNCE;
            }

            p.life *= LIFE_DECAY;
            if p.life < RESPAWN_THRESHOLD {
                p.life = 1.0;
                p.x = self.rng.random_range(0.0..self.width);
                p.y = self.rng.random_range(0.0..self.height);
            }
        }
    }

    pub fn rasterize(&self, frame: &mut Frame) {
        for p in &self.particles {
            let radius = p.size * p.life;
            if !radius.is_finite() {
                continue;
            }
            let color = raster::scale_color(p.color, p.life);
            raster::fill_circle(frame, p.x, p.y, radius as i64, color);
        }
    }
}

pub struct ParticleRenderer {
    system: ParticleSystem,
    config: ParticleConfig,
    beats: Vec<f64>,
    centroid: Vec<f64>,
    feature_rate: f64,
    total: u64,
    next: u64,
}

impl ParticleRenderer {
    pub fn new(features: &FeatureSet, config: &ParticleConfig) -> Result<Self, RenderError> {
        config.validate()?;
        Ok(Self {
            system: Self::fresh_system(config),
            config: config.clone(),
            beats: features.beats().to_vec(),
            centroid: features.spectral().centroid.clone(),
            feature_rate: resolve_feature_rate(config.feature_rate, features),
            total: frame_count(features.duration(), config.fps),
            next: 0,
        })
    }

    fn fresh_system(config: &ParticleConfig) -> ParticleSystem {
        ParticleSystem::new(
            config.num_particles as usize,
            config.width,
            config.height,
            config.seed,
            config.palette.as_deref(),
        )
    }

    fn draw(&self, system: &ParticleSystem, t: f64) -> Frame {
        let mut frame = raster::blank(self.config.width, self.config.height);
        system.rasterize(&mut frame);
        if self.config.spectral_overlay {
            let s = reactive::spectral_intensity(&self.centroid, t, self.feature_rate);
            let bars = NUM_BARS.min(self.centroid.len() as u32);
            reactive::draw_bars(&mut frame, bars, s * OVERLAY_HEIGHT, self.config.palette.as_deref());
        }
        frame
    }

    /// Frame `index` rebuilt from a fresh simulation. Does not disturb the
    /// sequential state used by `next_frame`.
    pub fn frame_at(&self, index: u64) -> Frame {
        let mut system = Self::fresh_system(&self.config);
        for i in 0..=index {
            system.tick(frame_time(i, self.config.fps), &self.beats);
        }
        self.draw(&system, frame_time(index, self.config.fps))
    }
}

impl FrameSource for ParticleRenderer {
    fn total_frames(&self) -> u64 {
        self.total
    }

    fn fps(&self) -> u32 {
        self.config.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.next >= self.total {
            return None;
        }
        let t = frame_time(self.next, self.config.fps);
        self.system.tick(t, &self.beats);
        let frame = self.draw(&self.system, t);
        self.next += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::sample_features;

    fn small_config() -> ParticleConfig {
        ParticleConfig {
            num_particles: 40,
            width: 160,
            height: 90,
            ..Default::default()
        }
    }

    #[test]
    fn test_life_stays_in_unit_interval() {
        let features = sample_features();
        let mut system = ParticleSystem::new(50, 160, 90, 7, None);
        // 1200 ticks: 0.998^1151 < 0.1, so every particle respawns at least once.
        for i in 0..1200 {
            system.tick(i as f64 / 30.0, features.beats());
            for p in system.particles() {
                assert!(p.life > 0.0 && p.life <= 1.0, "life {}", p.life);
            }
        }
    }

    #[test]
    fn test_respawn_resets_life_and_position() {
        let mut system = ParticleSystem::new(1, 100, 100, 3, None);
        system.particles[0].life = 0.1;
        system.particles[0].x = -500.0;
        system.tick(0.5, &[]);
        let p = &system.particles()[0];
        assert_eq!(p.life, 1.0);
        assert!((0.0..100.0).contains(&p.x));
        assert!((0.0..100.0).contains(&p.y));
    }

    #[test]
    fn test_beat_boost_compounds() {
        let mut system = ParticleSystem::new(1, 1000, 1000, 1, None);
        system.particles[0] = Particle {
            x: 500.0,
            y: 500.0,
            vx: 1.0,
            vy: 0.0,
            size: 4.0,
            color: [200, 200, 200],
            life: 1.0,
        };
        system.tick(1.0, &[1.0]);
        system.tick(1.0, &[1.0]);
        let p = &system.particles()[0];
        assert!((p.vx - 2.25).abs() < 1e-12);
        assert!((p.size - 4.0 * 1.3 * 1.3).abs() < 1e-12);
        assert!((p.x - 502.5).abs() < 1e-12);
    }

    #[test]
    fn test_bounce_uses_explicit_bounds() {
        let mut system = ParticleSystem::new(1, 200, 100, 1, None);
        system.particles[0] = Particle {
            x: 199.5,
            y: 50.0,
            vx: 1.0,
            vy: 0.0,
            size: 2.0,
            color: [255; 3],
            life: 1.0,
        };
        system.tick(5.0, &[]);
        assert!((system.particles()[0].vx + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_seeded_runs_match() {
        let a = ParticleSystem::new(10, 160, 90, 42, None);
        let b = ParticleSystem::new(10, 160, 90, 42, None);
        assert_eq!(a.particles(), b.particles());
        let c = ParticleSystem::new(10, 160, 90, 43, None);
        assert_ne!(a.particles(), c.particles());
    }

    #[test]
    fn test_palette_colors() {
        let palette = [[1, 2, 3], [4, 5, 6]];
        let system = ParticleSystem::new(20, 160, 90, 42, Some(&palette));
        assert!(system.particles().iter().all(|p| palette.contains(&p.color)));
    }

    #[test]
    fn test_frame_at_matches_sequential() {
        let features = sample_features();
        let mut renderer = ParticleRenderer::new(&features, &small_config()).unwrap();
        assert_eq!(renderer.total_frames(), 300);
        let mut sequential = Vec::new();
        for _ in 0..20 {
            sequential.push(renderer.next_frame().unwrap());
        }
        assert_eq!(renderer.frame_at(0), sequential[0]);
        assert_eq!(renderer.frame_at(19), sequential[19]);
        assert_eq!(renderer.frame_at(15), sequential[15]);
    }

    #[test]
    fn test_blown_up_particles_do_not_panic() {
        let mut system = ParticleSystem::new(5, 64, 64, 9, None);
        for p in &mut system.particles {
            p.vx = f64::MAX;
            p.size = f64::INFINITY;
        }
        system.tick(0.0, &[0.0]);
        let mut frame = raster::blank(64, 64);
        system.rasterize(&mut frame);
    }

    #[test]
    fn test_spectral_overlay_draws_strip() {
        let features = sample_features();
        let config = ParticleConfig {
            num_particles: 0,
            spectral_overlay: true,
            ..small_config()
        };
        let renderer = ParticleRenderer::new(&features, &config).unwrap();
        let frame = renderer.frame_at(0);
        assert_ne!(frame.get_pixel(0, 89).0, [0, 0, 0]);

        let plain = ParticleRenderer::new(
            &features,
            &ParticleConfig {
                spectral_overlay: false,
                ..config
            },
        )
        .unwrap();
        assert!(plain.frame_at(0).pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
