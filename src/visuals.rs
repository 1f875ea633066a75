use crate::mood::{Mood, MoodError, MoodScore};
use serde::{Deserialize, Serialize};

/// 8-bit RGB triple.
pub type Rgb = [u8; 3];

/// Palette used when the mood label is unknown.
pub const DEFAULT_PALETTE_MOOD: Mood = Mood::Calm;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualParameters {
    pub color_palette: Vec<Rgb>,
    pub movement: Movement,
    pub particles: Particles,
    pub effects: Effects,
    pub animation: Animation,
    pub camera: Camera,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub speed: f64,
    pub chaos: f64,
    pub fluidity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particles {
    pub count: u32,
    pub size_range: (u32, u32),
    pub life_span: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effects {
    pub blur: f64,
    pub glow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    pub beat_responsiveness: f64,
    pub smooth_transitions: f64,
    pub tempo_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub shake: f64,
    pub zoom: f64,
    pub rotation: f64,
}

/// Three colors per mood.
pub fn palette(mood: Mood) -> [Rgb; 3] {
    match mood {
        Mood::Energetic => [[255, 100, 100], [255, 200, 0], [255, 150, 50]],
        Mood::Calm => [[100, 150, 255], [150, 200, 255], [200, 220, 255]],
        Mood::Happy => [[255, 200, 100], [255, 150, 200], [255, 255, 100]],
        Mood::Sad => [[100, 100, 150], [150, 150, 200], [100, 150, 200]],
        Mood::Aggressive => [[255, 50, 50], [200, 0, 0], [255, 100, 0]],
        Mood::Relaxed => [[150, 255, 150], [200, 255, 200], [100, 200, 150]],
        Mood::Excited => [[255, 0, 255], [255, 100, 255], [200, 0, 200]],
        Mood::Melancholic => [[150, 100, 150], [100, 100, 100], [150, 150, 100]],
    }
}

/// Palette lookup for a label that arrived from outside (CLI, JSON).
///
/// Unknown labels get the calm palette; the error is returned alongside
/// so callers can report it instead of silently rendering the wrong colors.
pub fn palette_for_label(label: &str) -> ([Rgb; 3], Option<MoodError>) {
    match label.parse::<Mood>() {
        Ok(mood) => (palette(mood), None),
        Err(e) => {
            log::warn!("{e}; falling back to the {DEFAULT_PALETTE_MOOD} palette");
            (palette(DEFAULT_PALETTE_MOOD), Some(e))
        }
    }
}

/// Pure mapping from tempo and mood analysis to rendering parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisualParameterMapper;

impl VisualParameterMapper {
    pub fn new() -> Self {
        Self
    }

    pub fn map(&self, tempo: f64, mood: &MoodScore) -> VisualParameters {
        let ind = mood.indicators();
        let energy = ind.energy;
        let brightness = ind.brightness;

        let particle_count = (50.0 + energy * 200.0).max(0.0) as u32;
        let max_size = (8.0 + energy * 10.0).max(2.0) as u32;

        VisualParameters {
            color_palette: palette(mood.top_mood()).to_vec(),
            movement: Movement {
                speed: (tempo / 120.0).clamp(0.1, 2.0),
                chaos: energy,
                fluidity: 1.0 - ind.rhythmic_complexity,
            },
            particles: Particles {
                count: particle_count,
                size_range: (2, max_size),
                life_span: 2.0 + (1.0 - energy) * 3.0,
            },
            effects: Effects {
                blur: ((1.0 - brightness) * 0.5).clamp(0.0, 1.0),
                glow: brightness,
            },
            animation: Animation {
                beat_responsiveness: (energy * 2.0).clamp(0.1, 1.0),
                // More energy, harder cuts.
                smooth_transitions: 1.0 - energy * 0.5,
                tempo_sync: tempo > 80.0,
            },
            camera: Camera {
                shake: energy * 0.3,
                zoom: 0.1 + energy * 0.2,
                rotation: energy * 0.5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mood::{MoodEngine, MoodIndicators};

    fn score(brightness: f64, energy: f64, tempo: f64) -> MoodScore {
        MoodEngine::new()
            .score_indicators(&MoodIndicators {
                brightness,
                energy,
                rhythmic_complexity: 0.1,
                tempo_factor: (tempo / 120.0).min(2.0),
            })
            .unwrap()
    }

    #[test]
    fn test_tempo_sync_is_strict() {
        let mapper = VisualParameterMapper::new();
        let s = score(0.5, 0.5, 80.0);
        assert!(!mapper.map(80.0, &s).animation.tempo_sync);
        assert!(mapper.map(80.0001, &s).animation.tempo_sync);
    }

    #[test]
    fn test_speed_clamped() {
        let mapper = VisualParameterMapper::new();
        let s = score(0.5, 0.5, 120.0);
        assert_eq!(mapper.map(0.0, &s).movement.speed, 0.1);
        assert_eq!(mapper.map(120.0, &s).movement.speed, 1.0);
        assert_eq!(mapper.map(600.0, &s).movement.speed, 2.0);
    }

    #[test]
    fn test_particle_count_and_blur() {
        let mapper = VisualParameterMapper::new();
        let params = mapper.map(120.0, &score(0.2, 0.6, 120.0));
        assert_eq!(params.particles.count, 170);
        assert_eq!(params.particles.size_range, (2, 14));
        assert!((params.effects.blur - 0.4).abs() < 1e-12);

        // Very bright audio can't produce negative blur.
        let bright = mapper.map(120.0, &score(3.0, 0.6, 120.0));
        assert_eq!(bright.effects.blur, 0.0);
    }

    #[test]
    fn test_palette_follows_top_mood() {
        let mapper = VisualParameterMapper::new();
        let s = score(0.8, 0.6, 120.0);
        let params = mapper.map(120.0, &s);
        assert_eq!(params.color_palette, palette(s.top_mood()).to_vec());
        assert_eq!(params.color_palette.len(), 3);
    }

    #[test]
    fn test_map_is_pure() {
        let mapper = VisualParameterMapper::new();
        let s = score(0.45, 0.7, 133.0);
        let a = serde_json::to_vec(&mapper.map(133.0, &s)).unwrap();
        let b = serde_json::to_vec(&mapper.map(133.0, &s)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_label_falls_back_to_calm() {
        let (colors, err) = palette_for_label("groovy");
        assert_eq!(colors, palette(Mood::Calm));
        assert_eq!(err, Some(MoodError::InvalidMood("groovy".to_string())));

        let (colors, err) = palette_for_label("sad");
        assert_eq!(colors, palette(Mood::Sad));
        assert!(err.is_none());
    }
}
