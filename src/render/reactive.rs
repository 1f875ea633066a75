use super::raster::{self, Frame};
use super::{
    FrameSource, RenderError, VisualConfig, beat_intensity, feature_index, frame_count, frame_time,
    resolve_feature_rate,
};
use crate::features::FeatureSet;
use crate::visuals::Rgb;
use std::f64::consts::TAU;

pub const NUM_BARS: u32 = 32;
/// Centroid (Hz) that maps to full spectral intensity.
const CENTROID_NORM: f64 = 4000.0;
/// Used once the frame time runs past the centroid series.
const FALLBACK_INTENSITY: f64 = 0.5;
const WAVE_COLOR: Rgb = [100, 200, 255];
const WAVE_STEP: usize = 10;

/// Beat-pulsed circle, tempo-locked waveform and centroid-driven bars.
/// Every frame is a pure function of its index.
pub struct ReactiveRenderer {
    width: u32,
    height: u32,
    fps: u32,
    tempo: f64,
    beats: Vec<f64>,
    centroid: Vec<f64>,
    feature_rate: f64,
    palette: Option<Vec<Rgb>>,
    total: u64,
    next: u64,
}

impl ReactiveRenderer {
    pub fn new(features: &FeatureSet, config: &VisualConfig) -> Result<Self, RenderError> {
        config.validate()?;
        Ok(Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            tempo: features.tempo(),
            beats: features.beats().to_vec(),
            centroid: features.spectral().centroid.clone(),
            feature_rate: resolve_feature_rate(config.feature_rate, features),
            palette: config.palette.clone(),
            total: frame_count(features.duration(), config.fps),
            next: 0,
        })
    }

    fn spectral_intensity(&self, t: f64) -> f64 {
        spectral_intensity(&self.centroid, t, self.feature_rate)
    }

    pub fn render_frame(&self, index: u64) -> Frame {
        let t = frame_time(index, self.fps);
        let mut frame = raster::blank(self.width, self.height);
        let beat = beat_intensity(t, &self.beats);
        let s = self.spectral_intensity(t);
        let (cx, cy) = ((self.width / 2) as f64, (self.height / 2) as f64);

        // Pulsing circle
        let radius = (50.0 + beat * 100.0) as i64;
        let circle = [channel(beat), channel(s), channel(1.0 - s)];
        raster::fill_circle(&mut frame, cx, cy, radius, circle);

        // Waveform
        let wave_color = self
            .palette
            .as_ref()
            .and_then(|p| p.first().copied())
            .unwrap_or(WAVE_COLOR);
        let wave_y = cy as i64 + (100.0 * (t * self.tempo / 60.0 * TAU).sin()) as i64;
        for x in (0..self.width as usize).step_by(WAVE_STEP) {
            let wave_height = (20.0 * s * (x as f64 * 0.01 + t * 5.0).sin()) as i64;
            raster::vline(
                &mut frame,
                x as i64,
                wave_y,
                wave_y.saturating_add(wave_height),
                2,
                wave_color,
            );
        }

        let bars = NUM_BARS.min(self.centroid.len() as u32);
        draw_bars(&mut frame, bars, s * 0.3, self.palette.as_deref());

        frame
    }
}

/// Normalised centroid at time `t`, or the fallback past the series end.
pub(super) fn spectral_intensity(centroid: &[f64], t: f64, feature_rate: f64) -> f64 {
    centroid
        .get(feature_index(t, feature_rate))
        .map_or(FALLBACK_INTENSITY, |c| c / CENTROID_NORM)
}

/// The first `bars` of [`NUM_BARS`] equal-width bars along the bottom
/// edge, `height_fraction` of the frame tall.
pub(super) fn draw_bars(frame: &mut Frame, bars: u32, height_fraction: f64, palette: Option<&[Rgb]>) {
    let bar_width = (frame.width() / NUM_BARS) as i64;
    let bar_height = (height_fraction * frame.height() as f64) as i64;
    let bottom = frame.height() as i64 - 1;
    for i in 0..bars.min(NUM_BARS) {
        let x = i as i64 * bar_width;
        let color = match palette {
            Some(p) if !p.is_empty() => p[i as usize % p.len()],
            _ => {
                let c = (255 * i / NUM_BARS) as u8;
                [c, 255 - c, 128]
            }
        };
        raster::fill_rect(
            frame,
            x,
            bottom.saturating_sub(bar_height),
            x + bar_width - 2,
            bottom,
            color,
        );
    }
}

/// `255 · v` truncated, saturating at the channel bounds.
fn channel(v: f64) -> u8 {
    (255.0 * v).clamp(0.0, 255.0) as u8
}

impl FrameSource for ReactiveRenderer {
    fn total_frames(&self) -> u64 {
        self.total
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.next >= self.total {
            return None;
        }
        let frame = self.render_frame(self.next);
        self.next += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::sample_features;

    fn small_config() -> VisualConfig {
        VisualConfig {
            width: 320,
            height: 180,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_total_for_ten_seconds() {
        let r = ReactiveRenderer::new(&sample_features(), &small_config()).unwrap();
        assert_eq!(r.total_frames(), 300);
        assert_eq!(r.dimensions(), (320, 180));
    }

    #[test]
    fn test_frames_are_pure() {
        let r = ReactiveRenderer::new(&sample_features(), &small_config()).unwrap();
        assert_eq!(r.render_frame(17), r.render_frame(17));
    }

    #[test]
    fn test_circle_pulses_on_beat() {
        let r = ReactiveRenderer::new(&sample_features(), &small_config()).unwrap();
        // Beats every 0.5 s: frame 15 sits on a beat, frame 7 is between.
        let on = r.render_frame(15);
        let off = r.render_frame(7);
        // 123 px right of centre: inside radius 150, outside 50, clear of waveform strokes.
        assert_ne!(on.get_pixel(160 + 123, 90).0, [0, 0, 0]);
        assert_eq!(off.get_pixel(160 + 123, 90).0, [0, 0, 0]);
        assert_eq!(on.get_pixel(160, 90).0[0], 255);
    }

    #[test]
    fn test_past_feature_end_uses_fallback() {
        let features = sample_features();
        let config = VisualConfig {
            feature_rate: Some(1000.0),
            ..small_config()
        };
        let r = ReactiveRenderer::new(&features, &config).unwrap();
        // 1 s * 1000 frames/s runs past the 300-entry centroid series.
        assert_eq!(r.spectral_intensity(1.0), FALLBACK_INTENSITY);
        let expected = features.spectral().centroid[0] / CENTROID_NORM;
        assert_eq!(r.spectral_intensity(0.0), expected);
    }

    #[test]
    fn test_palette_tints_bars() {
        let config = VisualConfig {
            palette: Some(vec![[1, 2, 3]]),
            ..small_config()
        };
        let r = ReactiveRenderer::new(&sample_features(), &config).unwrap();
        let frame = r.render_frame(0);
        assert_eq!(frame.get_pixel(0, 179).0, [1, 2, 3]);
    }

    #[test]
    fn test_extreme_centroid_does_not_overflow() {
        let mut r = ReactiveRenderer::new(
            &sample_features(),
            &VisualConfig {
                width: 64,
                height: 32,
                ..Default::default()
            },
        )
        .unwrap();
        for extreme in [1e30, -1e30] {
            r.centroid = vec![extreme; 300];
            let frame = r.render_frame(3);
            assert_eq!(frame.dimensions(), (64, 32));
        }
    }

    #[test]
    fn test_bars_saturate_at_extreme_heights() {
        let mut frame = raster::blank(64, 32);
        draw_bars(&mut frame, NUM_BARS, 1e30, None);
        // Full-height bars reach the top row.
        assert_ne!(frame.get_pixel(0, 0).0, [0, 0, 0]);

        let mut frame = raster::blank(64, 32);
        draw_bars(&mut frame, NUM_BARS, -1e30, None);
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_next_frame_stops_at_total() {
        let features = sample_features();
        let mut r = ReactiveRenderer::new(
            &features,
            &VisualConfig {
                fps: 1,
                width: 64,
                height: 32,
                ..Default::default()
            },
        )
        .unwrap();
        let mut n = 0;
        while r.next_frame().is_some() {
            n += 1;
        }
        assert_eq!(n, 10);
    }
}
