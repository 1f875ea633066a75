//! Minimal RGB drawing primitives. Everything clips to the canvas; nothing
//! here can fail.

use crate::visuals::Rgb;
use image::RgbImage;

pub type Frame = RgbImage;

pub fn blank(width: u32, height: u32) -> Frame {
    RgbImage::new(width, height)
}

/// Filled disc centred on the truncated `(cx, cy)`. Skipped when the radius
/// is not positive or the centre is non-finite or off the canvas.
pub fn fill_circle(frame: &mut Frame, cx: f64, cy: f64, radius: i64, color: Rgb) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    if radius <= 0 || !cx.is_finite() || !cy.is_finite() {
        return;
    }
    let (x0, y0) = (cx as i64, cy as i64);
    if x0 < 0 || x0 >= w || y0 < 0 || y0 >= h {
        return;
    }

    let r2 = radius.saturating_mul(radius);
    let ymin = y0.saturating_sub(radius).max(0);
    let ymax = y0.saturating_add(radius).min(h - 1);
    let xmin = x0.saturating_sub(radius).max(0);
    let xmax = x0.saturating_add(radius).min(w - 1);
    for y in ymin..=ymax {
        let dy = y - y0;
        for x in xmin..=xmax {
            let dx = x - x0;
            if dx * dx + dy * dy <= r2 {
                frame.put_pixel(x as u32, y as u32, image::Rgb(color));
            }
        }
    }
}

/// Vertical stroke from `y_from` to `y_to` (either order), `thickness` px wide
/// starting at `x`.
pub fn vline(frame: &mut Frame, x: i64, y_from: i64, y_to: i64, thickness: u32, color: Rgb) {
    let (lo, hi) = if y_from <= y_to {
        (y_from, y_to)
    } else {
        (y_to, y_from)
    };
    fill_rect(frame, x, lo, x.saturating_add(thickness.max(1) as i64 - 1), hi, color);
}

/// Filled rectangle over the inclusive corners `(x0, y0)`..`(x1, y1)`.
pub fn fill_rect(frame: &mut Frame, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    if w == 0 || h == 0 || x1 < x0 || y1 < y0 {
        return;
    }
    let (xmin, xmax) = (x0.max(0), x1.min(w - 1));
    let (ymin, ymax) = (y0.max(0), y1.min(h - 1));
    for y in ymin..=ymax {
        for x in xmin..=xmax {
            frame.put_pixel(x as u32, y as u32, image::Rgb(color));
        }
    }
}

/// Scale every channel by `factor` (clamped to `[0,1]`), truncating.
pub fn scale_color(color: Rgb, factor: f64) -> Rgb {
    let f = if factor.is_finite() {
        factor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    color.map(|c| (c as f64 * f) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(frame: &Frame) -> usize {
        frame.pixels().filter(|p| p.0 != [0, 0, 0]).count()
    }

    #[test]
    fn test_circle_basic() {
        let mut f = blank(20, 20);
        fill_circle(&mut f, 10.0, 10.0, 2, [255, 0, 0]);
        // r=2 disc covers 13 pixels
        assert_eq!(lit(&f), 13);
        assert_eq!(f.get_pixel(10, 10).0, [255, 0, 0]);
        assert_eq!(f.get_pixel(12, 12).0, [0, 0, 0]);
    }

    #[test]
    fn test_circle_skips_bad_input() {
        let mut f = blank(10, 10);
        fill_circle(&mut f, -1.0, 5.0, 3, [255; 3]);
        fill_circle(&mut f, 10.0, 5.0, 3, [255; 3]);
        fill_circle(&mut f, f64::NAN, 5.0, 3, [255; 3]);
        fill_circle(&mut f, 5.0, f64::INFINITY, 3, [255; 3]);
        fill_circle(&mut f, 5.0, 5.0, 0, [255; 3]);
        assert_eq!(lit(&f), 0);
    }

    #[test]
    fn test_huge_circle_clips() {
        let mut f = blank(8, 6);
        fill_circle(&mut f, 3.0, 3.0, i64::MAX, [1, 2, 3]);
        assert_eq!(lit(&f), 48);
    }

    #[test]
    fn test_rect_and_line_clip() {
        let mut f = blank(10, 10);
        fill_rect(&mut f, -5, 8, 3, 20, [9, 9, 9]);
        assert_eq!(lit(&f), 4 * 2);

        let mut f = blank(10, 10);
        vline(&mut f, 9, 7, 2, 2, [1, 1, 1]);
        assert_eq!(lit(&f), 6);
    }

    #[test]
    fn test_scale_color() {
        assert_eq!(scale_color([200, 100, 50], 0.5), [100, 50, 25]);
        assert_eq!(scale_color([200, 100, 50], 2.0), [200, 100, 50]);
        assert_eq!(scale_color([200, 100, 50], f64::NAN), [0, 0, 0]);
    }
}
