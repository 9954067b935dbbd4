use nalgebra as na;
use num_traits::{Float, FloatConst};

/// Horizontal pixels per azimuth unit.
const AZIMUTH_SCALE: f64 = 0.32;
const AZIMUTH_OFFSET: i32 = 1000;

/// Image row of the horizon used as elevation zero.
const ELEVATION_HORIZON: i32 = 600;
const ELEVATION_SCALE: f64 = 1.9;

/// Hue channel of the HLS representation of an RGB triple, in `[0, 1)`.
///
/// Grey values (all channels equal) have hue 0.
pub fn rgb_to_hue(r: u8, g: u8, b: u8) -> f32 {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);

    if maxc == minc {
        return 0.0;
    }

    let range = maxc - minc;
    let rc = (maxc - r) / range;
    let gc = (maxc - g) / range;
    let bc = (maxc - b) / range;

    let h = if r == maxc {
        bc - gc
    } else if g == maxc {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };

    (h / 6.0).rem_euclid(1.0)
}

/// Robot-frame azimuth of an image column.
#[inline]
pub fn azimuth(cx: i32) -> i32 {
    (cx as f64 / AZIMUTH_SCALE) as i32 - AZIMUTH_OFFSET
}

/// Robot-frame elevation of an image row.
#[inline]
pub fn elevation(cy: i32) -> i32 {
    ((ELEVATION_HORIZON - cy) as f64 * ELEVATION_SCALE) as i32
}

/// Integer midpoint of two corners, truncated like the pixel grid.
#[inline]
pub fn midpoint(a: na::Point2<i32>, b: na::Point2<i32>) -> na::Point2<i32> {
    let mid = |u: i32, v: i32| ((i64::from(u) + i64::from(v)) / 2) as i32;
    na::Point2::new(mid(a.x, b.x), mid(a.y, b.y))
}

/// Segment direction with the axes swapped: `atan2(dx, dy) / (pi / 2)`.
///
/// Near-vertical segments map close to 0, near-horizontal ones close to ±1.
#[inline]
pub fn normalized_slope<F: Float + FloatConst>(dx: F, dy: F) -> F {
    dx.atan2(dy) / F::FRAC_PI_2()
}

/// How far the diagonal of a `w` x `h` box is from 45 degrees, in radians.
#[inline]
pub fn diagonal_deviation<F: Float + FloatConst>(w: F, h: F) -> F {
    (h.abs().atan2(w.abs()) - F::FRAC_PI_4()).abs()
}
