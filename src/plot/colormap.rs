//! Diverging colour scale (RdYlBu reversed: blue for low, red for high)

use plotters::style::RGBColor;

/// ColorBrewer RdYlBu, 11 classes, from low to high after reversal
const RDYLBU_R: [[u8; 3]; 11] = [
    [49, 54, 149],
    [69, 117, 180],
    [116, 173, 209],
    [171, 217, 233],
    [224, 243, 248],
    [255, 255, 191],
    [254, 224, 144],
    [253, 174, 97],
    [244, 109, 67],
    [215, 48, 39],
    [165, 0, 38],
];

/// Colour at position t in [0, 1], linearly interpolated between stops
pub fn rdylbu_r(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
    let scaled = t * (RDYLBU_R.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(RDYLBU_R.len() - 1);
    let frac = scaled - lo as f64;

    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let a = RDYLBU_R[lo][c] as f64;
        let b = RDYLBU_R[hi][c] as f64;
        *out = (a + frac * (b - a)).round() as u8;
    }
    RGBColor(rgb[0], rgb[1], rgb[2])
}

/// Colour of `value` on a scale symmetric around zero, [-limit, limit]
pub fn diverging(value: f64, limit: f64) -> RGBColor {
    if !(limit > 0.0) {
        return rdylbu_r(0.5);
    }
    rdylbu_r(0.5 + 0.5 * value / limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_ends_and_centre() {
        assert_eq!(rdylbu_r(0.0), RGBColor(49, 54, 149));
        assert_eq!(rdylbu_r(1.0), RGBColor(165, 0, 38));
        assert_eq!(diverging(0.0, 3.0), RGBColor(255, 255, 191));
        assert_eq!(diverging(10.0, 3.0), rdylbu_r(1.0));
        assert_eq!(diverging(-3.0, 3.0), rdylbu_r(0.0));
    }

    #[test]
    fn test_degenerate_inputs_map_to_centre() {
        assert_eq!(diverging(1.0, 0.0), rdylbu_r(0.5));
        assert_eq!(rdylbu_r(f64::NAN), rdylbu_r(0.5));
    }
}
