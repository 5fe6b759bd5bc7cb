//! Vertex color normalization.

/// Multiplier applied after min-max normalization; decoded colors come out
/// dark otherwise.
pub const BRIGHTNESS_GAIN: f32 = 3.0;

/// Color assigned to every vertex when all channel values are equal.
pub const UNIFORM_GRAY: u8 = 128;

/// Stack three parallel channels into per-vertex RGB bytes.
///
/// Values are min-max normalized against the global range of all three
/// channels, multiplied by [`BRIGHTNESS_GAIN`], clipped to `[0, 1]` and
/// truncated to `u8`. A zero-width range yields [`UNIFORM_GRAY`]. Non-finite
/// values do not take part in the range and quantize to `0`.
///
/// The slices must have equal length; extra values in longer slices are
/// ignored.
pub fn normalize_vertex_colors(red: &[f32], green: &[f32], blue: &[f32]) -> Vec<[u8; 3]> {
    let (min, max) = red
        .iter()
        .chain(green)
        .chain(blue)
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let range = max - min;
    if !(range.is_finite() && range > 0.0) {
        return red
            .iter()
            .zip(green)
            .zip(blue)
            .map(|_| [UNIFORM_GRAY; 3])
            .collect();
    }

    let quantize = |v: f32| -> u8 {
        if !v.is_finite() {
            return 0;
        }
        let boosted = ((v - min) / range * BRIGHTNESS_GAIN).clamp(0.0, 1.0);
        (boosted * 255.0) as u8
    };

    red.iter()
        .zip(green)
        .zip(blue)
        .map(|((&r, &g), &b)| [quantize(r), quantize(g), quantize(b)])
        .collect()
}
