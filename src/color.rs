use eframe::egui::Color32;
use ndarray::ArrayView2;
use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Display stretch
// ---------------------------------------------------------------------------

/// How slice values are mapped onto `[0, 1]` for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stretch {
    /// Full range of finite values.
    Linear,
    /// Central `p` percent of finite values, e.g. 99.5.
    Percentile(f64),
}

impl Default for Stretch {
    fn default() -> Self {
        Stretch::Percentile(99.5)
    }
}

impl Stretch {
    /// `(lo, hi)` display limits, ignoring non-finite pixels.
    /// `None` when the slice has no finite values.
    pub fn limits(&self, slice: &ArrayView2<f64>) -> Option<(f64, f64)> {
        let mut values: Vec<f64> = slice.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let (lo, hi) = match *self {
            Stretch::Linear => (values[0], values[values.len() - 1]),
            Stretch::Percentile(p) => {
                let p = p.clamp(0.0, 100.0);
                let tail = (100.0 - p) / 200.0;
                let last = (values.len() - 1) as f64;
                let lo = values[(tail * last).round() as usize];
                let hi = values[((1.0 - tail) * last).round() as usize];
                (lo, hi)
            }
        };
        Some((lo, hi))
    }
}

// ---------------------------------------------------------------------------
// Colour maps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMapKind {
    Gray,
    /// Black → red → yellow → white.
    #[default]
    Heat,
}

impl ColorMapKind {
    pub const ALL: [ColorMapKind; 2] = [ColorMapKind::Gray, ColorMapKind::Heat];

    pub fn name(&self) -> &'static str {
        match self {
            ColorMapKind::Gray => "Gray",
            ColorMapKind::Heat => "Heat",
        }
    }

    /// Colour for a normalised value `t` in `[0, 1]`.
    pub fn rgb(&self, t: f64) -> [u8; 3] {
        let t = t.clamp(0.0, 1.0) as f32;
        match self {
            ColorMapKind::Gray => {
                let v = (t * 255.0).round() as u8;
                [v, v, v]
            }
            ColorMapKind::Heat => {
                let hsl = Hsl::new(60.0 * t, 1.0, 0.95 * t);
                let rgb: Srgb = hsl.into_color();
                [
                    (rgb.red * 255.0).round() as u8,
                    (rgb.green * 255.0).round() as u8,
                    (rgb.blue * 255.0).round() as u8,
                ]
            }
        }
    }
}

/// Render a slice to RGBA bytes, `width * height * 4` long.
///
/// Rows are emitted top to bottom with FITS row 0 last, so the image appears
/// with the origin at the lower left.  Non-finite pixels are transparent.
pub fn slice_to_rgba(slice: &ArrayView2<f64>, stretch: Stretch, cmap: ColorMapKind) -> Vec<u8> {
    let (ny, nx) = slice.dim();
    let (lo, hi) = stretch.limits(slice).unwrap_or((0.0, 1.0));
    let span = if hi > lo { hi - lo } else { 1.0 };

    let mut out = Vec::with_capacity(nx * ny * 4);
    for y in (0..ny).rev() {
        for x in 0..nx {
            let v = slice[[y, x]];
            if v.is_finite() {
                let [r, g, b] = cmap.rgb((v - lo) / span);
                out.extend_from_slice(&[r, g, b, 255]);
            } else {
                out.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }
    out
}
