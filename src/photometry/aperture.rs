use ndarray::ArrayView2;

use super::overlap::{ApertureMask, ApertureMethod};
use crate::region::PixelCircle;

/// Result of summing one image inside one aperture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApertureSum {
    /// `Σ w·f` over used pixels.
    pub sum: f64,
    /// `sqrt(Σ w·σ²)`, when an error image was supplied.
    pub error: Option<f64>,
    /// `Σ w` over used pixels.
    pub area: f64,
    /// Overlapping pixels skipped because flux or error was not finite.
    pub masked: usize,
}

/// Sum `data` (and propagate `error`) inside `mask`.
///
/// With `mask_non_finite` set, pixels whose flux or error is NaN/inf are
/// skipped and counted in [`ApertureSum::masked`]; otherwise they propagate
/// into the result.  An aperture with no usable overlap yields NaN.
pub fn aperture_sum(
    data: &ArrayView2<f64>,
    error: Option<&ArrayView2<f64>>,
    mask: &ApertureMask,
    mask_non_finite: bool,
) -> ApertureSum {
    let mut sum = 0.0;
    let mut variance = 0.0;
    let mut area = 0.0;
    let mut masked = 0;

    for (y, x, w) in mask.iter() {
        let f = data[[y, x]];
        let sigma = error.map(|e| e[[y, x]]);
        if mask_non_finite && (!f.is_finite() || sigma.is_some_and(|s| !s.is_finite())) {
            masked += 1;
            continue;
        }
        sum += w * f;
        if let Some(s) = sigma {
            variance += w * s * s;
        }
        area += w;
    }

    if area <= 0.0 {
        return ApertureSum {
            sum: f64::NAN,
            error: error.map(|_| f64::NAN),
            area: 0.0,
            masked,
        };
    }

    ApertureSum {
        sum,
        error: error.map(|_| variance.sqrt()),
        area,
        masked,
    }
}

/// One-shot photometry of a single image in a pixel circle.
pub fn circular_photometry(
    data: &ArrayView2<f64>,
    error: Option<&ArrayView2<f64>>,
    circle: &PixelCircle,
    method: ApertureMethod,
    mask_non_finite: bool,
) -> ApertureSum {
    let mask = ApertureMask::new(circle, method, data.dim());
    aperture_sum(data, error, &mask, mask_non_finite)
}
