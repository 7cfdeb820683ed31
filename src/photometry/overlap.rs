//! Fractional overlap between a circle and a pixel grid.
//!
//! Pixel `(i, j)` covers `[i - 0.5, i + 0.5] × [j - 0.5, j + 0.5]`, so integer
//! coordinates sit at pixel centres.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::region::PixelCircle;

// ---------------------------------------------------------------------------
// Overlap method
// ---------------------------------------------------------------------------

/// How pixel weights are computed for an aperture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ApertureMethod {
    /// Exact geometric area of the circle inside each pixel.
    Exact,
    /// 1 if the pixel centre lies inside the circle, else 0.
    Center,
    /// Fraction of an `n × n` grid of sub-pixel centres inside the circle.
    Subpixel(u32),
}

impl Default for ApertureMethod {
    fn default() -> Self {
        ApertureMethod::Exact
    }
}

impl fmt::Display for ApertureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApertureMethod::Exact => write!(f, "exact"),
            ApertureMethod::Center => write!(f, "center"),
            ApertureMethod::Subpixel(n) => write!(f, "subpixel:{n}"),
        }
    }
}

impl FromStr for ApertureMethod {
    type Err = String;

    /// Accepts `exact`, `center`, `subpixel` (5×5) and `subpixel:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "exact" => Ok(ApertureMethod::Exact),
            "center" | "centre" => Ok(ApertureMethod::Center),
            "subpixel" => Ok(ApertureMethod::Subpixel(5)),
            other => {
                let n = other
                    .strip_prefix("subpixel:")
                    .ok_or_else(|| format!("unknown aperture method '{other}'"))?;
                match n.parse::<u32>() {
                    Ok(n) if n > 0 => Ok(ApertureMethod::Subpixel(n)),
                    _ => Err(format!("invalid subpixel count '{n}'")),
                }
            }
        }
    }
}

impl TryFrom<String> for ApertureMethod {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ApertureMethod> for String {
    fn from(m: ApertureMethod) -> Self {
        m.to_string()
    }
}

// ---------------------------------------------------------------------------
// Exact circle / rectangle overlap
// ---------------------------------------------------------------------------

fn area_arc(x1: f64, y1: f64, x2: f64, y2: f64, r: f64) -> f64 {
    let chord = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
    let theta = 2.0 * (0.5 * chord / r).min(1.0).asin();
    0.5 * r * r * (theta - theta.sin())
}

fn area_triangle(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> f64 {
    0.5 * (x1 * (y2 - y3) + x2 * (y3 - y1) + x3 * (y1 - y2)).abs()
}

/// Overlap of a circle at the origin with a rectangle lying entirely in the
/// first quadrant (`xmin >= 0`, `ymin >= 0`).
fn overlap_first_quadrant(xmin: f64, ymin: f64, xmax: f64, ymax: f64, r: f64) -> f64 {
    let r2 = r * r;
    if xmin * xmin + ymin * ymin >= r2 {
        return 0.0;
    }
    if xmax * xmax + ymax * ymax <= r2 {
        return (xmax - xmin) * (ymax - ymin);
    }

    // Which of the two remaining corners are inside the circle.
    let lower_right_in = xmax * xmax + ymin * ymin < r2;
    let upper_left_in = xmin * xmin + ymax * ymax < r2;

    match (lower_right_in, upper_left_in) {
        (true, true) => {
            // Only the far corner is cut off.
            let (x1, y1) = ((r2 - ymax * ymax).sqrt(), ymax);
            let (x2, y2) = (xmax, (r2 - xmax * xmax).sqrt());
            (xmax - xmin) * (ymax - ymin) - area_triangle(x1, y1, x2, y2, xmax, ymax)
                + area_arc(x1, y1, x2, y2, r)
        }
        (true, false) => {
            // Circle crosses the left and right edges.
            let (x1, y1) = (xmin, (r2 - xmin * xmin).sqrt());
            let (x2, y2) = (xmax, (r2 - xmax * xmax).sqrt());
            area_arc(x1, y1, x2, y2, r)
                + area_triangle(x1, y1, x1, ymin, xmax, ymin)
                + area_triangle(x1, y1, x2, ymin, x2, y2)
        }
        (false, true) => {
            // Circle crosses the bottom and top edges.
            let (x1, y1) = ((r2 - ymin * ymin).sqrt(), ymin);
            let (x2, y2) = ((r2 - ymax * ymax).sqrt(), ymax);
            area_arc(x1, y1, x2, y2, r)
                + area_triangle(x1, y1, xmin, y1, xmin, ymax)
                + area_triangle(x1, y1, xmin, y2, x2, y2)
        }
        (false, false) => {
            // Only the near corner is inside.
            let (x1, y1) = ((r2 - ymin * ymin).sqrt(), ymin);
            let (x2, y2) = (xmin, (r2 - xmin * xmin).sqrt());
            area_arc(x1, y1, x2, y2, r) + area_triangle(x1, y1, x2, y2, xmin, ymin)
        }
    }
}

/// Area of the intersection between a circle of radius `r` at the origin and
/// the axis-aligned rectangle `[xmin, xmax] × [ymin, ymax]`.
///
/// Rectangles straddling an axis are split so every piece lies in one
/// quadrant, then mirrored into the first.
pub fn circle_rect_overlap(xmin: f64, ymin: f64, xmax: f64, ymax: f64, r: f64) -> f64 {
    if xmin < 0.0 && xmax > 0.0 {
        return circle_rect_overlap(xmin, ymin, 0.0, ymax, r)
            + circle_rect_overlap(0.0, ymin, xmax, ymax, r);
    }
    if ymin < 0.0 && ymax > 0.0 {
        return circle_rect_overlap(xmin, ymin, xmax, 0.0, r)
            + circle_rect_overlap(xmin, 0.0, xmax, ymax, r);
    }
    let (xmin, xmax) = if xmax <= 0.0 { (-xmax, -xmin) } else { (xmin, xmax) };
    let (ymin, ymax) = if ymax <= 0.0 { (-ymax, -ymin) } else { (ymin, ymax) };
    overlap_first_quadrant(xmin, ymin, xmax, ymax, r)
}

// ---------------------------------------------------------------------------
// Aperture mask
// ---------------------------------------------------------------------------

/// Per-pixel weights of a circular aperture, clipped to an image.
#[derive(Debug, Clone)]
pub struct ApertureMask {
    /// First column and row covered by `weights`.
    pub x0: usize,
    pub y0: usize,
    /// Weights indexed `[y - y0, x - x0]`.
    pub weights: Array2<f64>,
}

impl ApertureMask {
    /// Build the mask of `circle` on an image of `(ny, nx)` pixels.
    ///
    /// Only in-bounds pixels are represented, so an aperture hanging over the
    /// edge contributes only the area that lands on the image.
    pub fn new(circle: &PixelCircle, method: ApertureMethod, (ny, nx): (usize, usize)) -> Self {
        let r = circle.radius;
        let lo = |c: f64| (c - r - 0.5).ceil().max(0.0);
        let hi = |c: f64, n: usize| (c + r + 0.5).floor().min(n as f64 - 1.0);

        let (x_lo, x_hi) = (lo(circle.x), hi(circle.x, nx));
        let (y_lo, y_hi) = (lo(circle.y), hi(circle.y, ny));
        if nx == 0 || ny == 0 || !(x_lo <= x_hi && y_lo <= y_hi) {
            return Self::empty();
        }

        let (x0, y0) = (x_lo as usize, y_lo as usize);
        let width = x_hi as usize - x0 + 1;
        let height = y_hi as usize - y0 + 1;

        let weights = Array2::from_shape_fn((height, width), |(row, col)| {
            let dx = (x0 + col) as f64 - circle.x;
            let dy = (y0 + row) as f64 - circle.y;
            pixel_weight(dx, dy, r, method)
        });

        Self { x0, y0, weights }
    }

    pub fn empty() -> Self {
        Self {
            x0: 0,
            y0: 0,
            weights: Array2::zeros((0, 0)),
        }
    }

    /// Total weight, i.e. the aperture area in pixels that lands on the image.
    pub fn area(&self) -> f64 {
        self.weights.sum()
    }

    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    /// Iterate `(y, x, weight)` over pixels with non-zero weight.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.weights
            .indexed_iter()
            .filter(|(_, w)| **w > 0.0)
            .map(move |((row, col), w)| (self.y0 + row, self.x0 + col, *w))
    }
}

/// Weight of the pixel whose centre is `(dx, dy)` from the circle centre.
fn pixel_weight(dx: f64, dy: f64, r: f64, method: ApertureMethod) -> f64 {
    match method {
        ApertureMethod::Exact => circle_rect_overlap(dx - 0.5, dy - 0.5, dx + 0.5, dy + 0.5, r),
        ApertureMethod::Center => {
            if dx * dx + dy * dy < r * r {
                1.0
            } else {
                0.0
            }
        }
        ApertureMethod::Subpixel(n) => {
            let n = n.max(1);
            let step = 1.0 / n as f64;
            let mut inside = 0u32;
            for sy in 0..n {
                let y = dy - 0.5 + (sy as f64 + 0.5) * step;
                for sx in 0..n {
                    let x = dx - 0.5 + (sx as f64 + 0.5) * step;
                    if x * x + y * y < r * r {
                        inside += 1;
                    }
                }
            }
            inside as f64 / (n * n) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn circle(x: f64, y: f64, r: f64) -> PixelCircle {
        PixelCircle::new(x, y, r).unwrap()
    }

    #[test]
    fn test_rect_inside_circle() {
        assert_relative_eq!(circle_rect_overlap(-0.5, -0.5, 0.5, 0.5, 5.0), 1.0);
        assert_relative_eq!(circle_rect_overlap(2.0, 2.0, 3.0, 3.0, 5.0), 1.0);
    }

    #[test]
    fn test_rect_outside_circle() {
        assert_eq!(circle_rect_overlap(4.0, 4.0, 5.0, 5.0, 5.0), 0.0);
        assert_eq!(circle_rect_overlap(-9.0, -9.0, -8.0, -8.0, 5.0), 0.0);
    }

    #[test]
    fn test_small_circle_inside_one_pixel() {
        let area = circle_rect_overlap(-0.5, -0.5, 0.5, 0.5, 0.3);
        assert_relative_eq!(area, PI * 0.09, epsilon = 1e-12);
    }

    #[test]
    fn test_half_plane_split() {
        // Rectangle covering the upper half of a radius-1 circle.
        let area = circle_rect_overlap(-2.0, 0.0, 2.0, 2.0, 1.0);
        assert_relative_eq!(area, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_exact_weights_sum_to_circle_area() {
        for &(cx, cy, r) in &[(10.0, 10.0, 3.0), (10.3, 9.7, 2.5), (12.49, 11.51, 4.2)] {
            let mask = ApertureMask::new(&circle(cx, cy, r), ApertureMethod::Exact, (30, 30));
            assert_relative_eq!(mask.area(), PI * r * r, epsilon = 1e-9);
            assert!(mask.weights.iter().all(|&w| (0.0..=1.0 + 1e-12).contains(&w)));
        }
    }

    #[test]
    fn test_subpixel_converges_to_exact() {
        let c = circle(7.2, 6.9, 3.3);
        let exact = ApertureMask::new(&c, ApertureMethod::Exact, (20, 20)).area();
        let sub = ApertureMask::new(&c, ApertureMethod::Subpixel(32), (20, 20)).area();
        assert_relative_eq!(sub, exact, max_relative = 1e-2);
    }

    #[test]
    fn test_center_method_counts_whole_pixels() {
        let mask = ApertureMask::new(&circle(5.0, 5.0, 1.5), ApertureMethod::Center, (11, 11));
        // Centre pixel, 4 edge neighbours and 4 diagonals (distance √2 < 1.5).
        assert_relative_eq!(mask.area(), 9.0);
    }

    #[test]
    fn test_mask_is_clipped_at_edges() {
        let r = 2.0;
        let mask = ApertureMask::new(&circle(0.0, 0.0, r), ApertureMethod::Exact, (10, 10));
        assert_eq!((mask.x0, mask.y0), (0, 0));
        let quarter = PI * r * r / 4.0;
        assert!(mask.area() > quarter);
        assert!(mask.area() < PI * r * r);
    }

    #[test]
    fn test_mask_fully_off_image_is_empty() {
        let mask = ApertureMask::new(&circle(-10.0, 4.0, 2.0), ApertureMethod::Exact, (10, 10));
        assert!(mask.is_empty());
        assert_eq!(mask.iter().count(), 0);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("exact".parse::<ApertureMethod>(), Ok(ApertureMethod::Exact));
        assert_eq!("Center".parse::<ApertureMethod>(), Ok(ApertureMethod::Center));
        assert_eq!(
            "subpixel".parse::<ApertureMethod>(),
            Ok(ApertureMethod::Subpixel(5))
        );
        assert_eq!(
            "subpixel:10".parse::<ApertureMethod>(),
            Ok(ApertureMethod::Subpixel(10))
        );
        assert!("subpixel:0".parse::<ApertureMethod>().is_err());
        assert!("fuzzy".parse::<ApertureMethod>().is_err());
        assert_eq!(ApertureMethod::Subpixel(3).to_string(), "subpixel:3");
    }
}
