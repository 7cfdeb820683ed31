//! World coordinate system for IFU cubes.
//!
//! Supports the subset of FITS WCS that integral field cubes actually use:
//! a gnomonic (TAN) celestial projection on axes 1 and 2 and a linear
//! spectral axis on axis 3.
//!
//! Pixel coordinates are 0-based with integer values at pixel centres, so
//! FITS pixel `(1, 1)` is `(0.0, 0.0)` here.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::data::model::SkyCoord;
use crate::error::{CubeError, CubeResult};

const DEG: f64 = PI / 180.0;

// ---------------------------------------------------------------------------
// Header access
// ---------------------------------------------------------------------------

/// Read-only access to FITS-style header cards.
pub trait HeaderCards {
    /// Numeric value of `key`, if present and numeric.
    fn real(&self, key: &str) -> Option<f64>;
    /// String value of `key`, if present and textual.
    fn text(&self, key: &str) -> Option<String>;
}

/// A single header card value as stored in JSON cubes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardValue {
    Real(f64),
    Text(String),
}

pub type HeaderMap = BTreeMap<String, CardValue>;

impl HeaderCards for HeaderMap {
    fn real(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            CardValue::Real(v) => Some(*v),
            CardValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            CardValue::Text(s) => Some(s.trim().to_string()),
            CardValue::Real(_) => None,
        }
    }
}

impl HeaderCards for fitrs::Hdu {
    fn real(&self, key: &str) -> Option<f64> {
        match self.value(key)? {
            fitrs::HeaderValue::RealFloatingNumber(v) => Some(*v),
            fitrs::HeaderValue::IntegerNumber(i) => Some(*i as f64),
            fitrs::HeaderValue::CharacterString(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.value(key)? {
            fitrs::HeaderValue::CharacterString(s) => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TAN projection
// ---------------------------------------------------------------------------

/// Forward gnomonic projection of `(ra, dec)` about `(ra0, dec0)`, all radians.
///
/// Returns standard coordinates `(ξ, η)` in radians, or `None` when the point
/// is on or behind the tangent plane.
pub fn tan_project(ra: f64, dec: f64, ra0: f64, dec0: f64) -> Option<(f64, f64)> {
    let da = ra - ra0;
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let cos_da = da.cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }
    let xi = cos_dec * da.sin() / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    Some((xi, eta))
}

/// Inverse gnomonic projection. Inputs and outputs in radians.
pub fn inverse_tan_project(xi: f64, eta: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let rho_sq = xi * xi + eta * eta;
    if rho_sq < 1e-30 {
        return (ra0, dec0);
    }
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let rho = rho_sq.sqrt();
    let c = rho.atan();
    let (sin_c, cos_c) = c.sin_cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = ra0 + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

fn invert_2x2(m: &[[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < 1e-30 || !det.is_finite() {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [m[1][1] * inv, -m[0][1] * inv],
        [-m[1][0] * inv, m[0][0] * inv],
    ])
}

// ---------------------------------------------------------------------------
// Celestial axes
// ---------------------------------------------------------------------------

/// TAN projection on the two spatial axes.
#[derive(Debug, Clone, PartialEq)]
pub struct CelestialWcs {
    /// 1-based reference pixel (FITS convention).
    pub crpix: [f64; 2],
    /// Reference sky position in degrees.
    pub crval: [f64; 2],
    /// Linear transform in degrees per pixel.
    pub cd: [[f64; 2]; 2],
    cd_inv: [[f64; 2]; 2],
}

impl CelestialWcs {
    pub fn new(crpix: [f64; 2], crval: [f64; 2], cd: [[f64; 2]; 2]) -> CubeResult<Self> {
        let cd_inv = invert_2x2(&cd)
            .ok_or_else(|| CubeError::InvalidWcs("singular CD matrix".into()))?;
        Ok(Self {
            crpix,
            crval,
            cd,
            cd_inv,
        })
    }

    fn from_header<H: HeaderCards + ?Sized>(h: &H) -> CubeResult<Option<Self>> {
        let (Some(crval1), Some(crval2)) = (h.real("CRVAL1"), h.real("CRVAL2")) else {
            return Ok(None);
        };
        for key in ["CTYPE1", "CTYPE2"] {
            if let Some(ctype) = h.text(key) {
                if !ctype.ends_with("-TAN") {
                    return Err(CubeError::InvalidWcs(format!(
                        "unsupported projection {key} = '{ctype}'"
                    )));
                }
            }
        }

        let crpix = [
            h.real("CRPIX1").unwrap_or(0.0),
            h.real("CRPIX2").unwrap_or(0.0),
        ];

        let cd = if h.real("CD1_1").is_some() || h.real("CD2_2").is_some() {
            [
                [
                    h.real("CD1_1").unwrap_or(0.0),
                    h.real("CD1_2").unwrap_or(0.0),
                ],
                [
                    h.real("CD2_1").unwrap_or(0.0),
                    h.real("CD2_2").unwrap_or(0.0),
                ],
            ]
        } else {
            let cdelt = [
                h.real("CDELT1").unwrap_or(1.0),
                h.real("CDELT2").unwrap_or(1.0),
            ];
            let pc = [
                [
                    h.real("PC1_1").unwrap_or(1.0),
                    h.real("PC1_2").unwrap_or(0.0),
                ],
                [
                    h.real("PC2_1").unwrap_or(0.0),
                    h.real("PC2_2").unwrap_or(1.0),
                ],
            ];
            [
                [cdelt[0] * pc[0][0], cdelt[0] * pc[0][1]],
                [cdelt[1] * pc[1][0], cdelt[1] * pc[1][1]],
            ]
        };

        Self::new(crpix, [crval1, crval2], cd).map(Some)
    }

    pub fn pixel_to_world(&self, x: f64, y: f64) -> SkyCoord {
        let p1 = x + 1.0 - self.crpix[0];
        let p2 = y + 1.0 - self.crpix[1];
        let xi = self.cd[0][0] * p1 + self.cd[0][1] * p2;
        let eta = self.cd[1][0] * p1 + self.cd[1][1] * p2;

        let (ra, dec) =
            inverse_tan_project(xi * DEG, eta * DEG, self.crval[0] * DEG, self.crval[1] * DEG);
        SkyCoord::new((ra / DEG).rem_euclid(360.0), dec / DEG)
    }

    pub fn world_to_pixel(&self, coord: SkyCoord) -> Option<(f64, f64)> {
        let (xi, eta) = tan_project(
            coord.ra_deg * DEG,
            coord.dec_deg * DEG,
            self.crval[0] * DEG,
            self.crval[1] * DEG,
        )?;
        let (xi, eta) = (xi / DEG, eta / DEG);
        let p1 = self.cd_inv[0][0] * xi + self.cd_inv[0][1] * eta;
        let p2 = self.cd_inv[1][0] * xi + self.cd_inv[1][1] * eta;
        Some((p1 + self.crpix[0] - 1.0, p2 + self.crpix[1] - 1.0))
    }

    /// Geometric-mean pixel scale in arcseconds.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        det.abs().sqrt() * 3600.0
    }

    /// Solid angle of one pixel in steradians.
    pub fn pixel_area_sr(&self) -> f64 {
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        det.abs() * DEG * DEG
    }
}

// ---------------------------------------------------------------------------
// Spectral axis
// ---------------------------------------------------------------------------

/// Linear spectral axis: `λ(k) = crval + cdelt * (k + 1 - crpix)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralAxis {
    pub crpix: f64,
    pub crval: f64,
    pub cdelt: f64,
    /// Multiplier from the header's unit to microns.
    pub to_micron: f64,
}

impl SpectralAxis {
    /// Axis that simply numbers channels 1, 2, 3, ...
    pub fn channels() -> Self {
        Self {
            crpix: 0.0,
            crval: 0.0,
            cdelt: 1.0,
            to_micron: 1.0,
        }
    }

    fn from_header<H: HeaderCards + ?Sized>(h: &H) -> CubeResult<Self> {
        let ctype = h.text("CTYPE3");
        let cunit = h.text("CUNIT3");

        let to_micron = match (cunit.as_deref(), ctype.as_deref()) {
            (Some(unit), _) => unit_to_micron(unit).ok_or_else(|| {
                CubeError::InvalidWcs(format!("unsupported spectral unit '{unit}'"))
            })?,
            (None, Some(ct)) if ct.starts_with("WAVE") || ct.starts_with("AWAV") => 1e6,
            _ => 1.0,
        };

        let cdelt = match h.real("CD3_3") {
            Some(cd) => cd,
            None => h.real("CDELT3").unwrap_or(1.0) * h.real("PC3_3").unwrap_or(1.0),
        };

        Ok(Self {
            crpix: h.real("CRPIX3").unwrap_or(0.0),
            crval: h.real("CRVAL3").unwrap_or(0.0),
            cdelt,
            to_micron,
        })
    }

    /// Wavelength of slice `k` in microns.
    pub fn wavelength(&self, k: usize) -> f64 {
        (self.crval + self.cdelt * (k as f64 + 1.0 - self.crpix)) * self.to_micron
    }
}

fn unit_to_micron(unit: &str) -> Option<f64> {
    match unit.trim() {
        "m" => Some(1e6),
        "um" | "micron" | "microns" | "µm" => Some(1.0),
        "nm" => Some(1e-3),
        "Angstrom" | "angstrom" | "A" | "AA" => Some(1e-4),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Cube WCS
// ---------------------------------------------------------------------------

/// Full WCS of a cube: optional sky projection plus spectral axis.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeWcs {
    pub celestial: Option<CelestialWcs>,
    pub spectral: SpectralAxis,
}

impl Default for CubeWcs {
    fn default() -> Self {
        Self {
            celestial: None,
            spectral: SpectralAxis::channels(),
        }
    }
}

impl CubeWcs {
    /// Parse the WCS from header cards.
    pub fn from_header<H: HeaderCards + ?Sized>(h: &H) -> CubeResult<Self> {
        Ok(Self {
            celestial: CelestialWcs::from_header(h)?,
            spectral: SpectralAxis::from_header(h)?,
        })
    }

    pub fn has_celestial(&self) -> bool {
        self.celestial.is_some()
    }

    fn celestial(&self) -> CubeResult<&CelestialWcs> {
        self.celestial.as_ref().ok_or(CubeError::NoCelestialWcs)
    }

    pub fn pixel_to_world(&self, x: f64, y: f64) -> CubeResult<SkyCoord> {
        Ok(self.celestial()?.pixel_to_world(x, y))
    }

    pub fn world_to_pixel(&self, coord: SkyCoord) -> CubeResult<(f64, f64)> {
        self.celestial()?
            .world_to_pixel(coord)
            .ok_or(CubeError::OutsideProjection)
    }

    pub fn pixel_scale_arcsec(&self) -> CubeResult<f64> {
        Ok(self.celestial()?.pixel_scale_arcsec())
    }

    pub fn pixel_area_sr(&self) -> Option<f64> {
        self.celestial.as_ref().map(CelestialWcs::pixel_area_sr)
    }

    pub fn wavelength(&self, k: usize) -> f64 {
        self.spectral.wavelength(k)
    }

    pub fn wavelengths(&self, n: usize) -> Vec<f64> {
        (0..n).map(|k| self.wavelength(k)).collect()
    }

    /// Header cards describing this WCS, suitable for writing back out.
    pub fn to_header(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(c) = &self.celestial {
            h.insert("CTYPE1".into(), CardValue::Text("RA---TAN".into()));
            h.insert("CTYPE2".into(), CardValue::Text("DEC--TAN".into()));
            h.insert("CRPIX1".into(), CardValue::Real(c.crpix[0]));
            h.insert("CRPIX2".into(), CardValue::Real(c.crpix[1]));
            h.insert("CRVAL1".into(), CardValue::Real(c.crval[0]));
            h.insert("CRVAL2".into(), CardValue::Real(c.crval[1]));
            h.insert("CD1_1".into(), CardValue::Real(c.cd[0][0]));
            h.insert("CD1_2".into(), CardValue::Real(c.cd[0][1]));
            h.insert("CD2_1".into(), CardValue::Real(c.cd[1][0]));
            h.insert("CD2_2".into(), CardValue::Real(c.cd[1][1]));
        }
        let s = &self.spectral;
        h.insert("CTYPE3".into(), CardValue::Text("WAVE".into()));
        h.insert("CUNIT3".into(), CardValue::Text("um".into()));
        h.insert("CRPIX3".into(), CardValue::Real(s.crpix));
        h.insert("CRVAL3".into(), CardValue::Real(s.crval * s.to_micron));
        h.insert("CDELT3".into(), CardValue::Real(s.cdelt * s.to_micron));
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn jwst_like_header() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("CTYPE1".into(), CardValue::Text("RA---TAN".into()));
        h.insert("CTYPE2".into(), CardValue::Text("DEC--TAN".into()));
        h.insert("CTYPE3".into(), CardValue::Text("WAVE".into()));
        h.insert("CUNIT3".into(), CardValue::Text("um".into()));
        h.insert("CRPIX1".into(), CardValue::Real(20.0));
        h.insert("CRPIX2".into(), CardValue::Real(21.0));
        h.insert("CRPIX3".into(), CardValue::Real(1.0));
        h.insert("CRVAL1".into(), CardValue::Real(80.4875));
        h.insert("CRVAL2".into(), CardValue::Real(-69.4986));
        h.insert("CRVAL3".into(), CardValue::Real(2.87));
        h.insert("CDELT1".into(), CardValue::Real(-0.1 / 3600.0));
        h.insert("CDELT2".into(), CardValue::Real(0.1 / 3600.0));
        h.insert("CDELT3".into(), CardValue::Real(0.001));
        h
    }

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = CubeWcs::from_header(&jwst_like_header()).unwrap();
        let sky = wcs.pixel_to_world(19.0, 20.0).unwrap();
        assert_relative_eq!(sky.ra_deg, 80.4875, epsilon = 1e-10);
        assert_relative_eq!(sky.dec_deg, -69.4986, epsilon = 1e-10);
    }

    #[test]
    fn test_pixel_world_pixel_is_stable() {
        let wcs = CubeWcs::from_header(&jwst_like_header()).unwrap();
        for &(x, y) in &[(0.0, 0.0), (5.5, 33.2), (40.0, 2.0)] {
            let sky = wcs.pixel_to_world(x, y).unwrap();
            let (px, py) = wcs.world_to_pixel(sky).unwrap();
            assert_relative_eq!(px, x, epsilon = 1e-7);
            assert_relative_eq!(py, y, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_ra_increases_to_the_left() {
        let wcs = CubeWcs::from_header(&jwst_like_header()).unwrap();
        let left = wcs.pixel_to_world(10.0, 20.0).unwrap();
        let right = wcs.pixel_to_world(30.0, 20.0).unwrap();
        assert!(left.ra_deg > right.ra_deg);
    }

    #[test]
    fn test_pixel_scale_and_area() {
        let wcs = CubeWcs::from_header(&jwst_like_header()).unwrap();
        assert_relative_eq!(wcs.pixel_scale_arcsec().unwrap(), 0.1, epsilon = 1e-12);
        let expected = (0.1 / 3600.0 * DEG).powi(2);
        assert_relative_eq!(wcs.pixel_area_sr().unwrap(), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_spectral_axis_in_microns() {
        let wcs = CubeWcs::from_header(&jwst_like_header()).unwrap();
        assert_relative_eq!(wcs.wavelength(0), 2.87, epsilon = 1e-12);
        assert_relative_eq!(wcs.wavelength(10), 2.88, epsilon = 1e-12);
    }

    #[test]
    fn test_spectral_axis_in_metres_by_default() {
        let mut h = HeaderMap::new();
        h.insert("CTYPE3".into(), CardValue::Text("WAVE".into()));
        h.insert("CRPIX3".into(), CardValue::Real(1.0));
        h.insert("CRVAL3".into(), CardValue::Real(1.5e-6));
        h.insert("CDELT3".into(), CardValue::Real(1.0e-9));
        let wcs = CubeWcs::from_header(&h).unwrap();
        assert_relative_eq!(wcs.wavelength(0), 1.5, epsilon = 1e-12);
        assert_relative_eq!(wcs.wavelength(2), 1.502, epsilon = 1e-12);
        assert!(!wcs.has_celestial());
    }

    #[test]
    fn test_missing_celestial_keywords() {
        let wcs = CubeWcs::from_header(&HeaderMap::new()).unwrap();
        assert_eq!(wcs.pixel_to_world(1.0, 1.0), Err(CubeError::NoCelestialWcs));
        assert_relative_eq!(wcs.wavelength(0), 1.0);
        assert_relative_eq!(wcs.wavelength(4), 5.0);
    }

    #[test]
    fn test_unsupported_projection_rejected() {
        let mut h = jwst_like_header();
        h.insert("CTYPE1".into(), CardValue::Text("RA---SIN".into()));
        assert!(matches!(
            CubeWcs::from_header(&h),
            Err(CubeError::InvalidWcs(_))
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let wcs = CubeWcs::from_header(&jwst_like_header()).unwrap();
        let again = CubeWcs::from_header(&wcs.to_header()).unwrap();
        let a = wcs.pixel_to_world(3.0, 4.0).unwrap();
        let b = again.pixel_to_world(3.0, 4.0).unwrap();
        assert_relative_eq!(a.ra_deg, b.ra_deg, epsilon = 1e-10);
        assert_relative_eq!(a.dec_deg, b.dec_deg, epsilon = 1e-10);
        assert_relative_eq!(again.wavelength(7), wcs.wavelength(7), epsilon = 1e-12);
    }
}
