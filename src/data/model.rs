use std::fmt;

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{CubeError, CubeResult};
use crate::wcs::CubeWcs;

// ---------------------------------------------------------------------------
// SkyCoord – an ICRS position
// ---------------------------------------------------------------------------

/// A sky position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyCoord {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }
}

impl fmt::Display for SkyCoord {
    /// Sexagesimal, rounded to 1 ms of RA and 0.01″ of Dec.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MS_PER_DAY: i64 = 24 * 3_600_000;
        let ra_ms = ((self.ra_deg / 15.0 * 3_600_000.0).round() as i64).rem_euclid(MS_PER_DAY);
        let h = ra_ms / 3_600_000;
        let m = ra_ms / 60_000 % 60;
        let s = (ra_ms % 60_000) as f64 / 1000.0;

        let sign = if self.dec_deg < 0.0 { '-' } else { '+' };
        let dec_cas = (self.dec_deg.abs() * 360_000.0).round() as i64;
        let d = dec_cas / 360_000;
        let dm = dec_cas / 6_000 % 60;
        let ds = (dec_cas % 6_000) as f64 / 100.0;

        write!(
            f,
            "{h:02}h{m:02}m{s:06.3}s {sign}{d:02}d{dm:02}m{ds:05.2}s"
        )
    }
}

// ---------------------------------------------------------------------------
// SpectralCube – the loaded IFU cube
// ---------------------------------------------------------------------------

/// A 3-D spectral cube with optional per-pixel uncertainties.
#[derive(Debug, Clone)]
pub struct SpectralCube {
    /// Flux indexed `[slice, y, x]`.
    pub flux: Array3<f64>,
    /// 1-σ uncertainty, same shape as `flux`.
    pub error: Option<Array3<f64>>,
    pub wcs: CubeWcs,
    /// FITS `BUNIT`, e.g. `MJy/sr`.
    pub flux_unit: String,
    /// FITS `PIXAR_SR`, when the file provides it.
    pub pixel_area_sr: Option<f64>,
    /// Display name, usually the file name.
    pub name: String,
}

impl SpectralCube {
    /// Assemble a cube, rejecting mismatched error shapes and empty cubes.
    pub fn new(
        flux: Array3<f64>,
        error: Option<Array3<f64>>,
        wcs: CubeWcs,
        flux_unit: impl Into<String>,
        name: impl Into<String>,
    ) -> CubeResult<Self> {
        if flux.len_of(Axis(0)) == 0 {
            return Err(CubeError::EmptyCube);
        }
        if let Some(err) = &error {
            if err.dim() != flux.dim() {
                return Err(CubeError::ShapeMismatch(format!(
                    "flux is {:?} but error is {:?}",
                    flux.dim(),
                    err.dim()
                )));
            }
        }
        Ok(Self {
            flux,
            error,
            wcs,
            flux_unit: flux_unit.into(),
            pixel_area_sr: None,
            name: name.into(),
        })
    }

    pub fn with_pixel_area_sr(mut self, area: Option<f64>) -> Self {
        self.pixel_area_sr = area;
        self
    }

    /// `(n_slices, ny, nx)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        self.flux.dim()
    }

    pub fn n_slices(&self) -> usize {
        self.flux.len_of(Axis(0))
    }

    pub fn slice(&self, k: usize) -> ArrayView2<'_, f64> {
        self.flux.index_axis(Axis(0), k)
    }

    pub fn error_slice(&self, k: usize) -> Option<ArrayView2<'_, f64>> {
        self.error.as_ref().map(|e| e.index_axis(Axis(0), k))
    }

    /// Wavelength of every slice in microns.
    pub fn wavelengths(&self) -> Vec<f64> {
        self.wcs.wavelengths(self.n_slices())
    }

    /// Index of the slice whose wavelength is closest to `wavelength_um`.
    pub fn nearest_slice(&self, wavelength_um: f64) -> usize {
        self.wavelengths()
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - wavelength_um)
                    .abs()
                    .total_cmp(&(*b - wavelength_um).abs())
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Solid angle per pixel: `PIXAR_SR` if present, else from the WCS.
    pub fn effective_pixel_area_sr(&self) -> Option<f64> {
        self.pixel_area_sr.or_else(|| self.wcs.pixel_area_sr())
    }
}

// ---------------------------------------------------------------------------
// Spectrum1D – the extraction result
// ---------------------------------------------------------------------------

/// One extracted spectrum. All per-slice vectors share one length.
#[derive(Debug, Clone, Serialize)]
pub struct Spectrum1D {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    error: Option<Vec<f64>>,
    radius: Vec<f64>,
    area: Vec<f64>,
    pub flux_unit: String,
    pub label: String,
}

impl Spectrum1D {
    pub fn new(
        wavelength: Vec<f64>,
        flux: Vec<f64>,
        error: Option<Vec<f64>>,
        radius: Vec<f64>,
        area: Vec<f64>,
        flux_unit: impl Into<String>,
        label: impl Into<String>,
    ) -> CubeResult<Self> {
        let n = wavelength.len();
        let lengths = [
            ("flux", flux.len()),
            ("error", error.as_ref().map_or(n, Vec::len)),
            ("radius", radius.len()),
            ("area", area.len()),
        ];
        if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != n) {
            return Err(CubeError::ShapeMismatch(format!(
                "{name} has {len} values but wavelength has {n}"
            )));
        }
        Ok(Self {
            wavelength,
            flux,
            error,
            radius,
            area,
            flux_unit: flux_unit.into(),
            label: label.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn error(&self) -> Option<&[f64]> {
        self.error.as_deref()
    }

    pub fn radius(&self) -> &[f64] {
        &self.radius
    }

    pub fn area(&self) -> &[f64] {
        &self.area
    }

    /// Sum of finite flux values, handy for quick summaries.
    pub fn finite_flux_total(&self) -> f64 {
        self.flux.iter().filter(|v| v.is_finite()).sum()
    }
}
