//! Variable-aperture spectrum extraction.
//!
//! A circular aperture of radius `r0` chosen at reference wavelength `λ0` is
//! applied to every slice with radius `r(λ) = r0 · λ / λ0`, tracking the
//! linear growth of a diffraction-limited PSF.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::aperture::{ApertureSum, aperture_sum};
use super::overlap::{ApertureMask, ApertureMethod};
use crate::data::model::{SpectralCube, Spectrum1D};
use crate::error::{CubeError, CubeResult};
use crate::region::{PixelCircle, Region};

/// Tunables for [`extract_spectrum`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    pub method: ApertureMethod,
    /// `λ0` in microns; `None` uses the first slice.
    pub reference_wavelength_um: Option<f64>,
    /// Scale the radius with wavelength; otherwise keep `r0` on every slice.
    pub scale_with_wavelength: bool,
    /// Skip NaN/inf pixels instead of propagating them.
    pub mask_non_finite: bool,
    /// Convert `MJy/sr` cubes to `Jy` using the pixel solid angle.
    pub convert_to_jy: bool,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            method: ApertureMethod::Exact,
            reference_wavelength_um: None,
            scale_with_wavelength: true,
            mask_non_finite: true,
            convert_to_jy: true,
        }
    }
}

/// Aperture radius at `wavelength` for a radius `r0` defined at `reference`.
pub fn radius_at(r0: f64, wavelength: f64, reference: f64, scale: bool) -> f64 {
    if scale {
        r0 * wavelength / reference
    } else {
        r0
    }
}

/// Multiplier and output unit for the flux conversion, if one applies.
fn unit_conversion(cube: &SpectralCube, params: &ExtractionParams) -> (f64, String) {
    let unit = cube.flux_unit.trim();
    if params.convert_to_jy && unit.eq_ignore_ascii_case("MJy/sr") {
        match cube.effective_pixel_area_sr() {
            Some(area) => return (area * 1e6, "Jy".to_string()),
            None => log::warn!("No pixel solid angle available; leaving flux in {unit}"),
        }
    }
    (1.0, unit.to_string())
}

/// Extract a 1-D spectrum from `cube` inside `region`.
///
/// `region` is `None` when the user has not picked an aperture yet, which is
/// reported as [`CubeError::NoRegion`].
pub fn extract_spectrum(
    cube: &SpectralCube,
    region: Option<&Region>,
    params: &ExtractionParams,
) -> CubeResult<Spectrum1D> {
    let region = region.ok_or(CubeError::NoRegion)?;
    let circle = region.to_pixel(&cube.wcs)?;

    let wavelengths = cube.wavelengths();
    let reference = params
        .reference_wavelength_um
        .unwrap_or_else(|| wavelengths[0]);
    if !(reference.is_finite() && reference > 0.0) {
        return Err(CubeError::InvalidReferenceWavelength(reference));
    }

    let (factor, unit) = unit_conversion(cube, params);
    let (_, ny, nx) = cube.dims();

    let sums: Vec<(f64, ApertureSum)> = wavelengths
        .par_iter()
        .enumerate()
        .map(|(k, &lambda)| {
            let r = radius_at(circle.radius, lambda, reference, params.scale_with_wavelength);
            let scaled = circle.with_radius(r)?;
            let mask = ApertureMask::new(&scaled, params.method, (ny, nx));
            let data = cube.slice(k);
            let error = cube.error_slice(k);
            Ok((
                r,
                aperture_sum(&data, error.as_ref(), &mask, params.mask_non_finite),
            ))
        })
        .collect::<CubeResult<_>>()?;

    let masked: usize = sums.iter().map(|(_, s)| s.masked).sum();
    if masked > 0 {
        log::debug!("Skipped {masked} non-finite pixels across {} slices", sums.len());
    }
    let empty = sums.iter().filter(|(_, s)| s.area == 0.0).count();
    if empty > 0 {
        log::warn!("{empty} slices had no usable pixels inside the aperture");
    }

    let flux = sums.iter().map(|(_, s)| s.sum * factor).collect();
    let error = cube.error.as_ref().map(|_| {
        sums.iter()
            .map(|(_, s)| s.error.unwrap_or(f64::NAN) * factor)
            .collect()
    });
    let radius = sums.iter().map(|(r, _)| *r).collect();
    let area = sums.iter().map(|(_, s)| s.area).collect();

    let label = spectrum_label(&circle, reference, params);
    log::info!("Extracted {} slices: {label}", wavelengths.len());

    Spectrum1D::new(wavelengths, flux, error, radius, area, unit, label)
}

fn spectrum_label(circle: &PixelCircle, reference: f64, params: &ExtractionParams) -> String {
    let scaling = if params.scale_with_wavelength {
        format!(" @ {reference:.4} µm")
    } else {
        " fixed".to_string()
    };
    format!(
        "({:.1}, {:.1}) r={:.2}px{scaling} [{}]",
        circle.x, circle.y, circle.radius, params.method
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{SyntheticSpec, synthetic_cube};
    use crate::region::SkyCircle;
    use crate::wcs::CubeWcs;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn flat_cube() -> SpectralCube {
        let mut header = crate::wcs::HeaderMap::new();
        for (k, v) in [("CRPIX3", 1.0), ("CRVAL3", 2.0), ("CDELT3", 1.0)] {
            header.insert(k.into(), crate::wcs::CardValue::Real(v));
        }
        header.insert("CUNIT3".into(), crate::wcs::CardValue::Text("um".into()));
        let wcs = CubeWcs::from_header(&header).unwrap();
        // wavelengths 2, 3, 4 µm
        SpectralCube::new(
            Array3::from_elem((3, 40, 40), 1.0),
            Some(Array3::from_elem((3, 40, 40), 0.1)),
            wcs,
            "Jy",
            "flat",
        )
        .unwrap()
    }

    #[test]
    fn test_radius_scaling() {
        assert_relative_eq!(radius_at(2.0, 4.0, 2.0, true), 4.0);
        assert_relative_eq!(radius_at(2.0, 4.0, 2.0, false), 2.0);
    }

    #[test]
    fn test_no_region_is_an_error() {
        let err = extract_spectrum(&flat_cube(), None, &ExtractionParams::default()).unwrap_err();
        assert_eq!(err, CubeError::NoRegion);
    }

    #[test]
    fn test_invalid_reference_wavelength() {
        let region = Region::Pixel(PixelCircle::new(20.0, 20.0, 2.0).unwrap());
        let params = ExtractionParams {
            reference_wavelength_um: Some(0.0),
            ..Default::default()
        };
        let err = extract_spectrum(&flat_cube(), Some(&region), &params).unwrap_err();
        assert_eq!(err, CubeError::InvalidReferenceWavelength(0.0));
    }

    #[test]
    fn test_variable_aperture_on_flat_cube() {
        let region = Region::Pixel(PixelCircle::new(20.0, 20.0, 2.0).unwrap());
        let spec = extract_spectrum(&flat_cube(), Some(&region), &ExtractionParams::default())
            .unwrap();

        assert_eq!(spec.len(), 3);
        assert_eq!(spec.flux_unit, "Jy");
        // λ0 = 2 µm, so radii are 2, 3, 4 px.
        for (i, r) in [2.0, 3.0, 4.0].iter().enumerate() {
            let area = std::f64::consts::PI * r * r;
            assert_relative_eq!(spec.radius()[i], *r, epsilon = 1e-12);
            assert_relative_eq!(spec.flux()[i], area, epsilon = 1e-9);
            assert_relative_eq!(spec.error().unwrap()[i], (0.01 * area).sqrt(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fixed_aperture() {
        let region = Region::Pixel(PixelCircle::new(20.0, 20.0, 2.0).unwrap());
        let params = ExtractionParams {
            scale_with_wavelength: false,
            ..Default::default()
        };
        let spec = extract_spectrum(&flat_cube(), Some(&region), &params).unwrap();
        assert!(spec.radius().iter().all(|&r| r == 2.0));
        assert_relative_eq!(spec.flux()[0], spec.flux()[2], epsilon = 1e-12);
    }

    #[test]
    fn test_explicit_reference_wavelength() {
        let region = Region::Pixel(PixelCircle::new(20.0, 20.0, 3.0).unwrap());
        let params = ExtractionParams {
            reference_wavelength_um: Some(3.0),
            ..Default::default()
        };
        let spec = extract_spectrum(&flat_cube(), Some(&region), &params).unwrap();
        assert_relative_eq!(spec.radius()[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(spec.radius()[1], 3.0, epsilon = 1e-12);
        assert_relative_eq!(spec.radius()[2], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_aperture_recovers_constant_fraction_of_point_source() {
        let spec = SyntheticSpec {
            n_slices: 60,
            lambda_step_um: 0.02,
            noise: 0.0,
            ..Default::default()
        };
        let cube = synthetic_cube(&spec).unwrap();
        let r0 = 2.0 * spec.sigma_px;
        let region = Region::Pixel(PixelCircle::new(spec.source_x, spec.source_y, r0).unwrap());

        let out = extract_spectrum(&cube, Some(&region), &ExtractionParams::default()).unwrap();
        assert_eq!(out.flux_unit, "Jy");

        // Encircled energy of a Gaussian within 2σ is 1 - e^-2.
        let fraction = 1.0 - (-2.0_f64).exp();
        for (k, &lambda) in out.wavelength().iter().enumerate() {
            let truth = spec.source_flux_jy(lambda) * fraction;
            assert_relative_eq!(out.flux()[k], truth, max_relative = 0.05);
        }
    }

    #[test]
    fn test_sky_region_matches_pixel_region() {
        let spec = SyntheticSpec {
            n_slices: 5,
            ..Default::default()
        };
        let cube = synthetic_cube(&spec).unwrap();
        let pixel = PixelCircle::new(18.0, 22.0, 3.0).unwrap();
        let sky: SkyCircle = pixel.to_sky(&cube.wcs).unwrap();

        let params = ExtractionParams::default();
        let a = extract_spectrum(&cube, Some(&Region::Pixel(pixel)), &params).unwrap();
        let b = extract_spectrum(&cube, Some(&Region::Sky(sky)), &params).unwrap();
        for k in 0..a.len() {
            assert_relative_eq!(a.flux()[k], b.flux()[k], max_relative = 1e-6);
        }
    }

    #[test]
    fn test_sky_region_on_pixel_only_cube() {
        let region = Region::Sky(
            SkyCircle::new(crate::data::model::SkyCoord::new(10.0, 10.0), 1.0).unwrap(),
        );
        let err = extract_spectrum(&flat_cube(), Some(&region), &ExtractionParams::default())
            .unwrap_err();
        assert_eq!(err, CubeError::NoCelestialWcs);
    }

    #[test]
    fn test_surface_brightness_without_conversion_keeps_unit() {
        let spec = SyntheticSpec {
            n_slices: 2,
            ..Default::default()
        };
        let cube = synthetic_cube(&spec).unwrap();
        let region = Region::Pixel(PixelCircle::new(20.0, 20.0, 2.0).unwrap());
        let params = ExtractionParams {
            convert_to_jy: false,
            ..Default::default()
        };
        let out = extract_spectrum(&cube, Some(&region), &params).unwrap();
        assert_eq!(out.flux_unit, "MJy/sr");
    }
}
