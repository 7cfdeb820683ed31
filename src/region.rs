//! Circular aperture regions in pixel or sky coordinates.

use serde::{Deserialize, Serialize};

use crate::data::model::SkyCoord;
use crate::error::{CubeError, CubeResult};
use crate::wcs::CubeWcs;

fn check_radius(r: f64) -> CubeResult<f64> {
    if r.is_finite() && r > 0.0 {
        Ok(r)
    } else {
        Err(CubeError::InvalidRadius(r))
    }
}

/// A circle in 0-based pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCircle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl PixelCircle {
    pub fn new(x: f64, y: f64, radius: f64) -> CubeResult<Self> {
        Ok(Self {
            x,
            y,
            radius: check_radius(radius)?,
        })
    }

    /// Same centre, different radius.
    pub fn with_radius(&self, radius: f64) -> CubeResult<Self> {
        Self::new(self.x, self.y, radius)
    }

    pub fn to_sky(&self, wcs: &CubeWcs) -> CubeResult<SkyCircle> {
        let center = wcs.pixel_to_world(self.x, self.y)?;
        let radius_arcsec = self.radius * wcs.pixel_scale_arcsec()?;
        SkyCircle::new(center, radius_arcsec)
    }
}

/// A circle on the sky; radius in arcseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCircle {
    pub center: SkyCoord,
    pub radius_arcsec: f64,
}

impl SkyCircle {
    pub fn new(center: SkyCoord, radius_arcsec: f64) -> CubeResult<Self> {
        Ok(Self {
            center,
            radius_arcsec: check_radius(radius_arcsec)?,
        })
    }

    pub fn to_pixel(&self, wcs: &CubeWcs) -> CubeResult<PixelCircle> {
        let (x, y) = wcs.world_to_pixel(self.center)?;
        PixelCircle::new(x, y, self.radius_arcsec / wcs.pixel_scale_arcsec()?)
    }
}

/// A region as chosen by the user, in whichever frame they chose it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum Region {
    Pixel(PixelCircle),
    Sky(SkyCircle),
}

impl Region {
    pub fn to_pixel(&self, wcs: &CubeWcs) -> CubeResult<PixelCircle> {
        match self {
            Region::Pixel(c) => Ok(*c),
            Region::Sky(c) => c.to_pixel(wcs),
        }
    }

    pub fn to_sky(&self, wcs: &CubeWcs) -> CubeResult<SkyCircle> {
        match self {
            Region::Pixel(c) => c.to_sky(wcs),
            Region::Sky(c) => Ok(*c),
        }
    }
}

impl From<PixelCircle> for Region {
    fn from(c: PixelCircle) -> Self {
        Region::Pixel(c)
    }
}

impl From<SkyCircle> for Region {
    fn from(c: SkyCircle) -> Self {
        Region::Sky(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wcs::{CelestialWcs, SpectralAxis};
    use approx::assert_relative_eq;

    fn wcs() -> CubeWcs {
        let s = 0.13 / 3600.0;
        CubeWcs {
            celestial: Some(
                CelestialWcs::new([25.0, 25.0], [150.1, 2.2], [[-s, 0.0], [0.0, s]]).unwrap(),
            ),
            spectral: SpectralAxis::channels(),
        }
    }

    #[test]
    fn test_invalid_radius() {
        assert_eq!(
            PixelCircle::new(1.0, 1.0, 0.0),
            Err(CubeError::InvalidRadius(0.0))
        );
        assert!(PixelCircle::new(1.0, 1.0, -2.0).is_err());
        assert!(PixelCircle::new(1.0, 1.0, f64::NAN).is_err());
        assert!(SkyCircle::new(SkyCoord::new(0.0, 0.0), f64::INFINITY).is_err());
    }

    #[test]
    fn test_pixel_sky_pixel() {
        let wcs = wcs();
        let circle = PixelCircle::new(30.25, 18.5, 4.0).unwrap();
        let sky = circle.to_sky(&wcs).unwrap();
        assert_relative_eq!(sky.radius_arcsec, 0.52, epsilon = 1e-9);

        let back = sky.to_pixel(&wcs).unwrap();
        assert_relative_eq!(back.x, circle.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, circle.y, epsilon = 1e-6);
        assert_relative_eq!(back.radius, circle.radius, epsilon = 1e-9);
    }

    #[test]
    fn test_sky_region_requires_celestial_wcs() {
        let region = Region::Sky(SkyCircle::new(SkyCoord::new(150.1, 2.2), 1.0).unwrap());
        assert_eq!(
            region.to_pixel(&CubeWcs::default()),
            Err(CubeError::NoCelestialWcs)
        );
        let pixel = Region::Pixel(PixelCircle::new(1.0, 2.0, 3.0).unwrap());
        assert_eq!(
            pixel.to_pixel(&CubeWcs::default()).unwrap(),
            PixelCircle::new(1.0, 2.0, 3.0).unwrap()
        );
    }

    #[test]
    fn test_region_serde_tagging() {
        let region: Region = PixelCircle::new(1.0, 2.0, 3.0).unwrap().into();
        let json = serde_json::to_string(&region).unwrap();
        assert!(json.contains(r#""frame":"pixel""#), "{json}");
        let back: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(back, region);
    }
}
