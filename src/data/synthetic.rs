use ndarray::Array3;

use super::model::SpectralCube;
use crate::error::CubeResult;
use crate::wcs::{CelestialWcs, CubeWcs, SpectralAxis};

// ---------------------------------------------------------------------------
// Synthetic IFU cube
// ---------------------------------------------------------------------------

/// Parameters of a synthetic point-source cube.
///
/// The source is a circular Gaussian whose width grows linearly with
/// wavelength, as for a diffraction-limited telescope.
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub nx: usize,
    pub ny: usize,
    pub n_slices: usize,
    pub lambda_start_um: f64,
    pub lambda_step_um: f64,
    /// Source position in 0-based pixels.
    pub source_x: f64,
    pub source_y: f64,
    /// Gaussian σ in pixels at `lambda_start_um`.
    pub sigma_px: f64,
    /// Continuum flux density in Jy.
    pub continuum_jy: f64,
    pub line_center_um: f64,
    pub line_sigma_um: f64,
    pub line_peak_jy: f64,
    /// Per-pixel noise σ in MJy/sr; zero disables noise.
    pub noise: f64,
    /// Width of the NaN frame around the field, in pixels.
    pub nan_border: usize,
    pub pixel_scale_arcsec: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            nx: 41,
            ny: 41,
            n_slices: 200,
            lambda_start_um: 2.87,
            lambda_step_um: 0.001,
            source_x: 20.3,
            source_y: 19.6,
            sigma_px: 1.2,
            continuum_jy: 0.01,
            line_center_um: 2.95,
            line_sigma_um: 0.004,
            line_peak_jy: 0.02,
            noise: 0.5,
            nan_border: 1,
            pixel_scale_arcsec: 0.1,
            seed: 42,
        }
    }
}

impl SyntheticSpec {
    pub fn wavelength(&self, k: usize) -> f64 {
        self.lambda_start_um + self.lambda_step_um * k as f64
    }

    /// True source flux density at `wavelength_um`, in Jy.
    pub fn source_flux_jy(&self, wavelength_um: f64) -> f64 {
        self.continuum_jy + gaussian(wavelength_um, self.line_center_um, self.line_sigma_um, self.line_peak_jy)
    }

    fn wcs(&self) -> CubeResult<CubeWcs> {
        let scale_deg = self.pixel_scale_arcsec / 3600.0;
        let celestial = CelestialWcs::new(
            [(self.nx as f64 + 1.0) / 2.0, (self.ny as f64 + 1.0) / 2.0],
            [80.4875, -69.4986],
            [[-scale_deg, 0.0], [0.0, scale_deg]],
        )?;
        Ok(CubeWcs {
            celestial: Some(celestial),
            spectral: SpectralAxis {
                crpix: 1.0,
                crval: self.lambda_start_um,
                cdelt: self.lambda_step_um,
                to_micron: 1.0,
            },
        })
    }
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Build a deterministic cube in `MJy/sr` with a matching error cube.
pub fn synthetic_cube(spec: &SyntheticSpec) -> CubeResult<SpectralCube> {
    let wcs = spec.wcs()?;
    let pixar_sr = (spec.pixel_scale_arcsec / 3600.0_f64).to_radians().powi(2);
    let mut rng = SimpleRng::new(spec.seed);

    let shape = (spec.n_slices, spec.ny, spec.nx);
    let mut flux = Array3::<f64>::zeros(shape);
    let mut error = Array3::<f64>::from_elem(shape, spec.noise.max(f64::MIN_POSITIVE));

    for k in 0..spec.n_slices {
        let lambda = spec.wavelength(k);
        let sigma = spec.sigma_px * lambda / spec.lambda_start_um;
        let norm = 1.0 / (2.0 * std::f64::consts::PI * sigma * sigma);
        // Jy spread over the PSF, expressed per steradian then in MJy.
        let peak = spec.source_flux_jy(lambda) * norm / pixar_sr / 1e6;

        for y in 0..spec.ny {
            for x in 0..spec.nx {
                let r2 = (x as f64 - spec.source_x).powi(2) + (y as f64 - spec.source_y).powi(2);
                let signal = peak * (-r2 / (2.0 * sigma * sigma)).exp();
                let noise = if spec.noise > 0.0 {
                    rng.gauss(0.0, spec.noise)
                } else {
                    0.0
                };
                let border = x < spec.nan_border
                    || y < spec.nan_border
                    || x + spec.nan_border >= spec.nx
                    || y + spec.nan_border >= spec.ny;
                if border {
                    flux[[k, y, x]] = f64::NAN;
                    error[[k, y, x]] = f64::NAN;
                } else {
                    flux[[k, y, x]] = signal + noise;
                }
            }
        }
    }

    Ok(
        SpectralCube::new(flux, Some(error), wcs, "MJy/sr", "synthetic point source")?
            .with_pixel_area_sr(Some(pixar_sr)),
    )
}

// ---------------------------------------------------------------------------
// Deterministic PRNG
// ---------------------------------------------------------------------------

/// Minimal deterministic PRNG (xoshiro256**)
pub struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    pub fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}
