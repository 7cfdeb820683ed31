//! Variable-aperture spectrum extraction from IFU spectral cubes.
//!
//! Load a cube ([`data::loader`]), pick a circular region in pixel or sky
//! coordinates ([`region`], [`wcs`]), and extract a 1-D spectrum whose
//! aperture radius scales linearly with wavelength ([`photometry`]).

pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod photometry;
pub mod region;
pub mod wcs;

pub use data::model::{SkyCoord, SpectralCube, Spectrum1D};
pub use error::{CubeError, CubeResult};
pub use region::{PixelCircle, Region, SkyCircle};
