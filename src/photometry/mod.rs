//! Aperture photometry on cube slices.
//!
//! `overlap` turns a circle into per-pixel weights, `aperture` sums one
//! slice inside those weights, and `extract` repeats that over every slice
//! with a wavelength-scaled radius.

pub mod aperture;
pub mod extract;
pub mod overlap;

pub use aperture::{ApertureSum, aperture_sum, circular_photometry};
pub use extract::{ExtractionParams, extract_spectrum, radius_at};
pub use overlap::{ApertureMask, ApertureMethod};
