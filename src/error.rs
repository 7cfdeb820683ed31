use thiserror::Error;

// ---------------------------------------------------------------------------
// Library error type
// ---------------------------------------------------------------------------

/// Errors raised by the coordinate, region and photometry layers.
///
/// File and network edges use `anyhow` with context instead; these variants
/// are the ones callers are expected to match on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CubeError {
    #[error("no region selected")]
    NoRegion,

    #[error("aperture radius must be finite and positive, got {0}")]
    InvalidRadius(f64),

    #[error("reference wavelength must be finite and positive, got {0}")]
    InvalidReferenceWavelength(f64),

    #[error("cube has no celestial WCS; sky coordinates are unavailable")]
    NoCelestialWcs,

    #[error("sky position lies behind the tangent plane of the cube")]
    OutsideProjection,

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid WCS: {0}")]
    InvalidWcs(String),

    #[error("cube has no spectral slices")]
    EmptyCube,
}

pub type CubeResult<T> = std::result::Result<T, CubeError>;
