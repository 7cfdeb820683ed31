/// Data layer: core types, loading, writing, and synthetic cubes.
///
/// Architecture:
/// ```text
///  .fits / .json              synthetic spec
///        │                          │
///        ▼                          ▼
///   ┌──────────┐             ┌───────────┐
///   │  loader   │            │ synthetic  │
///   └──────────┘             └───────────┘
///        │                          │
///        └───────────┬──────────────┘
///                    ▼
///           ┌────────────────┐
///           │ SpectralCube    │  flux / error / WCS
///           └────────────────┘
///                    │  photometry::extract
///                    ▼
///           ┌────────────────┐
///           │ Spectrum1D      │ ──► writer (.csv / .json / .parquet)
///           └────────────────┘
/// ```

pub mod loader;
pub mod model;
pub mod synthetic;
pub mod writer;
