use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};

use rusty_cube::color::{ColorMapKind, Stretch};
use rusty_cube::config::AppConfig;
use rusty_cube::data::loader::load_cube;
use rusty_cube::data::synthetic::{SyntheticSpec, synthetic_cube};
use rusty_cube::data::writer::export_spectrum;
use rusty_cube::fetch::fetch_file;
use rusty_cube::photometry::{ExtractionParams, extract_spectrum, radius_at};
use rusty_cube::{CubeResult, PixelCircle, Region, SkyCircle, SpectralCube, Spectrum1D};

/// Radius given to a freshly clicked aperture, in pixels.
const DEFAULT_RADIUS_PX: f64 = 3.0;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub config: AppConfig,

    /// Loaded cube (None until the user opens or fetches one).
    pub cube: Option<SpectralCube>,

    /// Bumped on every new cube so views can drop cached textures.
    pub cube_generation: u64,

    /// Slice currently displayed.
    pub current_slice: usize,

    pub stretch: Stretch,
    pub colormap: ColorMapKind,

    /// Aperture as picked by the user. Its radius applies at `reference_slice`.
    pub region: Option<PixelCircle>,

    /// Slice whose wavelength is λ0 for the radius scaling.
    pub reference_slice: usize,

    pub params: ExtractionParams,

    /// Every spectrum extracted from the current cube, oldest first.
    pub history: Vec<Spectrum1D>,

    /// URL typed into the fetch box.
    pub fetch_url: String,

    /// Pending download, polled every frame.
    pub fetch_rx: Option<Receiver<anyhow::Result<PathBuf>>>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,

    /// Whether a file loading operation is in progress.
    pub loading: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            stretch: config.display.stretch,
            colormap: config.display.colormap,
            params: config.extraction.clone(),
            fetch_url: config.fetch.url.clone().unwrap_or_default(),
            config,
            cube: None,
            cube_generation: 0,
            current_slice: 0,
            region: None,
            reference_slice: 0,
            history: Vec::new(),
            fetch_rx: None,
            status_message: None,
            loading: false,
        }
    }

    /// Ingest a newly loaded cube and reset everything tied to the old one.
    pub fn set_cube(&mut self, cube: SpectralCube) {
        let n = cube.n_slices();
        self.current_slice = n / 2;
        self.reference_slice = match self.params.reference_wavelength_um {
            Some(lambda) => cube.nearest_slice(lambda),
            None => 0,
        };
        self.region = None;
        self.history.clear();
        self.cube = Some(cube);
        self.cube_generation += 1;
        self.status_message = None;
        self.loading = false;
    }

    /// Load a cube from disk, reporting failures in the status line.
    pub fn load_path(&mut self, path: &Path) {
        self.loading = true;
        match load_cube(path) {
            Ok(cube) => self.set_cube(cube),
            Err(e) => self.report_error("Failed to load cube", &e),
        }
    }

    /// Replace the cube with the built-in synthetic point source.
    pub fn load_demo(&mut self) {
        match synthetic_cube(&SyntheticSpec::default()) {
            Ok(cube) => self.set_cube(cube),
            Err(e) => self.report_error("Failed to build demo cube", &e),
        }
    }

    pub fn report_error(&mut self, what: &str, e: &dyn std::fmt::Display) {
        log::error!("{what}: {e:#}");
        self.status_message = Some(format!("Error: {e:#}"));
        self.loading = false;
    }

    pub fn n_slices(&self) -> usize {
        self.cube.as_ref().map_or(0, SpectralCube::n_slices)
    }

    pub fn set_slice(&mut self, k: usize) {
        self.current_slice = k.min(self.n_slices().saturating_sub(1));
    }

    pub fn wavelength_of(&self, k: usize) -> Option<f64> {
        self.cube.as_ref().map(|c| c.wcs.wavelength(k))
    }

    /// λ0 used for the radius scaling.
    pub fn reference_wavelength(&self) -> Option<f64> {
        self.wavelength_of(self.reference_slice)
    }

    /// Place the aperture centre. A new aperture is defined on the current
    /// slice unless λ0 is configured; an existing one keeps its radius and
    /// reference slice.
    pub fn select_center(&mut self, x: f64, y: f64) {
        let radius = match self.region {
            Some(c) => c.radius,
            None => {
                if self.params.reference_wavelength_um.is_none() {
                    self.reference_slice = self.current_slice;
                }
                DEFAULT_RADIUS_PX
            }
        };
        if let Ok(c) = PixelCircle::new(x, y, radius) {
            self.region = Some(c);
        }
    }

    /// Set the radius as seen on the current slice; it is stored at λ0.
    pub fn set_radius_on_current_slice(&mut self, radius: f64) {
        let (Some(circle), Some(lambda), Some(lambda0)) = (
            self.region,
            self.wavelength_of(self.current_slice),
            self.reference_wavelength(),
        ) else {
            return;
        };
        let r0 = if self.params.scale_with_wavelength {
            radius * lambda0 / lambda
        } else {
            radius
        };
        if let Ok(c) = circle.with_radius(r0) {
            self.region = Some(c);
        }
    }

    /// Make the current slice λ0, keeping the aperture size on screen.
    pub fn use_current_as_reference(&mut self) {
        let on_screen = self.circle_at_slice(self.current_slice);
        self.reference_slice = self.current_slice;
        if let Some(c) = on_screen {
            self.region = Some(c);
        }
    }

    /// Aperture with its radius scaled to slice `k`.
    pub fn circle_at_slice(&self, k: usize) -> Option<PixelCircle> {
        let circle = self.region?;
        let r = radius_at(
            circle.radius,
            self.wavelength_of(k)?,
            self.reference_wavelength()?,
            self.params.scale_with_wavelength,
        );
        circle.with_radius(r).ok()
    }

    /// The aperture in sky coordinates, when the cube has a celestial WCS.
    pub fn region_on_sky(&self) -> Option<CubeResult<SkyCircle>> {
        let cube = self.cube.as_ref()?;
        Some(self.region?.to_sky(&cube.wcs))
    }

    /// Run the extraction and append the result to the history.
    pub fn extract(&mut self) {
        let Some(cube) = &self.cube else {
            self.status_message = Some("Open a cube first".to_string());
            return;
        };
        let params = ExtractionParams {
            reference_wavelength_um: self.reference_wavelength(),
            ..self.params.clone()
        };
        let region = self.region.map(Region::Pixel);
        match extract_spectrum(cube, region.as_ref(), &params) {
            Ok(spectrum) => {
                self.history.push(spectrum);
                self.status_message = None;
            }
            Err(e) => self.report_error("Extraction failed", &e),
        }
    }

    pub fn latest_spectrum(&self) -> Option<&Spectrum1D> {
        self.history.last()
    }

    pub fn export_latest(&mut self, path: &Path) {
        let Some(spectrum) = self.history.last() else {
            self.status_message = Some("Nothing to export yet".to_string());
            return;
        };
        if let Err(e) = export_spectrum(spectrum, path) {
            self.report_error("Export failed", &e);
        }
    }

    /// Start downloading `fetch_url` on a worker thread.
    pub fn start_fetch(&mut self) {
        let url = self.fetch_url.trim().to_string();
        if url.is_empty() {
            self.status_message = Some("Enter a URL to fetch".to_string());
            return;
        }
        let cfg = self.config.fetch.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(fetch_file(&url, &cfg));
        });
        self.fetch_rx = Some(rx);
        self.loading = true;
        self.status_message = None;
    }

    /// Check on a pending download; loads the cube once it arrives.
    pub fn poll_fetch(&mut self) {
        let Some(rx) = &self.fetch_rx else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(path)) => {
                self.fetch_rx = None;
                self.load_path(&path);
            }
            Ok(Err(e)) => {
                self.fetch_rx = None;
                self.report_error("Download failed", &e);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.fetch_rx = None;
                self.report_error("Download failed", &"worker thread exited");
            }
        }
    }
}
