use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::{Rgba, RgbaImage, imageops};

use rusty_cube::color::slice_to_rgba;
use rusty_cube::config::{AppConfig, DisplayConfig};
use rusty_cube::data::loader::load_cube;
use rusty_cube::data::writer::export_spectrum;
use rusty_cube::fetch::fetch_file;
use rusty_cube::photometry::{ApertureMethod, ExtractionParams, extract_spectrum, radius_at};
use rusty_cube::{PixelCircle, Region, SkyCircle, SkyCoord, SpectralCube, Spectrum1D};

/// Extract a variable-aperture spectrum from an IFU cube without the viewer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Cube to read (.fits or .json)
    #[arg(long, conflicts_with = "fetch_url")]
    cube: Option<PathBuf>,

    /// Download the cube from this URL (cached) instead of reading --cube
    #[arg(long)]
    fetch_url: Option<String>,

    /// Aperture centre x, 0-based pixels
    #[arg(long, requires_all = ["y", "radius"], conflicts_with_all = ["ra", "dec"])]
    x: Option<f64>,

    /// Aperture centre y, 0-based pixels
    #[arg(long, requires = "x")]
    y: Option<f64>,

    /// Aperture radius at the reference wavelength, pixels
    #[arg(long, requires = "x")]
    radius: Option<f64>,

    /// Aperture centre right ascension, degrees
    #[arg(long, requires_all = ["dec", "radius_arcsec"])]
    ra: Option<f64>,

    /// Aperture centre declination, degrees
    #[arg(long, requires = "ra")]
    dec: Option<f64>,

    /// Aperture radius at the reference wavelength, arcseconds
    #[arg(long, requires = "ra")]
    radius_arcsec: Option<f64>,

    /// exact, center, subpixel or subpixel:N
    #[arg(long)]
    method: Option<ApertureMethod>,

    /// Sub-pixel grid size, implies --method subpixel
    #[arg(long)]
    subpixels: Option<u32>,

    /// Wavelength (µm) at which the radius is given; defaults to the first slice
    #[arg(long)]
    reference_wavelength: Option<f64>,

    /// Keep the radius fixed instead of scaling it with wavelength
    #[arg(long)]
    no_scale: bool,

    /// Leave MJy/sr cubes in surface brightness units
    #[arg(long)]
    no_jy: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the spectrum here (.csv, .json or .parquet)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a PNG of the reference slice with the aperture overlaid
    #[arg(long)]
    preview: Option<PathBuf>,
}

impl Args {
    fn region(&self) -> Result<Option<Region>> {
        if let (Some(x), Some(y), Some(r)) = (self.x, self.y, self.radius) {
            return Ok(Some(Region::Pixel(PixelCircle::new(x, y, r)?)));
        }
        if let (Some(ra), Some(dec), Some(r)) = (self.ra, self.dec, self.radius_arcsec) {
            let center = SkyCoord::new(ra, dec);
            return Ok(Some(Region::Sky(SkyCircle::new(center, r)?)));
        }
        Ok(None)
    }

    /// Configuration file values with command-line overrides applied.
    fn params(&self, config: &AppConfig) -> ExtractionParams {
        let mut params = config.extraction.clone();
        if let Some(method) = self.method {
            params.method = method;
        }
        if let Some(n) = self.subpixels {
            params.method = ApertureMethod::Subpixel(n.max(1));
        }
        if self.reference_wavelength.is_some() {
            params.reference_wavelength_um = self.reference_wavelength;
        }
        if self.no_scale {
            params.scale_with_wavelength = false;
        }
        if self.no_jy {
            params.convert_to_jy = false;
        }
        params
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = AppConfig::load_or_default(args.config.as_deref())?;
    let params = args.params(&config);

    let path = match (&args.cube, &args.fetch_url) {
        (Some(path), _) => path.clone(),
        (None, Some(url)) => fetch_file(url, &config.fetch)?,
        (None, None) => match &config.fetch.url {
            Some(url) => fetch_file(url, &config.fetch)?,
            None => bail!("no cube given: pass --cube or --fetch-url"),
        },
    };
    let cube = load_cube(&path)?;
    let (n, ny, nx) = cube.dims();
    println!("Cube {}: {nx}×{ny} spaxels, {n} slices, unit {}", cube.name, cube.flux_unit);

    let region = args.region()?;
    if let Some(region) = &region {
        match region.to_sky(&cube.wcs) {
            Ok(sky) => println!("Region: {} r={:.3}″", sky.center, sky.radius_arcsec),
            Err(e) => log::warn!("Region has no sky equivalent: {e}"),
        }
    }
    let spectrum = extract_spectrum(&cube, region.as_ref(), &params)?;
    print_summary(&spectrum);

    if let Some(output) = &args.output {
        export_spectrum(&spectrum, output)?;
        println!("Wrote {}", output.display());
    }

    if let (Some(preview), Some(region)) = (&args.preview, &region) {
        let circle = region.to_pixel(&cube.wcs)?;
        write_preview(&cube, &circle, &params, &config.display, preview)?;
        println!("Wrote {}", preview.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Print about twenty evenly spaced rows plus totals.
fn print_summary(spectrum: &Spectrum1D) {
    println!("{}", spectrum.label);
    println!(
        "{:>12}  {:>8}  {:>8}  {:>14}  {:>14}",
        "lambda_um", "radius", "area", "flux", "error"
    );
    let step = (spectrum.len() / 20).max(1);
    for k in (0..spectrum.len()).step_by(step) {
        let err = spectrum.error().map_or(f64::NAN, |e| e[k]);
        println!(
            "{:>12.5}  {:>8.3}  {:>8.3}  {:>14.6e}  {:>14.6e}",
            spectrum.wavelength()[k],
            spectrum.radius()[k],
            spectrum.area()[k],
            spectrum.flux()[k],
            err
        );
    }
    println!(
        "{} slices, total finite flux {:.6e} {}",
        spectrum.len(),
        spectrum.finite_flux_total(),
        spectrum.flux_unit
    );
}

const PREVIEW_SCALE: u32 = 8;

/// Render the reference slice, magnified, with the aperture outline.
fn write_preview(
    cube: &SpectralCube,
    circle: &PixelCircle,
    params: &ExtractionParams,
    display: &DisplayConfig,
    path: &Path,
) -> Result<()> {
    let k = params
        .reference_wavelength_um
        .map_or(0, |lambda| cube.nearest_slice(lambda));
    let slice = cube.slice(k);
    let (ny, nx) = slice.dim();

    let rgba = slice_to_rgba(&slice, display.stretch, display.colormap);
    let img = RgbaImage::from_raw(nx as u32, ny as u32, rgba)
        .context("slice buffer does not match its dimensions")?;
    let mut img = imageops::resize(
        &img,
        nx as u32 * PREVIEW_SCALE,
        ny as u32 * PREVIEW_SCALE,
        imageops::FilterType::Nearest,
    );

    let lambda0 = params
        .reference_wavelength_um
        .unwrap_or_else(|| cube.wcs.wavelength(0));
    let r = radius_at(
        circle.radius,
        cube.wcs.wavelength(k),
        lambda0,
        params.scale_with_wavelength,
    );
    let s = PREVIEW_SCALE as f64;
    let height = img.height() as f64;
    let steps = (2.0 * std::f64::consts::PI * r * s).ceil().max(16.0) as usize * 2;
    for i in 0..steps {
        let t = i as f64 / steps as f64 * std::f64::consts::TAU;
        let px = (circle.x + 0.5 + r * t.cos()) * s;
        let py = height - (circle.y + 0.5 + r * t.sin()) * s;
        if px >= 0.0 && py >= 0.0 && px < img.width() as f64 && py < height {
            img.put_pixel(px as u32, py as u32, Rgba([0, 255, 255, 255]));
        }
    }

    img.save(path)
        .with_context(|| format!("writing preview {}", path.display()))?;
    Ok(())
}
