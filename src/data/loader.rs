use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use fitrs::{Fits, FitsData, Hdu, HeaderValue};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::model::SpectralCube;
use crate::wcs::{CubeWcs, HeaderCards, HeaderMap};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a spectral cube from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.fits` / `.fit` / `.fts` – IFU cube with `SCI` (and optionally `ERR`,
///   `DQ`) extensions, or a primary HDU holding a 3-D image
/// * `.json` – see [`JsonCube`]
pub fn load_cube(path: &Path) -> Result<SpectralCube> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let cube = match ext.as_str() {
        "fits" | "fit" | "fts" => load_fits(path),
        "json" => load_json(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    let (nz, ny, nx) = cube.dims();
    log::info!(
        "Loaded cube '{}' ({nx}×{ny} spaxels, {nz} slices, unit '{}')",
        cube.name,
        cube.flux_unit
    );
    Ok(cube)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// FITS loader
// ---------------------------------------------------------------------------

/// DQ bit flagging pixels that must not be used.
const DQ_DO_NOT_USE: u64 = 1;

/// Load an IFU cube from FITS.
///
/// Flux comes from the `SCI` extension, or from the first HDU with
/// `NAXIS = 3` when there is none.  The WCS, `BUNIT` and `PIXAR_SR` are read
/// from the same HDU.  `ERR` supplies uncertainties; pixels whose `DQ` value
/// has the do-not-use bit set become NaN in both arrays.
fn load_fits(path: &Path) -> Result<SpectralCube> {
    let fits = Fits::open(path).with_context(|| format!("opening {}", path.display()))?;

    let sci = match guard_fitrs("reading HDU headers", || fits.get_by_name("SCI"))? {
        Some(hdu) => hdu,
        None => guard_fitrs("reading HDU headers", || {
            fits.iter().find(|hdu| hdu.real("NAXIS") == Some(3.0))
        })?
        .context("no 3-D image HDU found in file")?,
    };

    let mut flux = read_cube_data(&sci).context("reading flux cube")?;

    let mut error = match guard_fitrs("reading HDU headers", || fits.get_by_name("ERR"))? {
        Some(hdu) => {
            let err = read_cube_data(&hdu).context("reading ERR extension")?;
            if err.dim() != flux.dim() {
                bail!(
                    "ERR extension is {:?} but SCI is {:?}",
                    err.dim(),
                    flux.dim()
                );
            }
            Some(err)
        }
        None => None,
    };

    if let Some(hdu) = guard_fitrs("reading HDU headers", || fits.get_by_name("DQ"))? {
        let dq = read_cube_data(&hdu).context("reading DQ extension")?;
        if dq.dim() == flux.dim() {
            let mut flagged = 0usize;
            for (idx, q) in dq.indexed_iter() {
                if q.is_finite() && (*q as u64) & DQ_DO_NOT_USE != 0 {
                    flux[idx] = f64::NAN;
                    if let Some(err) = error.as_mut() {
                        err[idx] = f64::NAN;
                    }
                    flagged += 1;
                }
            }
            log::debug!("DQ flagged {flagged} pixels as do-not-use");
        } else {
            log::warn!("Ignoring DQ extension with shape {:?}", dq.dim());
        }
    }

    let wcs = CubeWcs::from_header(&sci).context("parsing WCS")?;
    let unit = sci.text("BUNIT").unwrap_or_default();
    let pixar = sci.real("PIXAR_SR");

    Ok(SpectralCube::new(flux, error, wcs, unit, display_name(path))?.with_pixel_area_sr(pixar))
}

/// Run a fitrs call that reports I/O and format problems by panicking, and
/// turn such a panic into an error.
fn guard_fitrs<T>(what: &str, f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown failure".into());
        log::error!("fitrs failed while {what}: {reason}");
        anyhow!("malformed or truncated FITS file ({what}: {reason})")
    })
}

/// Check the header cards `read_data` relies on, so bad values give an error
/// instead of reaching fitrs.
fn check_image_header(hdu: &Hdu) -> Result<()> {
    match hdu.value("BITPIX") {
        Some(HeaderValue::IntegerNumber(8 | 16 | 32 | -32 | -64)) => {}
        Some(other) => bail!("unsupported BITPIX {other:?}"),
        None => bail!("BITPIX is missing"),
    }
    let naxis = match hdu.value("NAXIS") {
        Some(HeaderValue::IntegerNumber(n)) if *n >= 0 => *n,
        _ => bail!("NAXIS is missing or invalid"),
    };
    for i in 1..=naxis {
        match hdu.value(&format!("NAXIS{i}")) {
            Some(HeaderValue::IntegerNumber(n)) if *n >= 0 => {}
            _ => bail!("NAXIS{i} is missing or invalid"),
        }
    }
    Ok(())
}

/// Read a 3-D image HDU as `[slice, y, x]`, applying `BSCALE`/`BZERO` to
/// integer data.  Null integer pixels become NaN.
fn read_cube_data(hdu: &Hdu) -> Result<Array3<f64>> {
    check_image_header(hdu)?;
    let bscale = hdu.real("BSCALE").unwrap_or(1.0);
    let bzero = hdu.real("BZERO").unwrap_or(0.0);
    let scale = |v: f64| v * bscale + bzero;

    let (shape, values): (Vec<usize>, Vec<f64>) =
        match guard_fitrs("reading image data", || hdu.read_data())? {
            FitsData::FloatingPoint32(arr) => {
                (arr.shape, arr.data.into_iter().map(f64::from).collect())
            }
            FitsData::FloatingPoint64(arr) => (arr.shape, arr.data),
            FitsData::IntegersI32(arr) => (
                arr.shape,
                arr.data
                    .into_iter()
                    .map(|v| v.map_or(f64::NAN, |i| scale(i as f64)))
                    .collect(),
            ),
            FitsData::IntegersU32(arr) => (
                arr.shape,
                arr.data
                    .into_iter()
                    .map(|v| v.map_or(f64::NAN, |i| scale(i as f64)))
                    .collect(),
            ),
            FitsData::Characters(_) => bail!("character HDU is not an image cube"),
        };

    // FITS axis order: [NAXIS1 (x), NAXIS2 (y), NAXIS3 (λ)], NAXIS1 fastest.
    let &[nx, ny, nz] = shape.as_slice() else {
        bail!("expected a 3-D image, got NAXIS={}", shape.len());
    };
    Array3::from_shape_vec((nz, ny, nx), values).context("image data does not match NAXISn")
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// JSON cube layout.
///
/// ```json
/// {
///   "name": "demo",
///   "shape": [n_slices, ny, nx],
///   "flux":  [0.1, null, ...],
///   "error": [0.01, null, ...],
///   "unit": "MJy/sr",
///   "pixel_area_sr": 2.35e-13,
///   "header": { "CRPIX1": 20.0, "CTYPE1": "RA---TAN", ... }
/// }
/// ```
///
/// `flux` and `error` are flattened in `[slice][y][x]` order; `null` stands
/// for NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCube {
    #[serde(default)]
    pub name: Option<String>,
    pub shape: [usize; 3],
    pub flux: Vec<Option<f64>>,
    #[serde(default)]
    pub error: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub pixel_area_sr: Option<f64>,
    #[serde(default)]
    pub header: HeaderMap,
}

fn nullable_array(shape: [usize; 3], values: &[Option<f64>], what: &str) -> Result<Array3<f64>> {
    let data: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), data).with_context(|| {
        format!(
            "'{what}' has {} values, shape {:?} needs {}",
            values.len(),
            shape,
            shape.iter().product::<usize>()
        )
    })
}

fn load_json(path: &Path) -> Result<SpectralCube> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let raw: JsonCube = serde_json::from_str(&text).context("parsing JSON cube")?;

    let flux = nullable_array(raw.shape, &raw.flux, "flux")?;
    let error = raw
        .error
        .as_deref()
        .map(|e| nullable_array(raw.shape, e, "error"))
        .transpose()?;
    let wcs = CubeWcs::from_header(&raw.header).context("parsing WCS header")?;
    let name = raw.name.unwrap_or_else(|| display_name(path));

    Ok(SpectralCube::new(flux, error, wcs, raw.unit, name)?.with_pixel_area_sr(raw.pixel_area_sr))
}

impl JsonCube {
    /// Serialisable form of a cube; NaN becomes `null`.
    pub fn from_cube(cube: &SpectralCube) -> Self {
        let to_nullable = |a: &Array3<f64>| -> Vec<Option<f64>> {
            a.iter().map(|&v| v.is_finite().then_some(v)).collect()
        };
        let (nz, ny, nx) = cube.dims();
        Self {
            name: Some(cube.name.clone()),
            shape: [nz, ny, nx],
            flux: to_nullable(&cube.flux),
            error: cube.error.as_ref().map(to_nullable),
            unit: cube.flux_unit.clone(),
            pixel_area_sr: cube.pixel_area_sr,
            header: cube.wcs.to_header(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wcs::CardValue;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_cube() {
        let file = write_temp(
            ".json",
            r#"{
                "shape": [2, 1, 3],
                "flux": [1.0, 2.0, null, 4.0, 5.0, 6.0],
                "error": [0.1, 0.1, 0.1, 0.2, 0.2, 0.2],
                "unit": "Jy",
                "header": { "CTYPE3": "WAVE", "CUNIT3": "um", "CRPIX3": 1.0,
                            "CRVAL3": 5.0, "CDELT3": 0.5 }
            }"#,
        );
        let cube = load_cube(file.path()).unwrap();
        assert_eq!(cube.dims(), (2, 1, 3));
        assert_eq!(cube.flux_unit, "Jy");
        assert!(cube.flux[[0, 0, 2]].is_nan());
        assert_relative_eq!(cube.flux[[1, 0, 1]], 5.0);
        assert_relative_eq!(cube.error.as_ref().unwrap()[[1, 0, 0]], 0.2);
        assert_eq!(cube.wavelengths(), vec![5.0, 5.5]);
    }

    #[test]
    fn test_json_wrong_length_is_an_error() {
        let file = write_temp(".json", r#"{ "shape": [2, 2, 2], "flux": [1.0, 2.0] }"#);
        let err = load_cube(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("'flux' has 2 values"));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".txt", "hello");
        let err = load_cube(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported file extension"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_cube(Path::new("/nonexistent/cube.fits")).is_err());
        assert!(load_cube(Path::new("/nonexistent/cube.json")).is_err());
    }

    #[test]
    fn test_json_cube_from_cube_keeps_header() {
        let file = write_temp(
            ".json",
            r#"{ "shape": [1, 1, 2], "flux": [null, 3.0],
                 "header": { "CRVAL3": 2.0, "CUNIT3": "um" } }"#,
        );
        let cube = load_cube(file.path()).unwrap();
        let json = JsonCube::from_cube(&cube);
        assert_eq!(json.flux, vec![None, Some(3.0)]);
        assert_eq!(json.header.get("CUNIT3"), Some(&CardValue::Text("um".into())));
    }

    // ---- FITS fixtures ----

    fn image_hdu(shape: &[usize], data: Vec<f32>, extname: Option<&str>) -> Hdu {
        let mut hdu = Hdu::new(shape, data);
        if let Some(name) = extname {
            hdu.insert("EXTNAME", HeaderValue::CharacterString(name.into()));
        }
        hdu
    }

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    fn fits_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        dir.path().join(name)
    }

    /// Primary HDU holding a 2-D image, so cube lookup has to skip it.
    fn dummy_primary() -> Hdu {
        image_hdu(&[2, 2], vec![0.0; 4], None)
    }

    #[test]
    fn test_fits_sci_err_dq_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "ifu.fits");
        // NAXIS1 = x = 3, NAXIS2 = y = 2, NAXIS3 = λ = 2.
        let shape = [3, 2, 2];

        let mut sci = image_hdu(&shape, ramp(12), Some("SCI"));
        sci.insert("BUNIT", HeaderValue::CharacterString("MJy/sr".into()));
        sci.insert("PIXAR_SR", HeaderValue::RealFloatingNumber(1.5e-13));
        sci.insert("CRPIX3", HeaderValue::IntegerNumber(1));
        sci.insert("CRVAL3", HeaderValue::RealFloatingNumber(4.5));
        sci.insert("CDELT3", HeaderValue::RealFloatingNumber(0.25));
        sci.insert("CUNIT3", HeaderValue::CharacterString("um".into()));

        let mut dq_values = vec![0i32; 12];
        dq_values[4] = 1; // do-not-use
        dq_values[5] = 4; // other flag, kept
        let mut dq = Hdu::new(&shape, dq_values);
        dq.insert("EXTNAME", HeaderValue::CharacterString("DQ".into()));

        let mut fits = Fits::create(&path, dummy_primary()).unwrap();
        fits.push(sci).unwrap();
        fits.push(image_hdu(&shape, vec![0.5; 12], Some("ERR"))).unwrap();
        fits.push(dq).unwrap();

        let cube = load_cube(&path).unwrap();
        assert_eq!(cube.dims(), (2, 2, 3));
        assert_eq!(cube.flux_unit, "MJy/sr");
        assert_relative_eq!(cube.pixel_area_sr.unwrap(), 1.5e-13, max_relative = 1e-12);
        assert_eq!(cube.wavelengths(), vec![4.5, 4.75]);

        // Flat index 7 = slice 1, y 0, x 1.
        assert_relative_eq!(cube.flux[[1, 0, 1]], 7.0);
        let error = cube.error.as_ref().unwrap();
        assert_relative_eq!(error[[1, 0, 1]], 0.5);

        // Flat index 4 = slice 0, y 1, x 1.
        assert!(cube.flux[[0, 1, 1]].is_nan());
        assert!(error[[0, 1, 1]].is_nan());
        assert_relative_eq!(cube.flux[[0, 1, 2]], 5.0);
    }

    #[test]
    fn test_fits_without_sci_uses_first_cube_hdu() {
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "plain.fits");
        let mut cube_hdu = image_hdu(&[2, 2, 3], ramp(12), None);
        cube_hdu.insert("BUNIT", HeaderValue::CharacterString("Jy".into()));

        let mut fits = Fits::create(&path, dummy_primary()).unwrap();
        fits.push(cube_hdu).unwrap();

        let cube = load_cube(&path).unwrap();
        assert_eq!(cube.dims(), (3, 2, 2));
        assert_eq!(cube.flux_unit, "Jy");
        assert!(cube.error.is_none());
        assert_relative_eq!(cube.flux[[2, 1, 0]], 10.0);
        // No spectral keywords: channels are numbered from 1.
        assert_eq!(cube.wavelengths(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_fits_err_shape_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "mismatch.fits");
        let mut fits = Fits::create(&path, image_hdu(&[2, 2, 2], ramp(8), Some("SCI"))).unwrap();
        fits.push(image_hdu(&[2, 2, 3], ramp(12), Some("ERR"))).unwrap();

        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("ERR extension is"));
    }

    #[test]
    fn test_fits_integer_data_is_scaled_and_blank_is_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "counts.fits");
        let mut hdu = Hdu::new(&[2, 1, 2], vec![0i32, 4, -1, 10]);
        hdu.insert("BSCALE", HeaderValue::RealFloatingNumber(0.5));
        hdu.insert("BZERO", HeaderValue::IntegerNumber(100));
        hdu.insert("BLANK", HeaderValue::IntegerNumber(-1));
        Fits::create(&path, hdu).unwrap();

        let cube = load_cube(&path).unwrap();
        assert_eq!(cube.dims(), (2, 1, 2));
        assert_relative_eq!(cube.flux[[0, 0, 0]], 100.0);
        assert_relative_eq!(cube.flux[[0, 0, 1]], 102.0);
        assert!(cube.flux[[1, 0, 0]].is_nan());
        assert_relative_eq!(cube.flux[[1, 0, 1]], 105.0);
    }

    #[test]
    fn test_fits_without_cube_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "image.fits");
        Fits::create(&path, dummy_primary()).unwrap();

        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("no 3-D image HDU"));
    }

    #[test]
    fn test_truncated_fits_is_an_error() {
        use crate::data::synthetic::{SyntheticSpec, synthetic_cube};
        use crate::data::writer::write_cube_fits;

        let cube = synthetic_cube(&SyntheticSpec {
            n_slices: 10,
            ..Default::default()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "partial.fits");
        write_cube_fits(&cube, &path).unwrap();
        assert!(load_cube(&path).is_ok());

        // Header intact, data cut short, as after an interrupted download.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(5760).unwrap();
        drop(file);
        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("truncated"), "{err:#}");

        // Cut inside the first header.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(1000).unwrap();
        drop(file);
        assert!(load_cube(&path).is_err());
    }

    /// Hand-written header, for values fitrs will not write itself.
    fn raw_fits(cards: &[(&str, &str)], data_len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (key, value) in cards {
            bytes.extend(format!("{key:<8}= {value:>20}{:50}", "").into_bytes());
        }
        bytes.extend(format!("{:<80}", "END").into_bytes());
        bytes.resize(bytes.len().div_ceil(2880) * 2880, b' ');
        bytes.resize(bytes.len() + data_len.div_ceil(2880) * 2880, 0);
        bytes
    }

    #[test]
    fn test_fits_unsupported_bitpix_is_an_error() {
        let bytes = raw_fits(
            &[
                ("SIMPLE", "T"),
                ("BITPIX", "24"),
                ("NAXIS", "3"),
                ("NAXIS1", "2"),
                ("NAXIS2", "2"),
                ("NAXIS3", "2"),
            ],
            24,
        );
        let dir = tempfile::tempdir().unwrap();
        let path = fits_path(&dir, "odd.fits");
        std::fs::write(&path, bytes).unwrap();

        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported BITPIX"), "{err:#}");
    }
}
