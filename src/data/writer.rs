use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use fitrs::{Fits, Hdu, HeaderValue};
use parquet::arrow::ArrowWriter;
use serde::Serialize;

use super::loader::JsonCube;
use super::model::{SpectralCube, Spectrum1D};
use crate::wcs::CardValue;

// ---------------------------------------------------------------------------
// Spectrum export
// ---------------------------------------------------------------------------

/// One row of an exported spectrum.
#[derive(Debug, Clone, Serialize)]
pub struct SpectrumRow {
    pub wavelength_um: f64,
    pub flux: f64,
    pub error: Option<f64>,
    pub radius_px: f64,
    pub area_px: f64,
}

/// Flatten a spectrum into per-slice rows.
pub fn spectrum_rows(spectrum: &Spectrum1D) -> Vec<SpectrumRow> {
    (0..spectrum.len())
        .map(|i| SpectrumRow {
            wavelength_um: spectrum.wavelength()[i],
            flux: spectrum.flux()[i],
            error: spectrum.error().map(|e| e[i]),
            radius_px: spectrum.radius()[i],
            area_px: spectrum.area()[i],
        })
        .collect()
}

/// Write a spectrum to disk.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row plus one row per slice
/// * `.json`    – `{ "label", "flux_unit", "rows": [...] }`
/// * `.parquet` – one row per slice, float columns
pub fn export_spectrum(spectrum: &Spectrum1D, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" => export_csv(spectrum, path),
        "json" => export_json(spectrum, path),
        "parquet" | "pq" => export_parquet(spectrum, path),
        other => bail!("Unsupported export extension: .{other}"),
    }?;

    log::info!(
        "Wrote {} spectral points to {}",
        spectrum.len(),
        path.display()
    );
    Ok(())
}

fn export_csv(spectrum: &Spectrum1D, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    for row in spectrum_rows(spectrum) {
        writer.serialize(row).context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

#[derive(Serialize)]
struct JsonSpectrum<'a> {
    label: &'a str,
    flux_unit: &'a str,
    rows: Vec<SpectrumRow>,
}

fn export_json(spectrum: &Spectrum1D, path: &Path) -> Result<()> {
    let doc = JsonSpectrum {
        label: &spectrum.label,
        flux_unit: &spectrum.flux_unit,
        rows: spectrum_rows(spectrum),
    };
    let file = std::fs::File::create(path).context("creating JSON file")?;
    serde_json::to_writer_pretty(file, &doc).context("writing JSON")?;
    Ok(())
}

fn export_parquet(spectrum: &Spectrum1D, path: &Path) -> Result<()> {
    let error: Float64Array = match spectrum.error() {
        Some(e) => Float64Array::from(e.to_vec()),
        None => Float64Array::from(vec![None::<f64>; spectrum.len()]),
    };

    let schema = Arc::new(Schema::new(vec![
        Field::new("wavelength_um", DataType::Float64, false),
        Field::new("flux", DataType::Float64, false),
        Field::new("error", DataType::Float64, true),
        Field::new("radius_px", DataType::Float64, false),
        Field::new("area_px", DataType::Float64, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(spectrum.wavelength().to_vec())),
        Arc::new(Float64Array::from(spectrum.flux().to_vec())),
        Arc::new(error),
        Arc::new(Float64Array::from(spectrum.radius().to_vec())),
        Arc::new(Float64Array::from(spectrum.area().to_vec())),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;

    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Cube writers
// ---------------------------------------------------------------------------

fn cube_hdu(data: &ndarray::Array3<f64>) -> Hdu {
    let (nz, ny, nx) = data.dim();
    // Standard layout iteration order is [slice][y][x], i.e. NAXIS1 fastest.
    let values: Vec<f32> = data.iter().map(|&v| v as f32).collect();
    Hdu::new(&[nx, ny, nz], values)
}

/// Width of the fixed-format value field of a header card.
const CARD_VALUE_WIDTH: usize = 20;

/// Text fitrs writes for a real card value: the mantissa is scaled into
/// `[1, 10)` by repeated multiplication and printed in full.
fn fitrs_real_text(v: f64) -> String {
    let mut exp = 0;
    let mut f = v;
    if f.abs() >= 10.0 {
        while f.abs() >= 10.0 {
            f /= 10.0;
            exp += 1;
        }
    } else {
        while f.abs() < 1.0 {
            f *= 10.0;
            exp -= 1;
        }
    }
    if exp >= 0 {
        format!("{f}E+{exp:02}")
    } else {
        format!("{f}E-{:02}", -exp)
    }
}

/// Largest distance, in units in the last place, searched for a real whose
/// fitrs text fits the value field.
const MAX_ULP_STEPS: i64 = 4096;

/// Header value for a numeric card, or `None` if it cannot be written.
///
/// fitrs cannot format zero or non-finite reals and panics when the text is
/// wider than the value field.  Integral values are written as integers;
/// other values as the nearest double whose text fits.
fn numeric_card(v: f64) -> Option<HeaderValue> {
    if !v.is_finite() {
        return None;
    }
    if v.fract() == 0.0 && v.abs() <= i32::MAX as f64 {
        return Some(HeaderValue::IntegerNumber(v as i32));
    }
    let bits = v.to_bits() as i64;
    (0..=MAX_ULP_STEPS)
        .flat_map(|k| [bits + k, bits - k])
        .map(|b| f64::from_bits(b as u64))
        .find(|r| r.is_finite() && *r != 0.0 && fitrs_real_text(*r).len() <= CARD_VALUE_WIDTH)
        .map(HeaderValue::RealFloatingNumber)
}

fn insert_numeric(hdu: &mut Hdu, key: &str, value: f64) {
    match numeric_card(value) {
        Some(card) => hdu.insert(key, card),
        None => log::warn!("Skipping header card {key} = {value}: not representable"),
    }
}

/// Write a cube as FITS: flux with WCS in the primary HDU (`EXTNAME = SCI`),
/// uncertainties in an `ERR` image extension.
pub fn write_cube_fits(cube: &SpectralCube, path: &Path) -> Result<()> {
    let mut primary = cube_hdu(&cube.flux);
    for (key, value) in cube.wcs.to_header() {
        match value {
            CardValue::Real(v) => insert_numeric(&mut primary, &key, v),
            CardValue::Text(s) => primary.insert(key.as_str(), HeaderValue::CharacterString(s)),
        }
    }
    primary.insert("EXTNAME", HeaderValue::CharacterString("SCI".into()));
    primary.insert("BUNIT", HeaderValue::CharacterString(cube.flux_unit.clone()));
    if let Some(area) = cube.pixel_area_sr {
        insert_numeric(&mut primary, "PIXAR_SR", area);
    }

    let mut fits = Fits::create(path, primary)
        .with_context(|| format!("creating {}", path.display()))?;

    if let Some(error) = &cube.error {
        let mut hdu = cube_hdu(error);
        hdu.insert("EXTNAME", HeaderValue::CharacterString("ERR".into()));
        fits.push(hdu).context("writing ERR extension")?;
    }
    Ok(())
}

/// Write a cube in the JSON layout read by the loader.
pub fn write_cube_json(cube: &SpectralCube, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).context("creating JSON file")?;
    serde_json::to_writer(file, &JsonCube::from_cube(cube)).context("writing JSON cube")?;
    Ok(())
}
