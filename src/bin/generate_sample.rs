use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use rusty_cube::data::synthetic::{SyntheticSpec, synthetic_cube};
use rusty_cube::data::writer::{write_cube_fits, write_cube_json};

/// Write a synthetic point-source IFU cube for trying out the viewer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Output FITS file
    #[arg(short, long, default_value = "sample_cube.fits")]
    output: PathBuf,

    /// Also write the cube as JSON next to the FITS file
    #[arg(long)]
    json: bool,

    /// Number of spectral slices
    #[arg(long, default_value_t = 200)]
    slices: usize,

    /// Noise seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let spec = SyntheticSpec {
        n_slices: args.slices,
        seed: args.seed,
        ..Default::default()
    };
    let cube = synthetic_cube(&spec)?;
    let (n, ny, nx) = cube.dims();

    write_cube_fits(&cube, &args.output)?;
    println!(
        "Wrote {nx}×{ny}×{n} cube ({:.3}–{:.3} µm) to {}",
        spec.wavelength(0),
        spec.wavelength(n.saturating_sub(1)),
        args.output.display()
    );

    if args.json {
        let json_path = args.output.with_extension("json");
        write_cube_json(&cube, &json_path)?;
        println!("Wrote {}", json_path.display());
    }
    Ok(())
}
