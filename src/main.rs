mod app;
mod state;
mod ui;

use std::path::PathBuf;

use app::RustyCubeApp;
use clap::Parser;
use eframe::egui;
use rusty_cube::config::AppConfig;
use state::AppState;

/// Interactive IFU cube viewer with variable-aperture spectrum extraction.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Cube to open on start (.fits or .json)
    cube: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> eframe::Result {
    env_logger::init();
    let args = Args::parse();

    let config = match AppConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Ignoring configuration: {e}");
            AppConfig::default()
        }
    };
    let mut state = AppState::new(config);
    if let Some(path) = &args.cube {
        state.load_path(path);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 900.0])
            .with_min_inner_size([700.0, 500.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Rusty Cube – IFU Spectral Extractor",
        options,
        Box::new(|_cc| Ok(Box::new(RustyCubeApp::new(state)))),
    )
}
