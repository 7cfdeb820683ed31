use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use rusty_cube::color::{ColorMapKind, Stretch, generate_palette};
use rusty_cube::photometry::ApertureMethod;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – display and extraction controls
// ---------------------------------------------------------------------------

/// Render the left control panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Cube");
    ui.separator();

    let Some(cube) = &state.cube else {
        ui.label("No cube loaded.");
        return;
    };
    let (n_slices, ny, nx) = cube.dims();
    ui.label(format!("{}  ({nx}×{ny}, {n_slices} slices)", cube.name));
    ui.label(format!("Unit: {}", cube.flux_unit));

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            slice_controls(ui, state, n_slices);
            ui.separator();
            display_controls(ui, state);
            ui.separator();
            aperture_controls(ui, state);
            ui.separator();
            history_table(ui, state);
        });
}

fn slice_controls(ui: &mut Ui, state: &mut AppState, n_slices: usize) {
    ui.strong("Slice");
    let mut k = state.current_slice;
    if ui
        .add(egui::Slider::new(&mut k, 0..=n_slices.saturating_sub(1)))
        .changed()
    {
        state.set_slice(k);
    }
    if let Some(lambda) = state.wavelength_of(state.current_slice) {
        ui.label(format!("λ = {lambda:.5} µm"));
    }
}

fn display_controls(ui: &mut Ui, state: &mut AppState) {
    ui.strong("Display");

    let stretch_text = match state.stretch {
        Stretch::Linear => "Min / max".to_string(),
        Stretch::Percentile(p) => format!("{p}%"),
    };
    egui::ComboBox::from_id_salt("stretch")
        .selected_text(stretch_text)
        .show_ui(ui, |ui: &mut Ui| {
            ui.selectable_value(&mut state.stretch, Stretch::Linear, "Min / max");
            for p in [90.0, 99.0, 99.5, 99.9] {
                ui.selectable_value(&mut state.stretch, Stretch::Percentile(p), format!("{p}%"));
            }
        });

    egui::ComboBox::from_id_salt("colormap")
        .selected_text(state.colormap.name())
        .show_ui(ui, |ui: &mut Ui| {
            for cmap in ColorMapKind::ALL {
                ui.selectable_value(&mut state.colormap, cmap, cmap.name());
            }
        });
}

fn aperture_controls(ui: &mut Ui, state: &mut AppState) {
    ui.strong("Aperture");

    // ---- Overlap method ----
    let current = state.params.method;
    egui::ComboBox::from_id_salt("method")
        .selected_text(current.to_string())
        .show_ui(ui, |ui: &mut Ui| {
            ui.selectable_value(&mut state.params.method, ApertureMethod::Exact, "exact");
            ui.selectable_value(&mut state.params.method, ApertureMethod::Center, "center");
            let sub = match current {
                ApertureMethod::Subpixel(n) => ApertureMethod::Subpixel(n),
                _ => ApertureMethod::Subpixel(5),
            };
            ui.selectable_value(&mut state.params.method, sub, "subpixel");
        });
    if let ApertureMethod::Subpixel(n) = &mut state.params.method {
        ui.add(egui::DragValue::new(n).range(1..=32).prefix("subpixels: "));
    }

    // ---- Radius (as seen on the current slice) ----
    if let Some(circle) = state.circle_at_slice(state.current_slice) {
        let mut r = circle.radius;
        if ui
            .add(
                egui::DragValue::new(&mut r)
                    .range(0.5..=200.0)
                    .speed(0.05)
                    .suffix(" px")
                    .prefix("radius: "),
            )
            .changed()
        {
            state.set_radius_on_current_slice(r);
        }
    } else {
        ui.label("Click the cube to place an aperture.");
    }

    ui.checkbox(&mut state.params.scale_with_wavelength, "Scale radius with λ");
    ui.checkbox(&mut state.params.convert_to_jy, "Convert MJy/sr to Jy");

    if let Some(lambda0) = state.reference_wavelength() {
        ui.label(format!("λ0 = {lambda0:.5} µm (slice {})", state.reference_slice));
    }
    if ui.button("Use current slice as λ0").clicked() {
        state.use_current_as_reference();
    }

    // ---- Readout ----
    if let Some(c) = state.region {
        ui.label(format!("centre x={:.2} y={:.2}, r0={:.2} px", c.x, c.y, c.radius));
    }
    match state.region_on_sky() {
        Some(Ok(sky)) => {
            ui.label(format!("{}  r0={:.3}″", sky.center, sky.radius_arcsec));
        }
        Some(Err(e)) => {
            ui.label(RichText::new(e.to_string()).weak());
        }
        None => {}
    }

    ui.add_space(4.0);
    if ui
        .add_enabled(state.region.is_some(), egui::Button::new("Extract spectrum"))
        .clicked()
    {
        state.extract();
    }
}

fn history_table(ui: &mut Ui, state: &mut AppState) {
    ui.horizontal(|ui: &mut Ui| {
        ui.strong(format!("History ({})", state.history.len()));
        if ui.small_button("Clear").clicked() {
            state.history.clear();
        }
    });
    if state.history.is_empty() {
        return;
    }

    let palette = generate_palette(state.history.len());
    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto())
        .column(Column::remainder())
        .header(18.0, |mut header| {
            header.col(|ui| {
                ui.strong("#");
            });
            header.col(|ui| {
                ui.strong("Label");
            });
        })
        .body(|mut body| {
            for (i, spectrum) in state.history.iter().enumerate() {
                body.row(18.0, |mut row| {
                    row.col(|ui| {
                        ui.label(RichText::new(format!("{}", i + 1)).color(palette[i]));
                    });
                    row.col(|ui| {
                        ui.label(&spectrum.label);
                    });
                });
            }
        });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
            if ui.button("Load demo cube").clicked() {
                state.load_demo();
                ui.close_menu();
            }
            ui.separator();
            if ui
                .add_enabled(!state.history.is_empty(), egui::Button::new("Export spectrum…"))
                .clicked()
            {
                export_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        ui.label("URL:");
        ui.add(egui::TextEdit::singleline(&mut state.fetch_url).desired_width(320.0));
        if ui
            .add_enabled(state.fetch_rx.is_none(), egui::Button::new("Fetch"))
            .clicked()
        {
            state.start_fetch();
        }
        if state.loading {
            ui.spinner();
        }

        if let Some(msg) = &state.status_message {
            ui.separator();
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open spectral cube")
        .add_filter("Supported files", &["fits", "fit", "fts", "json"])
        .add_filter("FITS", &["fits", "fit", "fts"])
        .add_filter("JSON", &["json"])
        .pick_file();

    if let Some(path) = file {
        state.load_path(&path);
        if let Some(cube) = &state.cube {
            let (n, ny, nx) = cube.dims();
            log::info!("Loaded {} ({nx}×{ny}×{n})", path.display());
        }
    }
}

pub fn export_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Export spectrum")
        .set_file_name("spectrum.csv")
        .add_filter("CSV", &["csv"])
        .add_filter("JSON", &["json"])
        .add_filter("Parquet", &["parquet", "pq"])
        .save_file();

    if let Some(path) = file {
        state.export_latest(&path);
    }
}
