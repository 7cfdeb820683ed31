use eframe::egui::{Color32, Ui};
use egui_plot::{Legend, Line, LineStyle, Plot, PlotPoints, VLine};

use rusty_cube::Spectrum1D;
use rusty_cube::color::generate_palette;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Spectrum plot (bottom panel)
// ---------------------------------------------------------------------------

fn finite_points(x: &[f64], y: impl Iterator<Item = f64>) -> PlotPoints {
    x.iter()
        .zip(y)
        .filter(|(_, yi)| yi.is_finite())
        .map(|(&xi, yi)| [xi, yi])
        .collect()
}

/// Render every extracted spectrum, newest with its ±1σ envelope.
pub fn spectrum_plot(ui: &mut Ui, state: &AppState) {
    if state.history.is_empty() {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.label("Place an aperture and press \"Extract spectrum\" to plot it here.");
        });
        return;
    }

    let palette = generate_palette(state.history.len());
    let unit = state
        .latest_spectrum()
        .map(|s| s.flux_unit.clone())
        .unwrap_or_default();
    let current_lambda = state.wavelength_of(state.current_slice);

    Plot::new("spectrum_plot")
        .legend(Legend::default())
        .x_axis_label("Wavelength (µm)")
        .y_axis_label(format!("Flux ({unit})"))
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            let latest = state.history.len() - 1;
            for (i, sp) in state.history.iter().enumerate() {
                let color = palette[i];
                let line = Line::new(finite_points(sp.wavelength(), sp.flux().iter().copied()))
                    .name(&sp.label)
                    .color(color)
                    .width(1.5);
                plot_ui.line(line);

                if i == latest {
                    for line in error_envelope(sp, color) {
                        plot_ui.line(line);
                    }
                }
            }

            if let Some(lambda) = current_lambda {
                plot_ui.vline(
                    VLine::new(lambda)
                        .color(Color32::GRAY)
                        .style(LineStyle::dashed_loose()),
                );
            }
        });
}

fn error_envelope(sp: &Spectrum1D, color: Color32) -> Vec<Line> {
    let Some(err) = sp.error() else {
        return Vec::new();
    };
    let faded = color.gamma_multiply(0.5);
    [1.0, -1.0]
        .into_iter()
        .map(|sign| {
            let y = sp.flux().iter().zip(err).map(move |(f, e)| f + sign * e);
            Line::new(finite_points(sp.wavelength(), y))
                .color(faded)
                .style(LineStyle::dashed_dense())
        })
        .collect()
}
