use std::time::Duration;

use eframe::egui;

use crate::state::AppState;
use crate::ui::cube_view::{SliceTexture, cube_view};
use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct RustyCubeApp {
    pub state: AppState,
    texture: SliceTexture,
}

impl RustyCubeApp {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            texture: SliceTexture::default(),
        }
    }
}

impl Default for RustyCubeApp {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl eframe::App for RustyCubeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.state.poll_fetch();
        if self.state.fetch_rx.is_some() {
            ctx.request_repaint_after(Duration::from_millis(200));
        }

        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Left side panel: controls ----
        egui::SidePanel::left("control_panel")
            .default_width(260.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // ---- Bottom panel: spectrum plot ----
        egui::TopBottomPanel::bottom("spectrum_panel")
            .default_height(280.0)
            .resizable(true)
            .show(ctx, |ui| {
                plot::spectrum_plot(ui, &self.state);
            });

        // ---- Central panel: cube slice ----
        egui::CentralPanel::default().show(ctx, |ui| {
            cube_view(ui, &mut self.state, &mut self.texture);
        });
    }
}
