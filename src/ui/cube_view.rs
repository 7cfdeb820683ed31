use eframe::egui::{
    self, Color32, ColorImage, Pos2, Rect, Sense, Stroke, TextureHandle, TextureOptions, Ui, pos2,
    vec2,
};

use rusty_cube::color::{ColorMapKind, Stretch, slice_to_rgba};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Slice texture cache
// ---------------------------------------------------------------------------

/// GPU texture of the displayed slice, rebuilt only when its inputs change.
#[derive(Default)]
pub struct SliceTexture {
    key: Option<(u64, usize, Stretch, ColorMapKind)>,
    handle: Option<TextureHandle>,
}

impl SliceTexture {
    fn get(&mut self, ctx: &egui::Context, state: &AppState) -> Option<&TextureHandle> {
        let cube = state.cube.as_ref()?;
        let key = (
            state.cube_generation,
            state.current_slice,
            state.stretch,
            state.colormap,
        );
        if self.key != Some(key) || self.handle.is_none() {
            let slice = cube.slice(state.current_slice);
            let (ny, nx) = slice.dim();
            let rgba = slice_to_rgba(&slice, state.stretch, state.colormap);
            let image = ColorImage::from_rgba_unmultiplied([nx, ny], &rgba);
            self.handle = Some(ctx.load_texture("cube_slice", image, TextureOptions::NEAREST));
            self.key = Some(key);
        }
        self.handle.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Screen <-> pixel mapping
// ---------------------------------------------------------------------------

/// Maps between screen points and 0-based pixel coordinates of a slice drawn
/// with its origin at the lower left.
struct PixelFrame {
    rect: Rect,
    scale: f32,
}

impl PixelFrame {
    fn to_pixel(&self, p: Pos2) -> (f64, f64) {
        let x = (p.x - self.rect.left()) / self.scale - 0.5;
        let y = (self.rect.bottom() - p.y) / self.scale - 0.5;
        (x as f64, y as f64)
    }

    fn to_screen(&self, x: f64, y: f64) -> Pos2 {
        pos2(
            self.rect.left() + (x as f32 + 0.5) * self.scale,
            self.rect.bottom() - (y as f32 + 0.5) * self.scale,
        )
    }
}

// ---------------------------------------------------------------------------
// Cube view (central panel)
// ---------------------------------------------------------------------------

/// Render the current slice and handle aperture selection.
///
/// Click places the aperture centre; dragging from a point sets the centre
/// there and the radius to the drag distance.
pub fn cube_view(ui: &mut Ui, state: &mut AppState, texture: &mut SliceTexture) {
    let Some(cube) = &state.cube else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open a cube to begin  (File → Open…  or  File → Load demo cube)");
        });
        return;
    };
    let (_, ny, nx) = cube.dims();

    let Some(tex) = texture.get(ui.ctx(), state) else {
        return;
    };
    let tex_id = tex.id();

    let avail = ui.available_size() - vec2(0.0, 24.0);
    let scale = (avail.x / nx as f32).min(avail.y / ny as f32).max(1.0);
    let (response, painter) =
        ui.allocate_painter(vec2(nx as f32 * scale, ny as f32 * scale), Sense::click_and_drag());
    let frame = PixelFrame {
        rect: response.rect,
        scale,
    };

    painter.image(
        tex_id,
        frame.rect,
        Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
        Color32::WHITE,
    );

    // ---- Interaction ----
    if response.drag_started() || response.clicked() {
        if let Some(pos) = response.interact_pointer_pos() {
            let (x, y) = frame.to_pixel(pos);
            state.select_center(x, y);
        }
    } else if response.dragged() {
        if let (Some(pos), Some(circle)) = (response.interact_pointer_pos(), state.region) {
            let (x, y) = frame.to_pixel(pos);
            let r = ((x - circle.x).powi(2) + (y - circle.y).powi(2)).sqrt();
            if r >= 0.5 {
                state.set_radius_on_current_slice(r);
            }
        }
    }

    // ---- Aperture overlay ----
    if let Some(circle) = state.circle_at_slice(state.current_slice) {
        let center = frame.to_screen(circle.x, circle.y);
        painter.circle_stroke(
            center,
            circle.radius as f32 * scale,
            Stroke::new(1.5, Color32::YELLOW),
        );
        painter.circle_filled(center, 2.0, Color32::YELLOW);
    }

    // ---- Hover readout ----
    let readout = response
        .hover_pos()
        .map(|pos| frame.to_pixel(pos))
        .and_then(|(x, y)| hover_text(state, x, y));
    ui.label(readout.unwrap_or_else(|| "Click to place the aperture, drag to size it".into()));
}

fn hover_text(state: &AppState, x: f64, y: f64) -> Option<String> {
    let cube = state.cube.as_ref()?;
    let (_, ny, nx) = cube.dims();
    let (ix, iy) = (x.round(), y.round());
    if ix < 0.0 || iy < 0.0 || ix >= nx as f64 || iy >= ny as f64 {
        return None;
    }
    let value = cube.slice(state.current_slice)[[iy as usize, ix as usize]];
    let mut text = format!("x={x:.1} y={y:.1}  value={value:.4} {}", cube.flux_unit);
    if let Ok(sky) = cube.wcs.pixel_to_world(x, y) {
        text.push_str(&format!("  {sky}"));
    }
    Some(text)
}
