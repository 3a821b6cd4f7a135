use std::sync::Arc;

use egui::{
    Align, Color32, ColorImage, FontFamily, FontId, Frame, Key, KeyboardShortcut, Layout,
    Modifiers, RichText, Stroke, TextureHandle, TextureOptions, Vec2, ViewportCommand,
};
use glance_core::{DisplayDescriptor, PreviewSettings, SessionState};
use glance_engine::{EngineStatus, MirrorEngine};
use glance_renderer::{
    FramePresenter, Geometry, PresentationSurface, PreviewImage, PreviewVisibility, PreviewWindow,
    RendererError,
};
use tracing::{debug, info, warn};

use crate::state::{state_color, PreviewStats};

// ── Layout constants ──────────────────────────────────────────────────────────

/// Size the window collapses to while the preview is hidden.
pub const TOOLBAR_WIDTH: f32 = 560.0;
pub const TOOLBAR_HEIGHT: f32 = 44.0;

const TOGGLE_SHORTCUT: KeyboardShortcut = KeyboardShortcut::new(Modifiers::ALT, Key::B);

// ── Colours ───────────────────────────────────────────────────────────────────

const BG_PANEL:  Color32 = Color32::from_rgb(28,  30,  36);
const BG_INSET:  Color32 = Color32::from_rgb(20,  22,  28);
const BG_CARD:   Color32 = Color32::from_rgb(36,  38,  46);
const TEXT_DIM:  Color32 = Color32::from_rgb(130, 135, 148);
const TEXT_NORM: Color32 = Color32::from_rgb(210, 215, 230);
const TEXT_ERR:  Color32 = Color32::from_rgb(220, 100, 100);

// ── App struct ────────────────────────────────────────────────────────────────

pub struct GlanceApp {
    engine:     Arc<MirrorEngine>,
    runtime:    tokio::runtime::Handle,
    presenter:  FramePresenter,
    window:     PreviewWindow,
    texture:    Option<TextureHandle>,
    stats:      PreviewStats,
    /// Epoch the stats belong to; a new session starts a new count.
    stats_epoch: u64,
    displays:   Vec<DisplayDescriptor>,
    menu_open:  bool,
    default_size: Vec2,
    shut_down:  bool,
}

impl GlanceApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        engine: Arc<MirrorEngine>,
        runtime: tokio::runtime::Handle,
        settings: PreviewSettings,
    ) -> Self {
        let mut visuals = egui::Visuals::dark();
        visuals.window_fill             = BG_PANEL;
        visuals.panel_fill              = BG_PANEL;
        visuals.extreme_bg_color        = BG_INSET;
        visuals.faint_bg_color          = BG_CARD;
        visuals.widgets.inactive.bg_fill  = BG_CARD;
        visuals.widgets.hovered.bg_fill   = Color32::from_rgb(50, 53, 65);
        visuals.widgets.active.bg_fill    = Color32::from_rgb(65, 68, 82);
        cc.egui_ctx.set_visuals(visuals);

        // Repaint on every accepted frame and on every status change; the UI
        // otherwise sleeps.
        let ctx = cc.egui_ctx.clone();
        engine.sink().set_on_publish(move || ctx.request_repaint());

        let ctx = cc.egui_ctx.clone();
        let mut status_rx = engine.subscribe();
        runtime.spawn(async move {
            while status_rx.changed().await.is_ok() {
                ctx.request_repaint();
            }
        });

        let visibility = if settings.start_visible {
            PreviewVisibility::Visible
        } else {
            PreviewVisibility::Hidden
        };
        let default_size = Vec2::new(settings.width, settings.height);
        if visibility == PreviewVisibility::Hidden {
            cc.egui_ctx
                .send_viewport_cmd(ViewportCommand::InnerSize(Vec2::new(TOOLBAR_WIDTH, TOOLBAR_HEIGHT)));
        }

        let mut app = Self {
            presenter:   FramePresenter::new(Arc::clone(engine.sink())),
            engine,
            runtime,
            window:      PreviewWindow::new(visibility),
            texture:     None,
            stats:       PreviewStats::default(),
            stats_epoch: 0,
            displays:    Vec::new(),
            menu_open:   false,
            default_size,
            shut_down:   false,
        };
        app.refresh_displays();
        app
    }

    fn surface<'a>(&'a mut self, ctx: &'a egui::Context) -> EguiSurface<'a> {
        EguiSurface {
            ctx,
            texture: &mut self.texture,
            default_size: self.default_size,
        }
    }

    fn toggle_preview(&mut self, ctx: &egui::Context) {
        let mut surface = EguiSurface {
            ctx,
            texture: &mut self.texture,
            default_size: self.default_size,
        };
        let visibility = self.window.toggle(&mut surface);
        info!("Preview {:?}", visibility);
    }

    /// Uploads the newest frame, if any arrived since the last paint.
    fn pull_frame(&mut self, ctx: &egui::Context) {
        let image = match self.presenter.poll() {
            Ok(Some(image)) => image,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };
        match self.surface(ctx).present(image) {
            Ok(()) => self.stats.tick_frame(),
            Err(e) => warn!("{}", e),
        }
    }

    fn refresh_displays(&mut self) {
        match self.engine.catalog().descriptors() {
            Ok(displays) => {
                debug!("Display menu: {} entries", displays.len());
                self.displays = displays;
            }
            Err(e) => {
                warn!("Could not list displays: {}", e);
                self.displays.clear();
            }
        }
    }
}

// ── eframe::App implementation ────────────────────────────────────────────────

impl eframe::App for GlanceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input_mut(|i| i.consume_shortcut(&TOGGLE_SHORTCUT)) {
            self.toggle_preview(ctx);
        }

        self.pull_frame(ctx);

        let status = self.engine.status();
        if status.epoch != self.stats_epoch {
            self.stats.reset();
            self.stats_epoch = status.epoch;
        }

        egui::TopBottomPanel::top("toolbar")
            .frame(Frame::none().fill(BG_CARD).inner_margin(egui::Margin::symmetric(10.0, 8.0)))
            .show(ctx, |ui| self.render_toolbar(ui, ctx, &status));

        egui::CentralPanel::default()
            .frame(Frame::none().fill(BG_INSET))
            .show(ctx, |ui| {
                if self.window.is_visible() {
                    self.render_preview(ui, &status);
                }
            });

        if ctx.input(|i| i.viewport().close_requested()) {
            let geometry = self.surface(ctx).geometry();
            self.window.record_close(geometry);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Preview window closed; stopping capture");
        self.runtime.block_on(self.engine.shutdown());
    }
}

// ── Rendering helpers ─────────────────────────────────────────────────────────

impl GlanceApp {
    fn render_toolbar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, status: &EngineStatus) {
        ui.horizontal(|ui| {
            // Coloured status dot
            let (rect, _) = ui.allocate_exact_size(Vec2::splat(12.0), egui::Sense::hover());
            ui.painter().circle_filled(rect.center(), 5.0, state_color(&status.state));
            ui.label(RichText::new(status.state.label()).strong().color(TEXT_NORM));

            self.render_display_menu(ui);

            let failed = matches!(status.state, SessionState::Failed(_));
            if ui.add_enabled(failed, egui::Button::new("Retry")).clicked() {
                self.engine.restart();
            }

            let toggle_label = if self.window.is_visible() { "Hide" } else { "Show" };
            if ui
                .button(toggle_label)
                .on_hover_text(format!("Toggle preview ({})", ctx.format_shortcut(&TOGGLE_SHORTCUT)))
                .clicked()
            {
                self.toggle_preview(ctx);
            }

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if ui
                    .add(
                        egui::Button::new(RichText::new("Quit").color(Color32::from_rgb(220, 80, 70)))
                            .fill(BG_CARD)
                            .stroke(Stroke::new(1.0, Color32::from_rgb(180, 60, 55))),
                    )
                    .clicked()
                {
                    ctx.send_viewport_cmd(ViewportCommand::Close);
                }
                ui.label(
                    RichText::new(format!("{:.0} fps", self.stats.fps))
                        .font(FontId::new(11.5, FontFamily::Monospace))
                        .color(TEXT_DIM),
                );
            });
        });
    }

    /// Display drop-down. The list is re-queried every time it opens so
    /// hot-plugged monitors show up.
    fn render_display_menu(&mut self, ui: &mut egui::Ui) {
        let current = self.engine.current_display();
        let selected_text = self
            .displays
            .iter()
            .find(|d| d.id == current)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("Display {}", current));

        let mut picked = None;
        let response = egui::ComboBox::from_id_salt("display-menu")
            .selected_text(selected_text)
            .width(200.0)
            .show_ui(ui, |ui| {
                if !self.menu_open {
                    self.refresh_displays();
                }
                if self.displays.is_empty() {
                    ui.label(RichText::new("No displays").color(TEXT_DIM));
                }
                for display in &self.displays {
                    let label = format!("{}  ({})", display.name, display.resolution);
                    if ui.selectable_label(display.id == current, label).clicked() {
                        picked = Some(display.id);
                    }
                }
            });
        self.menu_open = response.inner.is_some();

        if let Some(id) = picked {
            if self.engine.switch_display(id) {
                info!("Display menu → {}", id);
            }
        }
    }

    fn render_preview(&self, ui: &mut egui::Ui, status: &EngineStatus) {
        let available = ui.available_size();
        match &self.texture {
            Some(texture) => {
                let size = fit_within(texture.size_vec2(), available);
                ui.centered_and_justified(|ui| {
                    ui.add(egui::Image::new((texture.id(), size)));
                });
            }
            None => {
                ui.centered_and_justified(|ui| {
                    ui.label(RichText::new("Waiting for the first frame…").color(TEXT_DIM));
                });
            }
        }

        if let Some(error) = &status.last_error {
            let rect = ui.max_rect();
            ui.painter().text(
                rect.left_bottom() + Vec2::new(10.0, -10.0),
                egui::Align2::LEFT_BOTTOM,
                format!("Mirroring stopped: {}", error),
                FontId::new(12.0, FontFamily::Proportional),
                TEXT_ERR,
            );
        }
    }
}

/// Largest size with the image's aspect ratio that fits in `available`.
fn fit_within(image: Vec2, available: Vec2) -> Vec2 {
    if image.x <= 0.0 || image.y <= 0.0 {
        return Vec2::ZERO;
    }
    let scale = (available.x / image.x).min(available.y / image.y).max(0.0);
    image * scale
}

// ── EguiSurface ───────────────────────────────────────────────────────────────

/// The eframe root viewport seen as a [`PresentationSurface`].
///
/// Hiding collapses the window to its toolbar: a fully hidden egui window
/// would stop receiving the toggle shortcut.
struct EguiSurface<'a> {
    ctx: &'a egui::Context,
    texture: &'a mut Option<TextureHandle>,
    default_size: Vec2,
}

impl PresentationSurface for EguiSurface<'_> {
    fn geometry(&self) -> Option<Geometry> {
        self.ctx.input(|i| {
            let viewport = i.viewport();
            let outer = viewport.outer_rect?;
            let inner = viewport.inner_rect.unwrap_or(outer);
            Some(Geometry::new(outer.min.x, outer.min.y, inner.width(), inner.height()))
        })
    }

    fn show(&mut self, geometry: Option<Geometry>) {
        match geometry {
            Some(g) => {
                self.ctx
                    .send_viewport_cmd(ViewportCommand::InnerSize(Vec2::new(g.width, g.height)));
                self.ctx
                    .send_viewport_cmd(ViewportCommand::OuterPosition(egui::pos2(g.x, g.y)));
            }
            None => self.ctx.send_viewport_cmd(ViewportCommand::InnerSize(self.default_size)),
        }
        self.ctx.send_viewport_cmd(ViewportCommand::Focus);
    }

    fn hide(&mut self) {
        self.ctx
            .send_viewport_cmd(ViewportCommand::InnerSize(Vec2::new(TOOLBAR_WIDTH, TOOLBAR_HEIGHT)));
    }

    fn present(&mut self, image: PreviewImage) -> Result<(), RendererError> {
        let [width, height] = image.size();
        if image.rgba.len() != width * height * 4 {
            return Err(RendererError::PresentFailed(format!(
                "{} bytes for a {}×{} RGBA image",
                image.rgba.len(),
                width,
                height
            )));
        }
        let color = ColorImage::from_rgba_unmultiplied(image.size(), &image.rgba);
        match self.texture.as_mut() {
            Some(texture) => texture.set(color, TextureOptions::LINEAR),
            None => {
                *self.texture = Some(self.ctx.load_texture("glance-preview", color, TextureOptions::LINEAR));
            }
        }
        Ok(())
    }
}
