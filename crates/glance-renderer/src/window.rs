use tracing::debug;

use crate::PresentationSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewVisibility {
    #[default]
    Visible,
    Hidden,
}

/// Window placement in screen points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Geometry {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Show/hide bookkeeping for the preview.
///
/// The last known geometry survives hide/show cycles for the lifetime of the
/// process and is never written to disk.
#[derive(Debug, Default)]
pub struct PreviewWindow {
    visibility: PreviewVisibility,
    last_geometry: Option<Geometry>,
}

impl PreviewWindow {
    pub fn new(visibility: PreviewVisibility) -> Self {
        Self { visibility, last_geometry: None }
    }

    pub fn visibility(&self) -> PreviewVisibility {
        self.visibility
    }

    pub fn is_visible(&self) -> bool {
        self.visibility == PreviewVisibility::Visible
    }

    pub fn last_geometry(&self) -> Option<Geometry> {
        self.last_geometry
    }

    pub fn show(&mut self, surface: &mut dyn PresentationSurface) {
        surface.show(self.last_geometry);
        self.visibility = PreviewVisibility::Visible;
    }

    pub fn hide(&mut self, surface: &mut dyn PresentationSurface) {
        if let Some(geometry) = surface.geometry() {
            self.last_geometry = Some(geometry);
        }
        surface.hide();
        self.visibility = PreviewVisibility::Hidden;
    }

    pub fn toggle(&mut self, surface: &mut dyn PresentationSurface) -> PreviewVisibility {
        match self.visibility {
            PreviewVisibility::Visible => self.hide(surface),
            PreviewVisibility::Hidden => self.show(surface),
        }
        debug!("Preview toggled → {:?}", self.visibility);
        self.visibility
    }

    /// Remembers where the window was when it got closed.
    pub fn record_close(&mut self, geometry: Option<Geometry>) {
        if geometry.is_some() {
            self.last_geometry = geometry;
        }
    }
}
