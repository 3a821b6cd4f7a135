//! glance-renderer — everything between the [`FrameSink`] and the pixels on
//! screen that does not depend on a particular GUI toolkit.
//!
//! [`FrameSink`]: glance_core::FrameSink

use thiserror::Error;

pub mod presenter;
pub mod window;

pub use presenter::{bgra_to_rgba, FramePresenter, PreviewImage};
pub use window::{Geometry, PreviewVisibility, PreviewWindow};

// MARK: - PresentationSurface trait

/// A window (or view) able to show the preview.
///
/// Implemented by the GUI layer; [`PreviewWindow`] drives it.
pub trait PresentationSurface {
    /// Current placement, if the toolkit can report it.
    fn geometry(&self) -> Option<Geometry>;

    /// Brings the preview on screen, restoring `geometry` when given,
    /// otherwise using the surface's default placement.
    fn show(&mut self, geometry: Option<Geometry>);

    /// Takes the preview off screen.
    fn hide(&mut self);

    /// Replaces the displayed image.
    fn present(&mut self, image: PreviewImage) -> Result<(), RendererError>;
}

// MARK: - RendererError

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to present frame: {0}")]
    PresentFailed(String),

    #[error("Frame buffer too small: {got} bytes for {width}×{height}")]
    IncompleteFrame { got: usize, width: u32, height: u32 },
}
