use async_trait::async_trait;
use glance_core::{ActiveDisplay, CaptureError, CaptureSettings, DisplayDescriptor, Frame};

// ── CaptureBackend ────────────────────────────────────────────────────────────

/// A platform screen-capture implementation.
///
/// Enumerates displays and opens one live stream per call to [`open`].
/// Implementations:
/// - [`VirtualBackend`](crate::VirtualBackend) — in-process test pattern
/// - `XcapBackend` — real monitors (feature `xcap`)
///
/// [`open`]: CaptureBackend::open
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Short identifier used in log lines.
    fn name(&self) -> &'static str;

    /// Currently attached displays, in platform enumeration order.
    fn active_displays(&self) -> Result<Vec<ActiveDisplay>, CaptureError>;

    /// Opens a stream producing BGRA frames of `display` at `settings.target_fps`.
    async fn open(
        &self,
        display: &DisplayDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameStream>, CaptureError>;
}

// ── FrameStream ───────────────────────────────────────────────────────────────

/// One live platform capture stream.
#[async_trait]
pub trait FrameStream: Send {
    /// Awaits the next frame. `Ok(None)` means the stream ended on its own.
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Releases the platform resource. Safe to call more than once.
    async fn stop(&mut self);
}
