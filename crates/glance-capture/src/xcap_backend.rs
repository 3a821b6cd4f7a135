//! Real monitors through the `xcap` crate.
//!
//! `xcap` captures one still image per call, so the stream polls on a
//! frame-rate ticker and runs each grab on the blocking pool. Monitors are
//! looked up by id on every grab; a monitor that has gone away ends the
//! stream with a runtime error.

use async_trait::async_trait;
use glance_core::{
    ActiveDisplay, CaptureError, CaptureSettings, DisplayDescriptor, DisplayId, Frame, Resolution,
};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};
use xcap::Monitor;

use crate::backend::{CaptureBackend, FrameStream};

#[derive(Debug, Default, Clone, Copy)]
pub struct XcapBackend;

impl XcapBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureBackend for XcapBackend {
    fn name(&self) -> &'static str {
        "xcap"
    }

    fn active_displays(&self) -> Result<Vec<ActiveDisplay>, CaptureError> {
        let monitors = Monitor::all().map_err(|e| CaptureError::start(format!("Monitor::all: {e}")))?;

        let mut displays = Vec::with_capacity(monitors.len());
        for monitor in &monitors {
            let Ok(id) = monitor.id() else {
                warn!("[xcap] skipping monitor without id");
                continue;
            };
            displays.push(ActiveDisplay {
                id: DisplayId(id),
                is_main: monitor.is_primary().unwrap_or(false),
                resolution: Resolution::new(
                    monitor.width().unwrap_or(0),
                    monitor.height().unwrap_or(0),
                ),
                name: monitor.name().ok(),
            });
        }
        Ok(displays)
    }

    async fn open(
        &self,
        display: &DisplayDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameStream>, CaptureError> {
        // One trial grab surfaces permission and configuration problems up front.
        let id = display.id;
        tokio::task::spawn_blocking(move || grab(id))
            .await
            .map_err(|e| CaptureError::start(format!("capture worker failed: {e}")))??;

        let mut ticker = tokio::time::interval(settings.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("[xcap] stream opened on {} at {} fps", id, settings.target_fps);
        Ok(Box::new(XcapStream { id, ticker, stopped: false }))
    }
}

struct XcapStream {
    id: DisplayId,
    ticker: Interval,
    stopped: bool,
}

#[async_trait]
impl FrameStream for XcapStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.stopped {
            return Ok(None);
        }
        self.ticker.tick().await;

        let id = self.id;
        let frame = tokio::task::spawn_blocking(move || grab(id))
            .await
            .map_err(|e| CaptureError::runtime(format!("capture worker failed: {e}")))?
            .map_err(CaptureError::into_runtime)?;
        Ok(Some(frame))
    }

    async fn stop(&mut self) {
        self.stopped = true;
    }
}

fn grab(id: DisplayId) -> Result<Frame, CaptureError> {
    let monitors = Monitor::all().map_err(|e| CaptureError::start(format!("Monitor::all: {e}")))?;
    let monitor = monitors
        .into_iter()
        .find(|m| m.id().map(DisplayId).ok() == Some(id))
        .ok_or(CaptureError::DisplayUnavailable { display: id })?;

    let image = monitor
        .capture_image()
        .map_err(|e| CaptureError::start(format!("capture_image: {e}")))?;
    let (width, height) = image.dimensions();

    // xcap hands out RGBA; frames travel as BGRA.
    let mut data = image.into_raw();
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    Ok(Frame::bgra(data, width, height))
}
