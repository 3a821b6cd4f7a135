//! In-process displays that render a moving test pattern.
//!
//! Serves CI and machines without a capturable screen, and lets tests drive
//! hot-plug, slow starts and refused configurations deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use glance_core::{
    ActiveDisplay, CaptureError, CaptureSettings, DisplayDescriptor, DisplayId, Frame, Resolution,
};
use parking_lot::Mutex;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::backend::{CaptureBackend, FrameStream};

// ── VirtualDisplay ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VirtualDisplay {
    pub id: DisplayId,
    pub name: Option<String>,
    pub resolution: Resolution,
    pub is_main: bool,
    /// Simulated time the platform takes to start a stream.
    pub start_latency: Duration,
    /// When set, `open` refuses with this reason.
    pub start_failure: Option<String>,
    /// When set, streams die with a runtime error after this many frames.
    pub fail_after_frames: Option<u64>,
}

impl VirtualDisplay {
    pub fn new(id: u32, width: u32, height: u32) -> Self {
        Self {
            id: DisplayId(id),
            name: None,
            resolution: Resolution::new(width, height),
            is_main: false,
            start_latency: Duration::ZERO,
            start_failure: None,
            fail_after_frames: None,
        }
    }

    pub fn main(mut self) -> Self {
        self.is_main = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_start_latency(mut self, latency: Duration) -> Self {
        self.start_latency = latency;
        self
    }

    pub fn failing_start(mut self, reason: impl Into<String>) -> Self {
        self.start_failure = Some(reason.into());
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }

    fn as_active(&self) -> ActiveDisplay {
        ActiveDisplay {
            id: self.id,
            is_main: self.is_main,
            resolution: self.resolution,
            name: self.name.clone(),
        }
    }
}

// ── VirtualBackend ────────────────────────────────────────────────────────────

/// Cheap to clone; clones share the same set of displays and counters.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

#[derive(Default)]
struct VirtualState {
    displays: Vec<VirtualDisplay>,
    open_streams: usize,
    peak_open_streams: usize,
    streams_opened: u64,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_displays(displays: impl IntoIterator<Item = VirtualDisplay>) -> Self {
        let backend = Self::new();
        for display in displays {
            backend.plug(display);
        }
        backend
    }

    /// A laptop panel plus one external monitor.
    pub fn demo() -> Self {
        Self::with_displays([
            VirtualDisplay::new(1, 1280, 800).main().named("Built-in Display"),
            VirtualDisplay::new(2, 1920, 1080).named("Virtual External"),
        ])
    }

    /// Attaches a display, replacing any with the same id.
    pub fn plug(&self, attached: VirtualDisplay) {
        info!(
            "[virtual] plug {} {} ({})",
            attached.id,
            attached.resolution,
            attached.name.as_deref().unwrap_or("unnamed")
        );
        let mut state = self.state.lock();
        state.displays.retain(|d| d.id != attached.id);
        state.displays.push(attached);
    }

    /// Detaches a display. Streams bound to it fail on their next frame.
    pub fn unplug(&self, id: DisplayId) -> bool {
        let mut state = self.state.lock();
        let before = state.displays.len();
        state.displays.retain(|d| d.id != id);
        let removed = state.displays.len() != before;
        if removed {
            info!("[virtual] unplug {}", id);
        }
        removed
    }

    pub fn set_start_failure(&self, id: DisplayId, reason: Option<String>) {
        if let Some(display) = self.state.lock().displays.iter_mut().find(|d| d.id == id) {
            display.start_failure = reason;
        }
    }

    pub fn set_start_latency(&self, id: DisplayId, latency: Duration) {
        if let Some(display) = self.state.lock().displays.iter_mut().find(|d| d.id == id) {
            display.start_latency = latency;
        }
    }

    /// Streams currently open (opened and not yet stopped or dropped).
    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }

    /// Highest number of simultaneously open streams seen so far.
    pub fn peak_open_streams(&self) -> usize {
        self.state.lock().peak_open_streams
    }

    pub fn streams_opened(&self) -> u64 {
        self.state.lock().streams_opened
    }
}

#[async_trait]
impl CaptureBackend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn active_displays(&self) -> Result<Vec<ActiveDisplay>, CaptureError> {
        Ok(self.state.lock().displays.iter().map(VirtualDisplay::as_active).collect())
    }

    async fn open(
        &self,
        descriptor: &DisplayDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameStream>, CaptureError> {
        let (latency, failure, fail_after) = {
            let state = self.state.lock();
            let found = state
                .displays
                .iter()
                .find(|d| d.id == descriptor.id)
                .ok_or_else(|| CaptureError::start(format!("no virtual display {}", descriptor.id)))?;
            (found.start_latency, found.start_failure.clone(), found.fail_after_frames)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(reason) = failure {
            return Err(CaptureError::start(reason));
        }

        let resolution = {
            let mut state = self.state.lock();
            let resolution = state
                .displays
                .iter()
                .find(|d| d.id == descriptor.id)
                .map(|d| d.resolution)
                .ok_or_else(|| {
                    CaptureError::start(format!("virtual display {} vanished while opening", descriptor.id))
                })?;
            state.open_streams += 1;
            state.streams_opened += 1;
            state.peak_open_streams = state.peak_open_streams.max(state.open_streams);
            resolution
        };

        let mut ticker = tokio::time::interval(settings.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("[virtual] stream opened on {} at {} fps", descriptor.id, settings.target_fps);
        Ok(Box::new(VirtualStream {
            id: descriptor.id,
            resolution,
            ticker,
            frame_no: 0,
            fail_after,
            state: Arc::clone(&self.state),
            released: false,
        }))
    }
}

// ── VirtualStream ─────────────────────────────────────────────────────────────

struct VirtualStream {
    id: DisplayId,
    resolution: Resolution,
    ticker: Interval,
    frame_no: u64,
    fail_after: Option<u64>,
    state: Arc<Mutex<VirtualState>>,
    released: bool,
}

impl VirtualStream {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut state = self.state.lock();
            state.open_streams = state.open_streams.saturating_sub(1);
        }
    }
}

#[async_trait]
impl FrameStream for VirtualStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Ok(None);
        }
        self.ticker.tick().await;

        let attached = self.state.lock().displays.iter().any(|d| d.id == self.id);
        if !attached {
            return Err(CaptureError::DisplayUnavailable { display: self.id });
        }
        if self.fail_after.is_some_and(|limit| self.frame_no >= limit) {
            return Err(CaptureError::runtime(format!(
                "virtual stream on {} gave out after {} frames",
                self.id, self.frame_no
            )));
        }

        self.frame_no += 1;
        Ok(Some(render_pattern(self.id, self.resolution, self.frame_no)))
    }

    async fn stop(&mut self) {
        self.release();
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Horizontal blue ramp, vertical green ramp, a red tint per display and a
/// white bar sweeping across so motion is visible.
fn render_pattern(id: DisplayId, res: Resolution, frame_no: u64) -> Frame {
    let (w, h) = (res.width as usize, res.height as usize);
    let tint = (id.0 as u64 * 60 % 256) as u8;
    let bar_x = (frame_no as usize * 8) % w.max(1);

    let mut data = vec![0u8; w * h * 4];
    for (y, row) in data.chunks_exact_mut(w * 4).enumerate() {
        let green = (y * 255 / h.max(1)) as u8;
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            if x.abs_diff(bar_x) < 4 {
                px.copy_from_slice(&[255, 255, 255, 255]);
            } else {
                px.copy_from_slice(&[(x * 255 / w.max(1)) as u8, green, tint, 255]);
            }
        }
    }
    Frame::bgra(data, res.width, res.height)
}
