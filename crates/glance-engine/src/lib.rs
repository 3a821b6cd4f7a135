//! glance-engine — the single authority over what is being mirrored.
//!
//! # Flow
//!
//! ```text
//! menu / hotkey ──► MirrorEngine::switch_display(to)
//!                     │  target = to, epoch += 1   (visible immediately)
//!                     ▼
//!               control task ── stop installed session ── start new session
//!                     ▲                                         │ (spawned)
//!                     └──────── StartOutcome { epoch } ◄────────┘
//!                               installed only if epoch is still current
//! ```
//!
//! Capture keeps running while the preview is hidden; switching back is then
//! instant.

use std::sync::Arc;

use glance_capture::{DisplayCatalog, SessionContext};
use glance_core::{CaptureError, CaptureSettings, DisplayId, FrameSink, SessionState};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

mod controller;

use controller::{Command, Controller};

// ── EngineStatus ──────────────────────────────────────────────────────────────

/// Snapshot published on every state transition of the mirrored session.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    /// Display the reported session is bound to.
    pub display: DisplayId,
    pub epoch: u64,
    pub state: SessionState,
    /// Most recent failure; cleared once a session reaches `Running`.
    pub last_error: Option<CaptureError>,
}

impl EngineStatus {
    pub fn is_running_on(&self, display: DisplayId) -> bool {
        self.display == display && self.state == SessionState::Running
    }
}

// ── Target ────────────────────────────────────────────────────────────────────

/// Requested display plus the epoch the request was issued under.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Target {
    pub display: DisplayId,
    pub epoch: u64,
}

/// Shared between the handle and the control task.
pub(crate) struct Shared {
    target: Mutex<Target>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shared {
    pub(crate) fn current(&self) -> Target {
        *self.target.lock()
    }

    /// Points the engine at `display` and queues the start. `None` if it
    /// already was the target.
    pub(crate) fn retarget(&self, display: DisplayId) -> Option<u64> {
        let mut target = self.target.lock();
        if target.display == display {
            return None;
        }
        Some(Self::issue(&mut target, &self.commands, display))
    }

    /// Re-issues a start for the current target.
    pub(crate) fn reissue(&self) -> u64 {
        let mut target = self.target.lock();
        let display = target.display;
        Self::issue(&mut target, &self.commands, display)
    }

    // Sent while holding the lock so commands reach the control task in epoch order.
    fn issue(target: &mut Target, commands: &mpsc::UnboundedSender<Command>, display: DisplayId) -> u64 {
        target.display = display;
        target.epoch += 1;
        let _ = commands.send(Command::Switch { display, epoch: target.epoch });
        target.epoch
    }
}

// ── MirrorEngine ──────────────────────────────────────────────────────────────

/// Owned handle to the mirror engine; hand it (by reference) to the menu,
/// hotkey and window code that issue commands.
pub struct MirrorEngine {
    shared: Arc<Shared>,
    status_rx: watch::Receiver<EngineStatus>,
    catalog: DisplayCatalog,
    sink: Arc<FrameSink>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorEngine {
    /// Spawns the control task on the current tokio runtime and starts
    /// capturing `initial`.
    pub fn initialize(
        catalog: DisplayCatalog,
        sink: Arc<FrameSink>,
        settings: CaptureSettings,
        initial: DisplayId,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(EngineStatus {
            display: initial,
            epoch: 0,
            state: SessionState::Idle,
            last_error: None,
        });

        let shared = Arc::new(Shared {
            target: Mutex::new(Target { display: initial, epoch: 0 }),
            commands: commands_tx,
        });

        let fallback = settings.fallback_on_unavailable;
        let ctx = SessionContext {
            catalog: catalog.clone(),
            sink: Arc::clone(&sink),
            events: events_tx,
            settings,
        };
        let controller = Controller::new(ctx, Arc::clone(&shared), status_tx, fallback);
        let control = tokio::spawn(controller.run(commands_rx, events_rx));

        info!(
            "Mirror engine up ({} backend), initial display {}",
            catalog.backend().name(),
            initial
        );
        shared.reissue();

        Self {
            shared,
            status_rx,
            catalog,
            sink,
            control: Mutex::new(Some(control)),
        }
    }

    /// The display the engine is mirroring or about to mirror.
    ///
    /// Reflects the latest [`switch_display`](Self::switch_display) call
    /// immediately, before the stream has physically switched.
    pub fn current_display(&self) -> DisplayId {
        self.shared.current().display
    }

    /// Mirrors `to` instead of the current display. Returns `false` (and does
    /// nothing) if `to` is already the current display.
    pub fn switch_display(&self, to: DisplayId) -> bool {
        match self.shared.retarget(to) {
            Some(epoch) => {
                info!("Switch requested → {} (epoch {})", to, epoch);
                true
            }
            None => false,
        }
    }

    /// Starts the current display again, e.g. after a failure.
    pub fn restart(&self) {
        let epoch = self.shared.reissue();
        info!("Restart requested for {} (epoch {})", self.current_display(), epoch);
    }

    pub fn status(&self) -> EngineStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    pub fn sink(&self) -> &Arc<FrameSink> {
        &self.sink
    }

    pub fn catalog(&self) -> &DisplayCatalog {
        &self.catalog
    }

    /// Stops the active session and ends the control task. Idempotent.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.shared.commands.send(Command::Shutdown { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
        let control = self.control.lock().take();
        if let Some(handle) = control {
            let _ = handle.await;
        }
    }
}

impl Drop for MirrorEngine {
    fn drop(&mut self) {
        // Dropped without `shutdown()`: the control task still stops the session.
        let (done, _) = oneshot::channel();
        let _ = self.shared.commands.send(Command::Shutdown { done });
    }
}

impl std::fmt::Debug for MirrorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorEngine")
            .field("target", &self.shared.current())
            .field("status", &*self.status_rx.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glance_capture::{VirtualBackend, VirtualDisplay};

    use super::*;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            target_fps: 100,
            start_timeout_ms: 2_000,
            stop_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn three_displays() -> VirtualBackend {
        VirtualBackend::with_displays([
            VirtualDisplay::new(1, 32, 20).main(),
            VirtualDisplay::new(2, 48, 27).named("Projector"),
            VirtualDisplay::new(3, 64, 36).named("Side panel"),
        ])
    }

    fn engine(backend: &VirtualBackend, settings: CaptureSettings, display: u32) -> MirrorEngine {
        MirrorEngine::initialize(
            DisplayCatalog::new(Arc::new(backend.clone())),
            Arc::new(FrameSink::new()),
            settings,
            DisplayId(display),
        )
    }

    async fn wait_status(engine: &MirrorEngine, pred: impl FnMut(&EngineStatus) -> bool) -> EngineStatus {
        let mut rx = engine.subscribe();
        let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for engine status")
            .expect("engine gone");
        status.clone()
    }

    async fn wait_frame_sized(sink: &FrameSink, width: u32, height: u32) {
        let probe = async {
            let mut seen = 0;
            loop {
                seen = sink.wait_newer(seen).await;
                if let Some((_, frame)) = sink.latest() {
                    if (frame.width, frame.height) == (width, height) {
                        return;
                    }
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), probe)
            .await
            .expect("no frame of the expected size");
    }

    #[tokio::test]
    async fn initialize_mirrors_the_requested_display() {
        let backend = three_displays();
        let engine = engine(&backend, settings(), 1);

        let status = wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;
        assert_eq!(status.epoch, 1);
        assert_eq!(status.last_error, None);
        assert_eq!(engine.current_display(), DisplayId(1));

        wait_frame_sized(engine.sink(), 32, 20).await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn switch_is_visible_immediately_and_moves_the_stream() {
        let backend = three_displays();
        let engine = engine(&backend, settings(), 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        assert!(engine.switch_display(DisplayId(2)));
        assert_eq!(engine.current_display(), DisplayId(2));

        let status = wait_status(&engine, |s| s.is_running_on(DisplayId(2))).await;
        assert_eq!(status.epoch, 2);
        wait_frame_sized(engine.sink(), 48, 27).await;

        assert_eq!(backend.open_streams(), 1);
        assert_eq!(backend.peak_open_streams(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn switching_to_the_current_display_does_nothing() {
        let backend = three_displays();
        let engine = engine(&backend, settings(), 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        assert!(!engine.switch_display(DisplayId(1)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.status().epoch, 1);
        assert_eq!(backend.streams_opened(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn latest_switch_wins_when_the_earlier_start_is_slower() {
        let backend = three_displays();
        backend.set_start_latency(DisplayId(2), Duration::from_millis(200));
        let engine = engine(&backend, settings(), 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        engine.switch_display(DisplayId(2));
        // Let the start for display 2 get under way before superseding it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.switch_display(DisplayId(3));
        assert_eq!(engine.current_display(), DisplayId(3));

        wait_status(&engine, |s| s.is_running_on(DisplayId(3))).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = engine.status();
        assert!(status.is_running_on(DisplayId(3)), "{status:?}");
        assert_eq!(status.epoch, 3);
        wait_frame_sized(engine.sink(), 64, 36).await;
        assert_eq!(backend.open_streams(), 1);
        assert_eq!(backend.peak_open_streams(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn latest_switch_wins_when_the_later_start_is_slower() {
        let backend = three_displays();
        backend.set_start_latency(DisplayId(3), Duration::from_millis(150));
        let engine = engine(&backend, settings(), 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        engine.switch_display(DisplayId(2));
        tokio::task::yield_now().await;
        engine.switch_display(DisplayId(3));

        wait_status(&engine, |s| s.is_running_on(DisplayId(3))).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(engine.status().is_running_on(DisplayId(3)));
        wait_frame_sized(engine.sink(), 64, 36).await;
        assert_eq!(backend.open_streams(), 1);
        assert_eq!(backend.peak_open_streams(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn display_unplugged_during_start_fails_then_next_switch_recovers() {
        let backend = three_displays();
        backend.set_start_latency(DisplayId(2), Duration::from_millis(100));
        let engine = engine(&backend, settings(), 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        engine.switch_display(DisplayId(2));
        backend.unplug(DisplayId(2));

        let status = wait_status(&engine, |s| matches!(s.state, SessionState::Failed(_))).await;
        let unavailable = CaptureError::DisplayUnavailable { display: DisplayId(2) };
        assert_eq!(status.display, DisplayId(2));
        assert_eq!(status.state, SessionState::Failed(unavailable.clone()));
        assert_eq!(status.last_error, Some(unavailable));
        assert_eq!(engine.current_display(), DisplayId(2), "no fallback by default");

        engine.switch_display(DisplayId(3));
        let status = wait_status(&engine, |s| s.is_running_on(DisplayId(3))).await;
        assert_eq!(status.last_error, None);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn unavailable_display_falls_back_when_enabled() {
        let backend = three_displays();
        backend.set_start_latency(DisplayId(3), Duration::from_millis(100));
        let settings = CaptureSettings {
            fallback_on_unavailable: true,
            ..settings()
        };
        let engine = engine(&backend, settings, 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        engine.switch_display(DisplayId(3));
        backend.unplug(DisplayId(3));

        // Display 2 is now the only external, so it heads the capturable list.
        wait_status(&engine, |s| s.is_running_on(DisplayId(2))).await;
        assert_eq!(engine.current_display(), DisplayId(2));
        assert!(backend.peak_open_streams() <= 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn runtime_loss_keeps_last_frame_without_restarting() {
        let backend = three_displays();
        let engine = engine(&backend, settings(), 2);
        wait_status(&engine, |s| s.is_running_on(DisplayId(2))).await;
        wait_frame_sized(engine.sink(), 48, 27).await;

        backend.unplug(DisplayId(2));
        let status = wait_status(&engine, |s| matches!(s.state, SessionState::Failed(_))).await;
        assert!(matches!(status.state, SessionState::Failed(CaptureError::StreamRuntime { .. })));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.streams_opened(), 1, "no automatic restart");
        assert_eq!(backend.open_streams(), 0);
        assert!(engine.sink().latest().is_some(), "last frame stays on screen");
        assert_eq!(engine.status().epoch, status.epoch);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_dying_on_its_first_frame_is_never_reported_running() {
        let backend = VirtualBackend::with_displays([
            VirtualDisplay::new(1, 32, 20).main(),
            VirtualDisplay::new(2, 48, 27).failing_after(0),
        ]);
        let engine = engine(&backend, settings(), 2);

        // The failure event and the start outcome race each other; repeat so
        // both orders get exercised.
        for epoch in 1..=20 {
            if epoch > 1 {
                engine.restart();
            }
            let status = wait_status(&engine, |s| s.epoch == epoch && matches!(s.state, SessionState::Failed(_))).await;
            assert!(
                matches!(status.last_error, Some(CaptureError::StreamRuntime { .. })),
                "{status:?}"
            );
            assert_eq!(backend.open_streams(), 0);
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn start_error_waits_for_an_explicit_restart() {
        let backend = three_displays();
        backend.set_start_failure(DisplayId(2), Some("format rejected".into()));
        let engine = engine(&backend, settings(), 2);

        let status = wait_status(&engine, |s| matches!(s.state, SessionState::Failed(_))).await;
        assert_eq!(status.state, SessionState::Failed(CaptureError::start("format rejected")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.status(), status);

        backend.set_start_failure(DisplayId(2), None);
        engine.restart();
        let status = wait_status(&engine, |s| s.is_running_on(DisplayId(2))).await;
        assert_eq!(status.epoch, 2);
        assert_eq!(status.last_error, None);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_the_stream_and_is_idempotent() {
        let backend = three_displays();
        let engine = engine(&backend, settings(), 1);
        wait_status(&engine, |s| s.is_running_on(DisplayId(1))).await;

        engine.shutdown().await;
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(engine.status().state, SessionState::Idle);

        engine.shutdown().await;
        assert_eq!(backend.streams_opened(), 1);
    }

    #[tokio::test]
    async fn shutdown_during_a_start_stops_the_late_session() {
        let backend = three_displays();
        backend.set_start_latency(DisplayId(1), Duration::from_millis(150));
        let engine = engine(&backend, settings(), 1);

        engine.shutdown().await;
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(engine.status().state, SessionState::Idle);
    }
}
