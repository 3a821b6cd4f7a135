//! `CaptureSession` — one platform stream bound to one display.
//!
//! ```text
//!  Idle ──start()──► Starting ──ok──► Running ──stop()──► Stopping ──► Idle
//!                       │                │
//!                       └──err──► Failed ◄── fail() (runtime fault)
//! ```
//!
//! Frames are pulled on a dedicated delivery task and pushed into the shared
//! [`FrameSink`]. Each publish happens under the session's delivery gate;
//! [`CaptureSession::stop`] closes the gate first, so no frame of this session
//! reaches the sink once `stop` has returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glance_core::{CaptureError, CaptureSettings, DisplayId, FrameSink, SessionState};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::FrameStream;
use crate::catalog::DisplayCatalog;

// ── Events ────────────────────────────────────────────────────────────────────

/// Reported by the delivery task to whoever owns the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The running stream died; the owner should call [`CaptureSession::fail`].
    StreamFailed {
        epoch: u64,
        display: DisplayId,
        error: CaptureError,
    },
}

// ── SessionContext ────────────────────────────────────────────────────────────

/// Collaborators shared by every session an owner creates.
#[derive(Clone)]
pub struct SessionContext {
    pub catalog: DisplayCatalog,
    pub sink: Arc<FrameSink>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub settings: CaptureSettings,
}

// ── CaptureSession ────────────────────────────────────────────────────────────

pub struct CaptureSession {
    display: DisplayId,
    epoch: u64,
    state: SessionState,
    ctx: SessionContext,
    delivery: Option<Delivery>,
    frames: Arc<AtomicU64>,
}

struct Delivery {
    /// `true` while frames may be published.
    gate: Arc<Mutex<bool>>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CaptureSession {
    /// Creates an idle session for `display`. Frames are published under `epoch`.
    pub fn new(display: DisplayId, epoch: u64, ctx: SessionContext) -> Self {
        Self {
            display,
            epoch,
            state: SessionState::Idle,
            ctx,
            delivery: None,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Frames this session got accepted by the sink.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Opens the platform stream and begins delivering frames.
    ///
    /// A session that is already starting or running is left alone.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.state.is_active() {
            return Ok(());
        }
        self.transition(SessionState::Starting);

        match self.open_stream().await {
            Ok(stream) => {
                self.delivery = Some(self.spawn_delivery(stream));
                self.transition(SessionState::Running);
                Ok(())
            }
            Err(error) => {
                warn!(
                    "Capture[{}] start failed ({}): {}",
                    self.display,
                    error.kind(),
                    error
                );
                self.transition(SessionState::Failed(error.clone()));
                Err(error)
            }
        }
    }

    /// Stops delivery and releases the stream. Always safe; ends in `Idle`.
    pub async fn stop(&mut self) {
        if self.delivery.is_none() {
            if self.state != SessionState::Idle {
                self.transition(SessionState::Idle);
            }
            return;
        }
        self.transition(SessionState::Stopping);
        self.release().await;
        self.transition(SessionState::Idle);
    }

    /// Handles a runtime fault: releases the stream and moves to `Failed`.
    /// There is no retry.
    pub async fn fail(&mut self, error: CaptureError) {
        self.release().await;
        warn!("Capture[{}] stream failed: {}", self.display, error);
        self.transition(SessionState::Failed(error));
    }

    // ── internals ─────────────────────────────────────────────────────────────

    async fn open_stream(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        let descriptor = self.ctx.catalog.resolve(self.display)?;
        let backend = self.ctx.catalog.backend();
        let limit = self.ctx.settings.start_timeout();

        debug!(
            "Capture[{}] opening {} stream '{}' {} (epoch {})",
            self.display,
            backend.name(),
            descriptor.name,
            descriptor.resolution,
            self.epoch
        );

        match tokio::time::timeout(limit, backend.open(&descriptor, &self.ctx.settings)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(self.classify_start_failure(error)),
            Err(_) => Err(CaptureError::start(format!(
                "{} backend did not start within {} ms",
                backend.name(),
                limit.as_millis()
            ))),
        }
    }

    /// A refusal caused by the display disappearing mid-open is reported as
    /// `DisplayUnavailable`; anything else is a start error.
    fn classify_start_failure(&self, error: CaptureError) -> CaptureError {
        if let Err(unavailable @ CaptureError::DisplayUnavailable { .. }) =
            self.ctx.catalog.resolve(self.display)
        {
            return unavailable;
        }
        match error {
            CaptureError::StreamRuntime { reason } => CaptureError::StreamStart { reason },
            other => other,
        }
    }

    fn spawn_delivery(&self, mut stream: Box<dyn FrameStream>) -> Delivery {
        let gate = Arc::new(Mutex::new(true));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let (epoch, display_id) = (self.epoch, self.display);
        let sink = Arc::clone(&self.ctx.sink);
        let events = self.ctx.events.clone();
        let frames = Arc::clone(&self.frames);
        let task_gate = Arc::clone(&gate);

        let task = tokio::spawn(async move {
            let failure = loop {
                tokio::select! {
                    _ = &mut stop_rx => break None,
                    next = stream.next_frame() => match next {
                        Ok(Some(frame)) => {
                            let open = {
                                let open = task_gate.lock();
                                if *open && sink.publish(epoch, frame) {
                                    let n = frames.fetch_add(1, Ordering::Relaxed) + 1;
                                    if n == 1 {
                                        info!("Capture[{display_id}] first frame delivered");
                                    }
                                }
                                *open
                            };
                            if !open {
                                break None;
                            }
                        }
                        Ok(None) => break Some(CaptureError::runtime("capture stream ended")),
                        Err(error) => break Some(error.into_runtime()),
                    }
                }
            };

            stream.stop().await;

            if let Some(error) = failure {
                // A closed gate means the owner is already tearing the session down.
                if *task_gate.lock() {
                    let _ = events.send(SessionEvent::StreamFailed { epoch, display: display_id, error });
                }
            }
            debug!("Capture[{display_id}] delivery task exiting (epoch {epoch})");
        });

        Delivery { gate, stop_tx, task }
    }

    async fn release(&mut self) {
        let Some(Delivery { gate, stop_tx, mut task }) = self.delivery.take() else {
            return;
        };

        *gate.lock() = false;
        let _ = stop_tx.send(());

        let limit = self.ctx.settings.stop_timeout();
        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Capture[{}] delivery task panicked: {}", self.display, e),
            Err(_) => {
                warn!(
                    "Capture[{}] stream did not stop within {} ms, aborting delivery task",
                    self.display,
                    limit.as_millis()
                );
                task.abort();
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        match &next {
            SessionState::Failed(_) => {}
            other => info!(
                "Capture[{}] {} → {} (epoch {})",
                self.display,
                self.state.label(),
                other.label(),
                self.epoch
            ),
        }
        self.state = next;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            *delivery.gate.lock() = false;
            let _ = delivery.stop_tx.send(());
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("display", &self.display)
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::virtual_backend::{VirtualBackend, VirtualDisplay};

    fn context(backend: &VirtualBackend) -> (SessionContext, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            catalog: DisplayCatalog::new(Arc::new(backend.clone())),
            sink: Arc::new(FrameSink::new()),
            events,
            settings: CaptureSettings {
                target_fps: 100,
                start_timeout_ms: 1_000,
                stop_timeout_ms: 1_000,
                ..Default::default()
            },
        };
        (ctx, event_rx)
    }

    fn two_displays() -> VirtualBackend {
        VirtualBackend::with_displays([
            VirtualDisplay::new(1, 32, 20).main(),
            VirtualDisplay::new(2, 48, 27).named("Projector"),
        ])
    }

    #[tokio::test]
    async fn start_runs_and_delivers_frames_of_the_bound_display() {
        let backend = two_displays();
        let (ctx, _events) = context(&backend);
        let sink = Arc::clone(&ctx.sink);

        let mut session = CaptureSession::new(DisplayId(2), 0, ctx);
        session.start().await.expect("start");
        assert_eq!(session.state(), &SessionState::Running);

        tokio::time::timeout(Duration::from_secs(2), sink.wait_newer(0))
            .await
            .expect("frame delivered");
        let (_, frame) = sink.latest().expect("frame");
        assert_eq!((frame.width, frame.height), (48, 27));

        session.stop().await;
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn stop_on_idle_session_is_a_no_op() {
        let backend = two_displays();
        let (ctx, _events) = context(&backend);
        let mut session = CaptureSession::new(DisplayId(1), 0, ctx);

        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(backend.streams_opened(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_frames_arrive_after_stop_returns() {
        let backend = two_displays();
        let (ctx, _events) = context(&backend);
        let sink = Arc::clone(&ctx.sink);

        let mut session = CaptureSession::new(DisplayId(2), 0, ctx);
        session.start().await.expect("start");
        tokio::time::timeout(Duration::from_secs(2), sink.wait_newer(2))
            .await
            .expect("a few frames");

        session.stop().await;
        let after_stop = sink.sequence();
        let delivered = session.frames_delivered();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.sequence(), after_stop);
        assert_eq!(session.frames_delivered(), delivered);
    }

    #[tokio::test]
    async fn missing_display_fails_with_display_unavailable() {
        let backend = two_displays();
        let (ctx, _events) = context(&backend);
        backend.unplug(DisplayId(2));

        let mut session = CaptureSession::new(DisplayId(2), 0, ctx);
        let err = session.start().await.expect_err("display gone");
        assert_eq!(err, CaptureError::DisplayUnavailable { display: DisplayId(2) });
        assert_eq!(session.state(), &SessionState::Failed(err));
    }

    #[tokio::test]
    async fn display_unplugged_while_opening_is_unavailable() {
        let backend = two_displays();
        backend.set_start_latency(DisplayId(2), Duration::from_millis(80));
        let (ctx, _events) = context(&backend);

        let unplugger = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            unplugger.unplug(DisplayId(2));
        });

        let mut session = CaptureSession::new(DisplayId(2), 0, ctx);
        let err = session.start().await.expect_err("display gone");
        assert_eq!(err, CaptureError::DisplayUnavailable { display: DisplayId(2) });
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn refused_configuration_is_a_start_error() {
        let backend = two_displays();
        backend.set_start_failure(DisplayId(1), Some("format rejected".into()));
        let (ctx, _events) = context(&backend);

        let mut session = CaptureSession::new(DisplayId(1), 0, ctx);
        let err = session.start().await.expect_err("refused");
        assert_eq!(err, CaptureError::start("format rejected"));
        assert!(matches!(session.state(), SessionState::Failed(CaptureError::StreamStart { .. })));
    }

    #[tokio::test]
    async fn slow_start_times_out_as_start_error() {
        let backend = two_displays();
        backend.set_start_latency(DisplayId(1), Duration::from_secs(5));
        let (mut ctx, _events) = context(&backend);
        ctx.settings.start_timeout_ms = 50;

        let mut session = CaptureSession::new(DisplayId(1), 0, ctx);
        let err = session.start().await.expect_err("timed out");
        assert!(matches!(err, CaptureError::StreamStart { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn runtime_fault_is_reported_then_session_fails() {
        let backend = two_displays();
        let (ctx, mut events) = context(&backend);
        let sink = Arc::clone(&ctx.sink);

        let mut session = CaptureSession::new(DisplayId(2), 7, ctx);
        sink.retarget(7);
        session.start().await.expect("start");
        tokio::time::timeout(Duration::from_secs(2), sink.wait_newer(0))
            .await
            .expect("frame");

        backend.unplug(DisplayId(2));
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        let SessionEvent::StreamFailed { epoch, display, error } = event;
        assert_eq!((epoch, display), (7, DisplayId(2)));
        assert!(matches!(error, CaptureError::StreamRuntime { .. }));

        session.fail(error.clone()).await;
        assert_eq!(session.state(), &SessionState::Failed(error));
        assert!(sink.latest().is_some(), "last frame is kept");
        assert_eq!(backend.open_streams(), 0);
    }
}
