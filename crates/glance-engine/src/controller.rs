//! Control task: the only place sessions are created, started and stopped.
//!
//! Requests are coalesced while a start is in flight; only the newest one is
//! acted on once the start resolves. A start that resolves after it was
//! superseded is stopped and thrown away.

use std::sync::Arc;

use glance_capture::{CaptureSession, SessionContext, SessionEvent};
use glance_core::{CaptureError, DisplayId, SessionState};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{EngineStatus, Shared};

#[derive(Debug)]
pub(crate) enum Command {
    Switch { display: DisplayId, epoch: u64 },
    Shutdown { done: oneshot::Sender<()> },
}

/// A spawned start hands its session back together with the result.
struct StartOutcome {
    session: CaptureSession,
    result: Result<(), CaptureError>,
}

pub(crate) struct Controller {
    ctx: SessionContext,
    shared: Arc<Shared>,
    status_tx: watch::Sender<EngineStatus>,
    fallback_on_unavailable: bool,
    /// Session whose start has resolved (running or failed).
    installed: Option<CaptureSession>,
    /// Epoch of the start currently in flight, if any.
    in_flight: Option<u64>,
    /// Newest request not yet acted on.
    desired: Option<(DisplayId, u64)>,
    /// Runtime failure reported by the in-flight session before its start
    /// outcome arrived.
    early_failure: Option<(u64, CaptureError)>,
    outcome_tx: mpsc::UnboundedSender<StartOutcome>,
    outcomes: mpsc::UnboundedReceiver<StartOutcome>,
}

impl Controller {
    pub(crate) fn new(
        ctx: SessionContext,
        shared: Arc<Shared>,
        status_tx: watch::Sender<EngineStatus>,
        fallback_on_unavailable: bool,
    ) -> Self {
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        Self {
            ctx,
            shared,
            status_tx,
            fallback_on_unavailable,
            installed: None,
            in_flight: None,
            desired: None,
            early_failure: None,
            outcome_tx,
            outcomes,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Switch { display, epoch }) => self.request(display, epoch).await,
                    Some(Command::Shutdown { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(outcome) = self.outcomes.recv() => self.on_start_resolved(outcome).await,
                Some(event) = events.recv() => self.on_session_event(event).await,
            }
        }
        debug!("Mirror control task exited");
    }

    // ── requests ──────────────────────────────────────────────────────────────

    async fn request(&mut self, target: DisplayId, epoch: u64) {
        let current = self.shared.current().epoch;
        if epoch < current {
            debug!("Skipping request for {} (epoch {} < {})", target, epoch, current);
            return;
        }
        self.desired = Some((target, epoch));
        self.pump().await;
    }

    /// Acts on the newest request unless a start is still in flight.
    async fn pump(&mut self) {
        if let Some(in_flight) = self.in_flight {
            debug!("Start for epoch {} in flight; newest request queued", in_flight);
            return;
        }
        let Some((target, epoch)) = self.desired.take() else {
            return;
        };

        if let Some(mut previous) = self.installed.take() {
            previous.stop().await;
        }

        self.ctx.sink.retarget(epoch);
        self.in_flight = Some(epoch);
        self.early_failure = None;
        self.publish(target, epoch, SessionState::Starting);

        let mut session = CaptureSession::new(target, epoch, self.ctx.clone());
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = session.start().await;
            let _ = outcome_tx.send(StartOutcome { session, result });
        });
    }

    // ── completions ───────────────────────────────────────────────────────────

    async fn on_start_resolved(&mut self, outcome: StartOutcome) {
        let StartOutcome { mut session, result } = outcome;
        self.in_flight = None;
        let early_failure = self
            .early_failure
            .take()
            .filter(|(epoch, _)| *epoch == session.epoch())
            .map(|(_, error)| error);

        let current = self.shared.current().epoch;
        if session.epoch() != current || self.desired.is_some() {
            debug!(
                "Discarding superseded start of {} (epoch {}, current {})",
                session.display(),
                session.epoch(),
                current
            );
            session.stop().await;
            self.pump().await;
            return;
        }

        let (target, epoch) = (session.display(), session.epoch());
        match (result, early_failure) {
            (Ok(()), Some(error)) => {
                warn!("Lost {} right after start: {}", target, error);
                session.fail(error.clone()).await;
                self.installed = Some(session);
                self.publish(target, epoch, SessionState::Failed(error));
            }
            (Ok(()), None) => {
                info!("Mirroring {} (epoch {})", target, epoch);
                self.installed = Some(session);
                self.publish(target, epoch, SessionState::Running);
            }
            (Err(error), _) => {
                self.installed = Some(session);
                self.publish(target, epoch, SessionState::Failed(error.clone()));
                if self.fallback_on_unavailable && matches!(error, CaptureError::DisplayUnavailable { .. }) {
                    self.fall_back(target);
                }
            }
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        let SessionEvent::StreamFailed { epoch, display: failed_on, error } = event;
        match self.installed.as_mut() {
            Some(session) if session.epoch() == epoch && session.state() == &SessionState::Running => {
                warn!("Lost {} mid-stream: {}; keeping last frame", failed_on, error);
                session.fail(error.clone()).await;
                self.publish(failed_on, epoch, SessionState::Failed(error));
            }
            // The start outcome is still on its way; apply the failure once it lands.
            _ if self.in_flight == Some(epoch) => {
                debug!("Failure from {} (epoch {}) before its start resolved", failed_on, epoch);
                self.early_failure = Some((epoch, error));
            }
            _ => debug!("Ignoring failure from superseded session {} (epoch {})", failed_on, epoch),
        }
    }

    /// Points the engine at the first capturable display other than `failed`.
    /// The resulting request goes through the command queue like any switch.
    fn fall_back(&self, failed: DisplayId) {
        match self.ctx.catalog.first_capturable() {
            Ok(Some(first)) if first != failed => {
                if let Some(epoch) = self.shared.retarget(first) {
                    info!("{} unavailable, falling back to {} (epoch {})", failed, first, epoch);
                }
            }
            Ok(_) => warn!("{} unavailable and no other display to fall back to", failed),
            Err(e) => warn!("Fallback lookup failed: {}", e),
        }
    }

    // ── shutdown ──────────────────────────────────────────────────────────────

    async fn shutdown(&mut self) {
        self.desired = None;
        if self.in_flight.take().is_some() {
            if let Some(StartOutcome { mut session, .. }) = self.outcomes.recv().await {
                session.stop().await;
            }
        }
        if let Some(mut session) = self.installed.take() {
            session.stop().await;
        }
        let target = self.shared.current();
        self.publish(target.display, target.epoch, SessionState::Idle);
        info!("Mirror engine shut down");
    }

    fn publish(&self, display: DisplayId, epoch: u64, state: SessionState) {
        self.status_tx.send_modify(|status| {
            status.last_error = match &state {
                SessionState::Failed(error) => Some(error.clone()),
                SessionState::Running => None,
                _ => status.last_error.take(),
            };
            status.display = display;
            status.epoch = epoch;
            status.state = state;
        });
    }
}
