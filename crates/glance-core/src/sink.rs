//! Single-slot, latest-wins hand-off between a capture producer and the
//! presentation side.
//!
//! The producer never waits on the consumer: publishing replaces whatever
//! frame is in the slot. Consumers either poll [`FrameSink::latest`] or await
//! [`FrameSink::wait_newer`]; a repaint hook can be registered for UI loops.

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::types::Frame;

type PublishHook = Box<dyn Fn() + Send + Sync>;

pub struct FrameSink {
    slot: Mutex<Slot>,
    notify: Notify,
    on_publish: RwLock<Option<PublishHook>>,
}

#[derive(Default)]
struct Slot {
    /// Only frames tagged with this epoch are accepted.
    accepted_epoch: u64,
    /// Bumped on every accepted frame; 0 means "nothing published yet".
    sequence: u64,
    latest: Option<Frame>,
    rejected: u64,
}

impl FrameSink {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            notify: Notify::new(),
            on_publish: RwLock::new(None),
        }
    }

    /// Registers a callback run after every accepted frame (e.g. a UI repaint request).
    pub fn set_on_publish(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_publish.write() = Some(Box::new(hook));
    }

    /// From now on accept only frames tagged with `epoch`.
    ///
    /// The frame already in the slot stays there until replaced.
    pub fn retarget(&self, epoch: u64) {
        self.slot.lock().accepted_epoch = epoch;
    }

    pub fn accepted_epoch(&self) -> u64 {
        self.slot.lock().accepted_epoch
    }

    /// Replaces the held frame. Returns `false` if `epoch` is stale.
    pub fn publish(&self, epoch: u64, frame: Frame) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.accepted_epoch != epoch {
                slot.rejected += 1;
                return false;
            }
            slot.sequence += 1;
            slot.latest = Some(frame);
        }
        self.notify.notify_waiters();
        if let Some(hook) = self.on_publish.read().as_ref() {
            hook();
        }
        true
    }

    /// Newest frame and its sequence number, without removing it.
    pub fn latest(&self) -> Option<(u64, Frame)> {
        let slot = self.slot.lock();
        slot.latest.clone().map(|f| (slot.sequence, f))
    }

    pub fn sequence(&self) -> u64 {
        self.slot.lock().sequence
    }

    /// Frames dropped because they belonged to a superseded epoch.
    pub fn rejected(&self) -> u64 {
        self.slot.lock().rejected
    }

    /// Resolves with the current sequence once it is greater than `seen`.
    pub async fn wait_newer(&self, seen: u64) -> u64 {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let sequence = self.sequence();
            if sequence > seen {
                return sequence;
            }
            notified.await;
        }
    }
}

impl Default for FrameSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("FrameSink")
            .field("accepted_epoch", &slot.accepted_epoch)
            .field("sequence", &slot.sequence)
            .field("rejected", &slot.rejected)
            .finish()
    }
}
