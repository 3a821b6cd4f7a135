//! glance-capture — display enumeration and the capture-session lifecycle.
//!
//! # Backends
//!
//! | Backend | Source | Feature |
//! |---------|--------|---------|
//! | [`VirtualBackend`] | in-process test-pattern displays | always |
//! | `XcapBackend` | real monitors via `xcap` | `xcap` |
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), glance_core::CaptureError> {
//! use std::sync::Arc;
//! use glance_capture::{CaptureSession, DisplayCatalog, SessionContext, VirtualBackend};
//! use glance_core::{CaptureSettings, FrameSink};
//!
//! let catalog = DisplayCatalog::new(Arc::new(VirtualBackend::demo()));
//! let (events, _event_rx) = tokio::sync::mpsc::unbounded_channel();
//! let ctx = SessionContext {
//!     catalog: catalog.clone(),
//!     sink: Arc::new(FrameSink::new()),
//!     events,
//!     settings: CaptureSettings::default(),
//! };
//! let display = catalog.list_capturable()?[0];
//! let mut session = CaptureSession::new(display, 0, ctx);
//! session.start().await?;
//! // frames now land in the sink
//! session.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! DisplayCatalog ──► resolve(display) ──► CaptureBackend::open()
//!                                               │
//!                                               ▼
//!                              FrameStream::next_frame()  (delivery task)
//!                                               │ delivery gate
//!                                               ▼
//!                                   FrameSink::publish(epoch, frame)
//! ```

pub mod backend;
pub mod catalog;
pub mod session;
pub mod virtual_backend;

#[cfg(feature = "xcap")]
pub mod xcap_backend;

pub use backend::{CaptureBackend, FrameStream};
pub use catalog::{describe_display, select_capturable, DisplayCatalog};
pub use session::{CaptureSession, SessionContext, SessionEvent};
pub use virtual_backend::{VirtualBackend, VirtualDisplay};

#[cfg(feature = "xcap")]
pub use xcap_backend::XcapBackend;
