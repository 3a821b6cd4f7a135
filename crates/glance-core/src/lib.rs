pub mod config;
pub mod errors;
pub mod sink;
pub mod types;

pub use config::{BackendKind, CaptureSettings, GlanceConfig, PreviewSettings};
pub use errors::{CaptureError, GlanceError};
pub use sink::FrameSink;
pub use types::*;
