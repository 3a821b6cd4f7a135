use thiserror::Error;

use crate::types::DisplayId;

/// Failures of the capture layer.
///
/// Every platform error is converted into one of these at the session
/// boundary, so callers can tell the three kinds apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The display vanished between selection and stream start.
    #[error("Display {display} is no longer available")]
    DisplayUnavailable { display: DisplayId },

    /// The platform refused the capture configuration (or did not answer in time).
    #[error("Capture stream failed to start: {reason}")]
    StreamStart { reason: String },

    /// A running stream died, e.g. the display was unplugged.
    #[error("Capture stream stopped unexpectedly: {reason}")]
    StreamRuntime { reason: String },
}

impl CaptureError {
    pub fn start(reason: impl Into<String>) -> Self {
        Self::StreamStart { reason: reason.into() }
    }

    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::StreamRuntime { reason: reason.into() }
    }

    /// Re-labels a failure that happened after the stream was running.
    pub fn into_runtime(self) -> Self {
        match self {
            Self::DisplayUnavailable { display } => {
                Self::runtime(format!("display {display} disconnected"))
            }
            Self::StreamStart { reason } => Self::StreamRuntime { reason },
            runtime @ Self::StreamRuntime { .. } => runtime,
        }
    }

    /// Short tag for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DisplayUnavailable { .. } => "display_unavailable",
            Self::StreamStart { .. } => "stream_start",
            Self::StreamRuntime { .. } => "stream_runtime",
        }
    }
}

#[derive(Error, Debug)]
pub enum GlanceError {
    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("No capturable display found")]
    NoDisplay,

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
