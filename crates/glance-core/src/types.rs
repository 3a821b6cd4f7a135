use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;

// MARK: - DisplayId

/// Opaque handle to a physical display.
///
/// Stable for as long as the display stays attached; a hot-plug event may
/// hand out a different value for the same monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub u32);

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// MARK: - Resolution

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - ActiveDisplay

/// One entry of a platform display enumeration, before any selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDisplay {
    pub id: DisplayId,
    pub is_main: bool,
    pub resolution: Resolution,
    /// Human-readable name, if the platform can resolve one.
    pub name: Option<String>,
}

// MARK: - DisplayDescriptor

/// Transient query result describing a capturable display.
///
/// Derived on demand from the catalog; never kept as engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayDescriptor {
    pub id: DisplayId,
    pub resolution: Resolution,
    pub name: String,
}

impl DisplayDescriptor {
    pub fn pixel_width(&self) -> u32 {
        self.resolution.width
    }

    pub fn pixel_height(&self) -> u32 {
        self.resolution.height
    }
}

// MARK: - Frame

/// One decoded bitmap snapshot of a display.
///
/// Superseded by the next frame; nothing keeps a backlog of these.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Tightly packed pixel rows (`stride() * height` bytes).
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time, microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

impl Frame {
    /// Wraps a BGRA buffer, stamping it with the current wall-clock time.
    pub fn bgra(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format: PixelFormat::Bgra,
            timestamp_us: now_us(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Whether the buffer is large enough for the advertised dimensions.
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.stride() * self.height as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit, byte order Blue, Green, Red, Alpha.
    Bgra,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgra => 4,
        }
    }
}

pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

// MARK: - SessionState

/// Lifecycle of one capture session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Failed(CaptureError),
}

impl SessionState {
    /// `Starting` or `Running`: the states that hold a platform stream.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting…",
            Self::Running => "Mirroring",
            Self::Stopping => "Stopping…",
            Self::Failed(_) => "Failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stride_and_completeness() {
        let frame = Frame::bgra(vec![0u8; 4 * 3 * 2], 3, 2);
        assert_eq!(frame.stride(), 12);
        assert!(frame.is_complete());

        let short = Frame::bgra(vec![0u8; 10], 3, 2);
        assert!(!short.is_complete());
    }

    #[test]
    fn only_starting_and_running_count_as_active() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Running.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Stopping.is_active());
        let failed = SessionState::Failed(CaptureError::DisplayUnavailable { display: DisplayId(2) });
        assert!(!failed.is_active());
        assert_eq!(failed.error(), Some(&CaptureError::DisplayUnavailable { display: DisplayId(2) }));
    }

    #[test]
    fn display_id_formats_with_hash() {
        assert_eq!(DisplayId(7).to_string(), "#7");
        assert_eq!(Resolution::new(1920, 1080).to_string(), "1920×1080");
    }
}
