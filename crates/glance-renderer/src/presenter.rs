use std::sync::Arc;

use glance_core::{Frame, FrameSink, PixelFormat};
use tracing::debug;

use crate::RendererError;

/// An RGBA8 image ready for a GUI texture.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl PreviewImage {
    pub fn size(&self) -> [usize; 2] {
        [self.width as usize, self.height as usize]
    }
}

/// Converts a captured frame to tightly packed RGBA.
pub fn bgra_to_rgba(frame: &Frame) -> Result<PreviewImage, RendererError> {
    if !frame.is_complete() {
        return Err(RendererError::IncompleteFrame {
            got: frame.data.len(),
            width: frame.width,
            height: frame.height,
        });
    }
    let len = frame.stride() * frame.height as usize;
    let mut rgba = frame.data[..len].to_vec();
    match frame.format {
        PixelFormat::Bgra => {
            for px in rgba.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
    }
    Ok(PreviewImage {
        width: frame.width,
        height: frame.height,
        rgba,
    })
}

/// Pulls the newest frame out of the sink on the render thread.
///
/// Only the latest frame is ever converted; frames published while the
/// render thread was busy are skipped and counted.
pub struct FramePresenter {
    sink: Arc<FrameSink>,
    last_sequence: u64,
    presented: u64,
    skipped: u64,
}

impl FramePresenter {
    pub fn new(sink: Arc<FrameSink>) -> Self {
        Self {
            sink,
            last_sequence: 0,
            presented: 0,
            skipped: 0,
        }
    }

    /// The newest frame converted for display, or `None` if nothing new arrived.
    pub fn poll(&mut self) -> Result<Option<PreviewImage>, RendererError> {
        let Some((sequence, frame)) = self.sink.latest() else {
            return Ok(None);
        };
        if sequence <= self.last_sequence {
            return Ok(None);
        }

        let missed = sequence - self.last_sequence - 1;
        if missed > 0 && self.presented > 0 {
            self.skipped += missed;
            debug!("Presenter skipped {} frame(s) while busy", missed);
        }
        self.last_sequence = sequence;

        let image = bgra_to_rgba(&frame)?;
        self.presented += 1;
        Ok(Some(image))
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
