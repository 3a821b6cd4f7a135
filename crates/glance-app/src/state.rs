use std::collections::VecDeque;
use std::time::{Duration, Instant};

use egui::Color32;
use glance_core::SessionState;

// ── Status colours ────────────────────────────────────────────────────────────

pub fn state_color(state: &SessionState) -> Color32 {
    match state {
        SessionState::Idle => Color32::from_rgb(160, 160, 160),
        SessionState::Starting | SessionState::Stopping => Color32::from_rgb(230, 185, 50),
        SessionState::Running => Color32::from_rgb(60, 200, 80),
        SessionState::Failed(_) => Color32::from_rgb(220, 60, 60),
    }
}

// ── PreviewStats ──────────────────────────────────────────────────────────────

/// Rolling one-second window over presented frames.
#[derive(Debug, Default)]
pub struct PreviewStats {
    pub fps: f64,
    pub frames_presented: u64,
    last_frame_times: VecDeque<Instant>,
}

impl PreviewStats {
    /// Call once per presented frame.
    pub fn tick_frame(&mut self) {
        self.tick_frame_at(Instant::now());
    }

    fn tick_frame_at(&mut self, now: Instant) {
        self.frames_presented += 1;
        self.last_frame_times.push_back(now);

        // Evict entries older than 1 second
        while self
            .last_frame_times
            .front()
            .map_or(false, |t| now.duration_since(*t) > Duration::from_secs(1))
        {
            self.last_frame_times.pop_front();
        }
        self.fps = self.last_frame_times.len() as f64;
    }

    /// Reset between sessions (e.g. after a display switch).
    pub fn reset(&mut self) {
        self.fps = 0.0;
        self.frames_presented = 0;
        self.last_frame_times.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counts_frames_of_the_last_second() {
        let mut stats = PreviewStats::default();
        let start = Instant::now();
        for i in 0..30 {
            stats.tick_frame_at(start + Duration::from_millis(i * 20));
        }
        assert_eq!(stats.fps, 30.0);

        stats.tick_frame_at(start + Duration::from_millis(1_500));
        // Frames before t=0.5 s fell out of the window.
        assert_eq!(stats.fps, 6.0);
        assert_eq!(stats.frames_presented, 31);
    }

    #[test]
    fn reset_clears_counters() {
        let mut stats = PreviewStats::default();
        stats.tick_frame();
        stats.reset();
        assert_eq!(stats.fps, 0.0);
        assert_eq!(stats.frames_presented, 0);
    }

    #[test]
    fn failure_is_drawn_red() {
        let failed = SessionState::Failed(glance_core::CaptureError::start("x"));
        assert_eq!(state_color(&failed), Color32::from_rgb(220, 60, 60));
    }
}
