//! Timing helpers for the update/flush loop
//!
//! [`ProfilerScope`] measures a block and reports it at `trace` level when
//! dropped. [`FrameTimer`] keeps the last frame time and a rolling average for
//! status lines.

use std::collections::VecDeque;
use std::time::Instant;
use tracing::trace;

/// Frames kept for the rolling average
const FRAME_WINDOW: usize = 60;

/// A profiling scope that measures elapsed time using RAII.
///
/// The measurement is emitted as a `trace` event when dropped.
#[derive(Debug)]
pub struct ProfilerScope {
    start: Instant,
    name: &'static str,
}

impl ProfilerScope {
    /// Creates a new profiling scope.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Gets elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        trace!(scope = self.name, elapsed_ms = self.elapsed_ms(), "Scope finished");
    }
}

/// Frame timer with a rolling average
#[derive(Debug, Clone)]
pub struct FrameTimer {
    last_frame_time_ms: f64,
    window: VecDeque<f64>,
    frame_start: Option<Instant>,
}

impl FrameTimer {
    /// Creates a new frame timer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_frame_time_ms: 0.0,
            window: VecDeque::with_capacity(FRAME_WINDOW),
            frame_start: None,
        }
    }

    /// Marks the start of a frame.
    pub fn begin(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    /// Records the time since [`begin`](Self::begin); ignored without one.
    pub fn end(&mut self) {
        if let Some(start) = self.frame_start.take() {
            self.record(start.elapsed().as_secs_f64() * 1000.0);
        }
    }

    /// Records frame time in milliseconds.
    pub fn record(&mut self, time_ms: f64) {
        self.last_frame_time_ms = time_ms;
        if self.window.len() == FRAME_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(time_ms);
    }

    /// Gets the last recorded frame time.
    #[must_use]
    pub fn last_frame_time_ms(&self) -> f64 {
        self.last_frame_time_ms
    }

    /// Mean of the recent frames, 0 before the first one.
    #[must_use]
    pub fn average_frame_time_ms(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Frames per second implied by the rolling average.
    #[must_use]
    pub fn fps(&self) -> f64 {
        let average = self.average_frame_time_ms();
        if average > 0.0 {
            1000.0 / average
        } else {
            0.0
        }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
