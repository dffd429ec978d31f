//! Frame timing and frames-per-second reporting.

use std::time::{Duration, Instant};

/// Measures frame deltas and reports a frame rate once per interval.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    report_interval: Duration,
}

impl Timer {
    /// Create a timer that reports once per second.
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(1))
    }

    /// Create a timer with a custom reporting interval.
    pub fn with_report_interval(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
            report_interval,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the previous `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Count one presented frame.
    ///
    /// Returns the average frame rate over the interval once the reporting
    /// interval has elapsed, and starts a new interval.
    pub fn frame(&mut self) -> Option<f64> {
        self.frame_at(Instant::now())
    }

    fn frame_at(&mut self, now: Instant) -> Option<f64> {
        self.window_frames += 1;
        let window = now.saturating_duration_since(self.window_start);
        if window < self.report_interval {
            return None;
        }

        let fps = f64::from(self.window_frames) / window.as_secs_f64();
        self.window_start = now;
        self.window_frames = 0;
        Some(fps)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_reports_after_interval() {
        let mut timer = Timer::with_report_interval(Duration::from_millis(100));
        let start = timer.window_start;

        assert_eq!(timer.frame_at(start + Duration::from_millis(10)), None);
        assert_eq!(timer.frame_at(start + Duration::from_millis(50)), None);

        let fps = timer
            .frame_at(start + Duration::from_millis(100))
            .expect("interval elapsed");
        assert!((fps - 30.0).abs() < 1e-6);

        // A new interval starts after a report.
        assert_eq!(timer.window_frames, 0);
        assert_eq!(timer.frame_at(start + Duration::from_millis(120)), None);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first <= timer.elapsed());
        assert!(second <= timer.elapsed());
    }
}
