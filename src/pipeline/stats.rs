//! Pipeline-wide timing helpers.
//!
//! This module defines the `StageTimer` used to accumulate time spent in one
//! pipeline stage and the `PipelineTiming` snapshot returned to callers.

use std::fmt;
use std::time::{Duration, Instant};

/// Accumulates the wall-clock time spent inside one stage.
#[derive(Debug, Clone, Default)]
pub struct StageTimer {
    total: Duration,
    samples: u64,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` and adds its duration to the total, whether it succeeds or not.
    pub fn time<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record(start.elapsed());
        result
    }

    /// Adds an externally measured duration.
    pub fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.samples += 1;
    }

    /// Total accumulated time.
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Number of timed sections.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Accumulated per-stage durations of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineTiming {
    /// Time loaders spent reading encoded data.
    pub load: Duration,
    /// Time loaders spent decoding.
    pub decode: Duration,
    /// Time spent in `run()`: loading, graph execution and parameter updates.
    pub process: Duration,
    /// Time spent producing output copies and tensors.
    pub convert: Duration,
}

impl PipelineTiming {
    /// Sum of the four stages.
    pub fn total(&self) -> Duration {
        self.load + self.decode + self.process + self.convert
    }
}

impl fmt::Display for PipelineTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        writeln!(f, "Pipeline Timing:")?;
        writeln!(f, "  Load: {:.2} ms", ms(self.load))?;
        writeln!(f, "  Decode: {:.2} ms", ms(self.decode))?;
        writeln!(f, "  Process: {:.2} ms", ms(self.process))?;
        writeln!(f, "  Convert: {:.2} ms", ms(self.convert))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulates_even_on_error() {
        let mut timer = StageTimer::new();
        let result: Result<(), &str> = timer.time(|| Err("boom"));
        assert!(result.is_err());
        timer.record(Duration::from_millis(5));
        assert_eq!(timer.samples(), 2);
        assert!(timer.total() >= Duration::from_millis(5));

        timer.reset();
        assert_eq!(timer.total(), Duration::ZERO);
    }

    #[test]
    fn test_timing_display() {
        let timing = PipelineTiming {
            load: Duration::from_millis(1),
            decode: Duration::from_millis(2),
            process: Duration::from_millis(3),
            convert: Duration::from_millis(4),
        };
        let text = timing.to_string();
        assert!(text.contains("Decode: 2.00 ms"));
        assert_eq!(timing.total(), Duration::from_millis(10));
    }
}
