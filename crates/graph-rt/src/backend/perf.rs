//! Per-operation timing counters.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Accumulated timing for one executed node of a compiled function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceCounter {
    name: String,
    op: String,
    total_time: Duration,
    call_count: u64,
}

impl PerformanceCounter {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            total_time: Duration::ZERO,
            call_count: 0,
        }
    }

    /// Friendly name of the node, e.g. `Add_12`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    pub fn average_time(&self) -> Duration {
        match u32::try_from(self.call_count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_time / count,
            Err(_) => {
                Duration::from_secs_f64(self.total_time.as_secs_f64() / self.call_count as f64)
            }
        }
    }
}

/// Counter set for one compiled function, one entry per timed step.
///
/// Calls time their steps locally and fold the durations in once at the end, so the lock is
/// taken once per call rather than once per step.
pub struct PerfRecorder {
    counters: Mutex<Vec<PerformanceCounter>>,
}

impl PerfRecorder {
    pub fn new(counters: Vec<PerformanceCounter>) -> Self {
        Self {
            counters: Mutex::new(counters),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds one call's step durations; `durations[i]` belongs to counter `i`.
    pub fn record(&self, durations: &[Duration]) {
        let mut counters = self.lock();
        for (counter, elapsed) in counters.iter_mut().zip(durations) {
            counter.total_time += *elapsed;
            counter.call_count += 1;
        }
    }

    pub fn snapshot(&self) -> Vec<PerformanceCounter> {
        self.lock().clone()
    }

    pub fn reset(&self) {
        for counter in self.lock().iter_mut() {
            counter.total_time = Duration::ZERO;
            counter.call_count = 0;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PerformanceCounter>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_accumulates_per_step() {
        let recorder = PerfRecorder::new(vec![
            PerformanceCounter::new("Add_1", "Add"),
            PerformanceCounter::new("Multiply_2", "Multiply"),
        ]);
        recorder.record(&[Duration::from_micros(4), Duration::from_micros(10)]);
        recorder.record(&[Duration::from_micros(2), Duration::from_micros(10)]);

        let counters = recorder.snapshot();
        assert_eq!(counters[0].call_count(), 2);
        assert_eq!(counters[0].total_time(), Duration::from_micros(6));
        assert_eq!(counters[0].average_time(), Duration::from_micros(3));
        assert_eq!(counters[1].op(), "Multiply");

        recorder.reset();
        assert_eq!(recorder.snapshot()[1].call_count(), 0);
        assert_eq!(recorder.snapshot()[1].average_time(), Duration::ZERO);
    }
}
