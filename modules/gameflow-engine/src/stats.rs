//! Rolling per-processor and per-effect counters.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Attempts, outcomes, and a running mean of attempt duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RollingStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub average_duration_ms: f64,
}

impl RollingStats {
    /// Fold one attempt in. The mean is updated incrementally:
    /// `mean += (sample - mean) / n`.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.processed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        let sample = duration.as_secs_f64() * 1_000.0;
        self.average_duration_ms += (sample - self.average_duration_ms) / self.processed as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.processed as f64
    }
}

/// Snapshot of everything the engine counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub processors: Vec<(String, RollingStats)>,
    pub effects: Vec<(String, RollingStats)>,
    pub queued_events: usize,
    pub queued_batches: usize,
    pub active_effects: usize,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Engine Stats ===")?;
        writeln!(f, "Queued events:   {}", self.queued_events)?;
        writeln!(f, "Queued batches:  {}", self.queued_batches)?;
        writeln!(f, "Active effects:  {}", self.active_effects)?;
        if !self.processors.is_empty() {
            writeln!(f, "\nProcessors:")?;
            for (id, s) in &self.processors {
                writeln!(
                    f,
                    "  {id:<20} runs={:<5} ok={:<5} failed={:<5} avg={:.1}ms",
                    s.processed, s.succeeded, s.failed, s.average_duration_ms
                )?;
            }
        }
        if !self.effects.is_empty() {
            writeln!(f, "\nEffects:")?;
            for (ty, s) in &self.effects {
                writeln!(
                    f,
                    "  {ty:<20} runs={:<5} ok={:<5} failed={:<5} ({:.0}%)",
                    s.processed,
                    s.succeeded,
                    s.failed,
                    s.success_rate() * 100.0
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_is_updated_incrementally() {
        let mut stats = RollingStats::default();
        stats.record(Duration::from_millis(10), true);
        stats.record(Duration::from_millis(20), false);
        stats.record(Duration::from_millis(30), true);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.average_duration_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn success_rate_of_empty_stats_is_zero() {
        assert_eq!(RollingStats::default().success_rate(), 0.0);
    }

    #[test]
    fn report_lists_processors() {
        let mut s = RollingStats::default();
        s.record(Duration::from_millis(4), true);
        let report = EngineStats {
            processors: vec![("dice".into(), s)],
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("dice"));
        assert!(text.contains("runs=1"));
    }
}
