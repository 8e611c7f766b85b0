//! Adaptive poll interval shared by the classifier and dispatcher

use crate::metrics::record_poll_interval;
use std::time::Duration;

/// Poll interval in whole seconds that backs off while idle and
/// tightens under load.
#[derive(Debug, Clone)]
pub struct Pacer {
    worker: &'static str,
    max_secs: u64,
    current_secs: u64,
}

impl Pacer {
    /// Starts at the maximum: a fresh worker assumes nothing is waiting
    pub fn new(worker: &'static str, max_secs: u64) -> Self {
        let pacer = Self {
            worker,
            max_secs,
            current_secs: max_secs,
        };
        record_poll_interval(worker, pacer.current_secs);
        pacer
    }

    /// Nothing to do: back off by one second, capped at the maximum
    pub fn on_empty_batch(&mut self) {
        self.current_secs = (self.current_secs + 1).min(self.max_secs);
        record_poll_interval(self.worker, self.current_secs);
    }

    /// Work found: tighten by one second, or jump to zero for urgent work
    pub fn on_batch(&mut self, urgent: bool) {
        self.current_secs = if urgent {
            0
        } else {
            self.current_secs.saturating_sub(1)
        };
        record_poll_interval(self.worker, self.current_secs);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.current_secs)
    }

    pub fn current_secs(&self) -> u64 {
        self.current_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_max() {
        let pacer = Pacer::new("test", 60);
        assert_eq!(pacer.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_empty_batches_capped_at_max() {
        let mut pacer = Pacer::new("test", 5);
        pacer.on_batch(false);
        pacer.on_batch(false);
        assert_eq!(pacer.current_secs(), 3);

        for _ in 0..3 {
            pacer.on_empty_batch();
        }
        assert_eq!(pacer.current_secs(), 5);
    }

    #[test]
    fn test_batches_tighten_to_zero() {
        let mut pacer = Pacer::new("test", 2);
        pacer.on_batch(false);
        pacer.on_batch(false);
        pacer.on_batch(false);
        assert_eq!(pacer.current_secs(), 0);
    }

    #[test]
    fn test_urgent_batch_snaps_to_zero() {
        let mut pacer = Pacer::new("test", 60);
        pacer.on_batch(true);
        assert_eq!(pacer.current_secs(), 0);
        pacer.on_empty_batch();
        assert_eq!(pacer.current_secs(), 1);
    }
}
