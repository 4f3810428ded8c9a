//! Exponential moving average of backend latency

use dashmap::DashMap;

pub struct LatencyTracker {
    alpha: f64,
    averages: DashMap<String, f64>,
}

impl LatencyTracker {
    /// `alpha` is the weight of the newest sample, clamped to (0, 1]
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            1.0
        };
        Self {
            alpha,
            averages: DashMap::new(),
        }
    }

    pub fn record(&self, backend_id: &str, latency_ms: f64) {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            tracing::debug!(backend_id = %backend_id, latency_ms, "Ignoring invalid latency sample");
            return;
        }
        self.averages
            .entry(backend_id.to_string())
            .and_modify(|avg| *avg = self.alpha * latency_ms + (1.0 - self.alpha) * *avg)
            .or_insert(latency_ms);
    }

    pub fn average(&self, backend_id: &str) -> Option<f64> {
        self.averages.get(backend_id).map(|avg| *avg)
    }

    /// Ranking value; unmeasured backends rank first so they get sampled
    pub fn rank(&self, backend_id: &str) -> f64 {
        self.average(backend_id).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let tracker = LatencyTracker::new(0.3);
        tracker.record("a", 100.0);
        assert_eq!(tracker.average("a"), Some(100.0));
    }

    #[test]
    fn test_moving_average_weights_newest_sample() {
        let tracker = LatencyTracker::new(0.5);
        tracker.record("a", 100.0);
        tracker.record("a", 200.0);
        assert_eq!(tracker.average("a"), Some(150.0));
    }

    #[test]
    fn test_unmeasured_ranks_zero() {
        let tracker = LatencyTracker::new(0.3);
        assert_eq!(tracker.average("a"), None);
        assert_eq!(tracker.rank("a"), 0.0);
    }

    #[test]
    fn test_invalid_samples_ignored() {
        let tracker = LatencyTracker::new(0.3);
        tracker.record("a", f64::NAN);
        tracker.record("a", -5.0);
        assert_eq!(tracker.average("a"), None);
    }
}
