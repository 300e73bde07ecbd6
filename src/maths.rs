//! Numeric helpers: fuzzy float comparison and rolling statistics.

use std::collections::VecDeque;

/// Relative tolerance for fuzzy equality of device values.
const FUZZ: f64 = 1e-12;

/// Fuzzy equality on doubles.
///
/// Values are shifted by one so that zero compares sensibly against
/// near-zero noise, then compared with a relative tolerance. Used to
/// suppress no-op value updates throughout the graph.
pub fn fuzzy_eq(a: f64, b: f64) -> bool {
    let (a, b) = (a + 1.0, b + 1.0);
    (a - b).abs() <= FUZZ * a.abs().min(b.abs())
}

/// True when the value is fuzzy-equal to zero.
pub fn fuzzy_zero(v: f64) -> bool {
    fuzzy_eq(v, 0.0)
}

/// True when a value counts as logic-high: at or (fuzzily) above one.
pub fn is_high(v: f64) -> bool {
    v >= 1.0 || fuzzy_eq(v, 1.0)
}

// ---------------------------------------------------------------------------
// Rolling average
// ---------------------------------------------------------------------------

/// Incrementally maintained running average.
///
/// With a window of N ≥ 1, the oldest samples are evicted so the mean always
/// covers the most recent N values; a window of 0 keeps an unbounded mean
/// using only a count and the incremental update `μ' = (μ·k + x)/(k+1)`.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    average: f64,
    count: u64,
    window: usize,
    values: VecDeque<f64>,
}

impl RunningAverage {
    /// `window` of 0 means unbounded.
    pub fn new(window: usize) -> Self {
        Self {
            average: 0.0,
            count: 0,
            window,
            values: VecDeque::new(),
        }
    }

    /// Add a sample and return the new mean.
    pub fn add_value(&mut self, value: f64) -> f64 {
        if self.window > 0 {
            while self.values.len() >= self.window {
                let evicted = self.values.pop_front().unwrap_or(0.0);
                self.count -= 1;
                // evicting the last sample leaves an empty mean; dividing
                // by the remaining count would be 0/0 for a window of 1
                self.average = if self.count == 0 {
                    0.0
                } else {
                    (self.average * (self.count + 1) as f64 - evicted) / self.count as f64
                };
            }
            self.values.push_back(value);
        }
        self.average = (self.average * self.count as f64 + value) / (self.count + 1) as f64;
        self.count += 1;
        self.average
    }

    pub fn mean(&self) -> f64 {
        self.average
    }

    pub fn reset(&mut self) {
        self.average = 0.0;
        self.count = 0;
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_eq_handles_zero() {
        assert!(fuzzy_eq(0.0, 0.0));
        assert!(fuzzy_eq(0.0, 1e-15));
        assert!(!fuzzy_eq(0.0, 1e-6));
        assert!(fuzzy_eq(1.0, 1.0 + 1e-14));
        assert!(!fuzzy_eq(1.0, 1.001));
    }

    #[test]
    fn high_threshold_is_one() {
        assert!(is_high(1.0));
        assert!(is_high(1.5));
        assert!(is_high(1.0 - 1e-14));
        assert!(!is_high(0.999));
        assert!(!is_high(0.0));
    }

    #[test]
    fn unbounded_average() {
        let mut avg = RunningAverage::new(0);
        assert_eq!(avg.add_value(2.0), 2.0);
        assert_eq!(avg.add_value(4.0), 3.0);
        assert_eq!(avg.add_value(6.0), 4.0);
        assert_eq!(avg.mean(), 4.0);
    }

    #[test]
    fn windowed_average_evicts_oldest() {
        // Samples 2, 4, 6, 8 with window 3 give means 2, 3, 4, 6.
        let mut avg = RunningAverage::new(3);
        assert_eq!(avg.add_value(2.0), 2.0);
        assert_eq!(avg.add_value(4.0), 3.0);
        assert_eq!(avg.add_value(6.0), 4.0);
        assert_eq!(avg.add_value(8.0), 6.0);
    }

    #[test]
    fn window_of_one_tracks_latest_sample() {
        let mut avg = RunningAverage::new(1);
        assert_eq!(avg.add_value(2.0), 2.0);
        assert_eq!(avg.add_value(4.0), 4.0);
        assert_eq!(avg.add_value(6.0), 6.0);
        assert_eq!(avg.mean(), 6.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut avg = RunningAverage::new(2);
        avg.add_value(10.0);
        avg.add_value(20.0);
        avg.reset();
        assert_eq!(avg.mean(), 0.0);
        assert_eq!(avg.add_value(4.0), 4.0);
    }
}
