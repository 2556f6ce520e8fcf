//! Retry pacing after failed iterations.

use std::time::Duration;

/// Produces the wait before the next retry.
///
/// `next_interval` advances the sequence; `reset` starts it over after a
/// successful iteration.
pub trait BackoffPolicy: Send {
    /// Wait to apply before the next retry.
    fn next_interval(&mut self) -> Duration;

    /// Return to the initial interval.
    fn reset(&mut self);
}

/// Exponential backoff with a ceiling.
///
/// Intervals grow by `multiplier` from `initial` until they reach `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    current: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 1.5, Duration::from_secs(60))
    }
}

impl ExponentialBackoff {
    /// Create a backoff starting at `initial`, growing by `multiplier` up to `max`.
    ///
    /// A multiplier below 1.0 is treated as 1.0 and `max` is never below `initial`.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            max: max.max(initial),
            current: initial,
        }
    }

    /// Set the first interval.
    pub fn with_initial(self, initial: Duration) -> Self {
        Self::new(initial, self.multiplier, self.max)
    }

    /// Set the growth factor.
    pub fn with_multiplier(self, multiplier: f64) -> Self {
        Self::new(self.initial, multiplier, self.max)
    }

    /// Set the ceiling.
    pub fn with_max(self, max: Duration) -> Self {
        Self::new(self.initial, self.multiplier, max)
    }

    /// The first interval of every sequence.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// The ceiling.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_interval(&mut self) -> Duration {
        let interval = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        interval
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing_until_ceiling() {
        let mut bo = ExponentialBackoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(1));

        let waits: Vec<Duration> = (0..8).map(|_| bo.next_interval()).collect();
        assert_eq!(
            waits[..5],
            [
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
            ]
        );
        assert!(waits[5..].iter().all(|w| *w == Duration::from_secs(1)));
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut bo = ExponentialBackoff::default();
        let first = bo.next_interval();
        bo.next_interval();
        bo.next_interval();

        bo.reset();
        assert_eq!(bo.next_interval(), first);
        assert_eq!(first, bo.initial());
    }

    #[test]
    fn test_default_growth() {
        let mut bo = ExponentialBackoff::default();
        let mut prev = bo.next_interval();
        while prev < bo.max() {
            let next = bo.next_interval();
            assert!(next > prev || next == bo.max());
            prev = next;
        }
        assert_eq!(bo.next_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_degenerate_settings() {
        let mut bo = ExponentialBackoff::new(Duration::from_secs(2), 0.5, Duration::from_secs(1));
        assert_eq!(bo.max(), Duration::from_secs(2));
        assert_eq!(bo.next_interval(), Duration::from_secs(2));
        assert_eq!(bo.next_interval(), Duration::from_secs(2));
    }
}
