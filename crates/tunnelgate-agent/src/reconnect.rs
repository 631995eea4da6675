//! Exponential backoff between reconnection attempts

use std::time::Duration;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the delay
    pub max_backoff: Duration,
    /// Factor applied to the delay after each attempt
    pub multiplier: f64,
    /// Give up after this many consecutive failures (None = never)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Backoff state across consecutive reconnection attempts
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    next: Duration,
    attempt: usize,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            next: config.initial_backoff,
            config,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt >= max_attempts {
                return None;
            }
        }
        self.attempt += 1;

        let delay = self.next;
        self.next = self
            .next
            .mul_f64(self.config.multiplier)
            .min(self.config.max_backoff);

        debug!(attempt = self.attempt, delay = ?delay, "Scheduling reconnection");
        Some(delay)
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.next = self.config.initial_backoff;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(backoff: &mut Backoff, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect()
    }

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        assert_eq!(delays(&mut backoff, 8), vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(backoff.attempt(), 8);
    }

    #[test]
    fn test_reset_after_success() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        delays(&mut backoff, 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_max_attempts() {
        let mut backoff = Backoff::new(ReconnectConfig {
            max_attempts: Some(2),
            ..ReconnectConfig::default()
        });

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }
}
