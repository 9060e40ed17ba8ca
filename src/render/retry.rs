//! The two bounded retry policies used by the pipeline.
//!
//! Text polling is bounded by the job timeout expressed as an attempt budget
//! and fails with a 404-class error; blank-render detection is a fixed
//! five-attempt loop failing with a generic render failure.

use std::time::Duration;

use rand::Rng;

use crate::config::RenderConfig;

/// Text-presence polling: first attempt immediate, later attempts spaced
/// uniformly between the configured bounds, no back-off growth.
#[derive(Debug, Clone)]
pub struct TextWaitPolicy {
    attempts: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl TextWaitPolicy {
    pub fn from_config(config: &RenderConfig) -> Self {
        // One attempt per configured timeout second, so exhaustion spans
        // roughly the job timeout at 750-1000ms spacing.
        Self {
            attempts: config.job_timeout.as_secs().max(1) as usize,
            min_delay: config.text_poll_min,
            max_delay: config.text_poll_max,
        }
    }

    /// Total attempt budget, the immediate first attempt included.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Spacing before the next attempt, drawn uniformly from the range.
    pub fn next_delay(&self) -> Duration {
        if self.min_delay >= self.max_delay {
            return self.min_delay;
        }
        let mut rng = rand::thread_rng();
        let millis = rng.gen_range(self.min_delay.as_millis()..=self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }
}

/// Blank-output detection: fixed attempt count, fixed inter-attempt delay.
#[derive(Debug, Clone)]
pub struct BlankRenderPolicy {
    attempts: usize,
    delay: Duration,
}

impl BlankRenderPolicy {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            attempts: config.blank_retry_attempts.max(1),
            delay: config.blank_retry_delay,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_wait_budget_tracks_timeout_seconds() {
        let config = RenderConfig::default().with_job_timeout(Duration::from_secs(12));
        let policy = TextWaitPolicy::from_config(&config);
        assert_eq!(policy.attempts(), 12);
    }

    #[test]
    fn text_wait_budget_never_zero() {
        let config = RenderConfig::default().with_job_timeout(Duration::from_millis(100));
        assert_eq!(TextWaitPolicy::from_config(&config).attempts(), 1);
    }

    #[test]
    fn text_wait_delay_stays_in_range() {
        let policy = TextWaitPolicy::from_config(&RenderConfig::default());
        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(750), "delay {delay:?}");
            assert!(delay <= Duration::from_millis(1000), "delay {delay:?}");
        }
    }

    #[test]
    fn blank_render_defaults() {
        let policy = BlankRenderPolicy::from_config(&RenderConfig::default());
        assert_eq!(policy.attempts(), 5);
        assert_eq!(policy.delay(), Duration::from_millis(50));
    }
}
