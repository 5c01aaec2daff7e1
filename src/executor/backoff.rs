//! Retry delay policy

use std::time::Duration;

/// Which delay curve applies after a failed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Low-fee rejection: retry soon with a fresh fee, uniformly in `[min, max]`
    Uniform,
    /// Any other failure: exponential growth with jitter
    Exponential,
}

/// Delay policy between submissions. Every delay lies in `[min_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    /// Pure delay function; `unit` is a random draw in `[0, 1]`.
    ///
    /// `failures` counts consecutive failures including the one just seen.
    pub fn delay_for(&self, kind: BackoffKind, failures: u32, unit: f64) -> Duration {
        let unit = unit.clamp(0.0, 1.0);
        let min_ms = self.min_delay.as_millis() as f64;
        let max_ms = (self.max_delay.as_millis() as f64).max(min_ms);

        let delay_ms = match kind {
            BackoffKind::Uniform => min_ms + (max_ms - min_ms) * unit,
            BackoffKind::Exponential => {
                let exponent = failures.saturating_sub(1).min(32) as i32;
                let delay_ms = (min_ms * self.multiplier.powi(exponent)).min(max_ms);

                // Add jitter to prevent thundering herd
                let jitter = (unit - 0.5) * 2.0 * self.jitter_factor;
                delay_ms * (1.0 + jitter)
            }
        };

        Duration::from_millis(delay_ms.clamp(min_ms, max_ms).round() as u64)
    }

    /// Draw a delay with a thread-local random source
    pub fn next_delay(&self, kind: BackoffKind, failures: u32) -> Duration {
        self.delay_for(kind, failures, rand::random::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            min_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(2_000),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    #[test]
    fn test_uniform_spans_range() {
        let p = policy();
        assert_eq!(p.delay_for(BackoffKind::Uniform, 1, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(BackoffKind::Uniform, 1, 0.5), Duration::from_millis(1_500));
        assert_eq!(p.delay_for(BackoffKind::Uniform, 1, 1.0), Duration::from_millis(2_000));
    }

    #[test]
    fn test_exponential_grows_then_caps() {
        let p = BackoffPolicy {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(p.delay_for(BackoffKind::Exponential, 1, 0.5), Duration::from_millis(100));
        assert_eq!(p.delay_for(BackoffKind::Exponential, 2, 0.5), Duration::from_millis(200));
        assert_eq!(p.delay_for(BackoffKind::Exponential, 4, 0.5), Duration::from_millis(800));
        assert_eq!(p.delay_for(BackoffKind::Exponential, 20, 0.5), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_never_escapes_bounds() {
        let p = policy();
        assert_eq!(p.delay_for(BackoffKind::Exponential, 1, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(BackoffKind::Exponential, 10, 1.0), Duration::from_millis(2_000));
    }

    #[test]
    fn test_equal_bounds() {
        let p = BackoffPolicy {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(500),
            ..policy()
        };
        assert_eq!(p.next_delay(BackoffKind::Uniform, 3), Duration::from_millis(500));
        assert_eq!(p.next_delay(BackoffKind::Exponential, 3), Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(failures in 0u32..100, unit in 0.0f64..=1.0, uniform: bool) {
            let kind = if uniform { BackoffKind::Uniform } else { BackoffKind::Exponential };
            let delay = policy().delay_for(kind, failures, unit);
            prop_assert!(delay >= Duration::from_millis(1_000));
            prop_assert!(delay <= Duration::from_millis(2_000));
        }
    }
}
