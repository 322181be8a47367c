//! Retry scheduler. Pure: attempt count in, decision out.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `min(base * 2^(attempt-1), max)`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts allowed per token, across restarts.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Exhausted,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(2_000),
            },
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// `attempt_count` is the number of attempts already made.
    pub fn decide(&self, attempt_count: u32) -> RetryDecision {
        if attempt_count >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        RetryDecision::RetryAfter(self.delay_after(attempt_count))
    }

    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }

    fn delay_after(&self, attempt_count: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let exp = attempt_count.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn default_is_five_attempts_two_seconds_apart() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1), RetryDecision::RetryAfter(ms(2_000)));
        assert_eq!(p.decide(4), RetryDecision::RetryAfter(ms(2_000)));
        assert_eq!(p.decide(5), RetryDecision::Exhausted);
    }

    #[test]
    fn exponential_doubles_then_caps() {
        let p = RetryPolicy::exponential(10, ms(100), ms(1_000));
        let delays: Vec<_> = (1..=6)
            .map(|n| match p.decide(n) {
                RetryDecision::RetryAfter(d) => d,
                RetryDecision::Exhausted => panic!("not exhausted at {n}"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![ms(100), ms(200), ms(400), ms(800), ms(1_000), ms(1_000)]
        );
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let p = RetryPolicy::exponential(u32::MAX, ms(100), ms(5_000));
        assert_eq!(p.decide(200), RetryDecision::RetryAfter(ms(5_000)));
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let p = RetryPolicy::fixed(1, ms(10));
        assert_eq!(p.decide(1), RetryDecision::Exhausted);
    }
}
