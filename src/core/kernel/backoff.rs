use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Delay schedule between reconnect attempts.
///
/// Attempts are unlimited; the delay grows by `factor` from `initial_delay`
/// up to `max_delay`, plus up to `jitter` of random spread.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: Duration,
    /// Seed for the jitter source; `None` seeds from the OS.
    pub jitter_seed: Option<u64>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: Duration::ZERO,
            jitter_seed: None,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay between attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
            jitter: Duration::ZERO,
            jitter_seed: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration, seed: Option<u64>) -> Self {
        self.jitter = jitter;
        self.jitter_seed = seed;
        self
    }

    /// Delay before the given attempt (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Stateful backoff driven by a [`BackoffPolicy`] and an injected RNG.
#[derive(Debug)]
pub struct Backoff<R: Rng = StdRng> {
    policy: BackoffPolicy,
    attempt: u32,
    rng: R,
}

impl Backoff<StdRng> {
    pub fn from_policy(policy: BackoffPolicy) -> Self {
        let rng = match policy.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(policy, rng)
    }
}

impl<R: Rng> Backoff<R> {
    pub fn with_rng(policy: BackoffPolicy, rng: R) -> Self {
        Self {
            policy,
            attempt: 0,
            rng,
        }
    }

    /// Advance to the next attempt and return how long to wait before it
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.policy.base_delay(self.attempt);

        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
    }

    /// Forget past failures after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
