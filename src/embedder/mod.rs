//! Embedding client boundary: the trait every provider implements, plus retry
//! and pacing policies shared across providers.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{RagError, RagResult};

pub mod hashing;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

/// Maps text to fixed-length vectors.
pub trait Embedder: Send + Sync {
    /// Embeds every input, preserving order.
    fn embed_batch(&self, inputs: &[&str]) -> RagResult<Vec<Vec<f32>>>;

    /// Model identifier, used in logs.
    fn model(&self) -> &str;

    /// Embeds a single input.
    fn embed_one(&self, input: &str) -> RagResult<Vec<f32>> {
        if input.trim().is_empty() {
            return Err(RagError::InvalidConfig(
                "cannot embed empty text".to_string(),
            ));
        }
        self.embed_batch(&[input])?
            .pop()
            .ok_or_else(|| RagError::fatal("provider returned no embedding"))
    }
}

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    pub fn run<T, F>(&self, mut op: F) -> RagResult<T>
    where
        F: FnMut() -> RagResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(attempt, ?delay, error = %err, "transient embedding failure; retrying");
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(16),
        }
    }
}

/// Wraps an embedder so consecutive calls are at least `interval` apart.
pub struct Paced<E> {
    inner: E,
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<E> Paced<E> {
    /// Adds pacing around `inner`.
    pub fn new(inner: E, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_call: Mutex::new(None),
        }
    }

    /// Configured minimum spacing between calls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn wait_turn(&self) {
        let mut guard = match self.last_call.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        *guard = Some(Instant::now());
    }
}

impl<E: Embedder> Embedder for Paced<E> {
    fn embed_batch(&self, inputs: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        if !self.interval.is_zero() {
            self.wait_turn();
        }
        self.inner.embed_batch(inputs)
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let result = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RagError::transient("rate limited"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0);
        let result: RagResult<()> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(RagError::fatal("bad key"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        let calls = Cell::new(0);
        let result: RagResult<()> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(RagError::transient("503"))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn paced_embedder_spaces_calls() {
        let paced = Paced::new(HashingEmbedder::new(8), Duration::from_millis(30));
        let start = Instant::now();
        paced.embed_one("first").unwrap();
        paced.embed_one("second").unwrap();
        paced.embed_one("third").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn embed_one_rejects_blank_input() {
        let embedder = HashingEmbedder::new(8);
        assert!(matches!(
            embedder.embed_one("   "),
            Err(RagError::InvalidConfig(_))
        ));
    }
}
