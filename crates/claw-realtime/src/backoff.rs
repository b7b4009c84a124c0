//! Reconnection delay policy.

use std::time::Duration;

use rand::Rng;

use crate::close::is_jitter_eligible;
use crate::config::ReconnectConfig;

/// Computes the delay before a reconnection attempt.
///
/// The delay is the base delay, widened by a uniform jitter in
/// `[0, base_delay * jitter_factor]` when the close code is one that tends to
/// disconnect many clients at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay applied to every attempt.
    pub base_delay: Duration,
    /// Upper bound of the jitter as a multiple of `base_delay`.
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(base_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            jitter_factor,
        }
    }

    /// Largest delay this policy can produce.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.base_delay + self.jitter_span()
    }

    /// Delay for a closure with `code`, using `sample` in `[0, 1)` as the jitter draw.
    #[must_use]
    pub fn delay(&self, code: u16, sample: f64) -> Duration {
        if !is_jitter_eligible(code) {
            return self.base_delay;
        }
        let sample = sample.clamp(0.0, 1.0);
        self.base_delay + self.jitter_span().mul_f64(sample)
    }

    /// Delay for a closure with `code`, drawing jitter from `rng`.
    #[must_use]
    pub fn delay_with_rng<R: Rng>(&self, code: u16, rng: &mut R) -> Duration {
        self.delay(code, rng.r#gen::<f64>())
    }

    fn jitter_span(&self) -> Duration {
        if self.jitter_factor.is_finite() && self.jitter_factor > 0.0 {
            self.base_delay.mul_f64(self.jitter_factor)
        } else {
            Duration::ZERO
        }
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.delay(), config.jitter_factor)
    }
}
