use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Retry policy for exchange calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub submit_max_attempts: u32,
    pub cancel_max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Extra random delay as a fraction of the exponential delay
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            submit_max_attempts: 3,
            cancel_max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter_ratio: 0.2,
        }
    }
}

/// Exponential backoff with jitter drawn from a generator seeded by the action name,
/// so two runs of the same action sequence wait exactly the same amounts.
pub struct Backoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
    rng: StdRng,
}

impl Backoff {
    pub fn for_action(action: &str, config: &RetryConfig) -> Self {
        let digest = Sha256::digest(action.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio.max(0.0),
            rng: StdRng::seed_from_u64(u64::from_be_bytes(seed)),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let exp = self.base_delay_ms.saturating_mul(1u64 << exponent) as f64;
        let jitter = exp * self.rng.gen::<f64>() * self.jitter_ratio;
        let delay_ms = (exp + jitter).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_action_same_delays() {
        let config = RetryConfig::default();
        let mut a = Backoff::for_action("submit", &config);
        let mut b = Backoff::for_action("submit", &config);
        for attempt in 1..=5 {
            assert_eq!(a.next_delay(attempt), b.next_delay(attempt));
        }
    }

    #[test]
    fn test_delay_grows_and_is_bounded() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ratio: 0.0,
            ..RetryConfig::default()
        };
        let mut backoff = Backoff::for_action("cancel", &config);
        assert_eq!(backoff.next_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let config = RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.5,
            ..RetryConfig::default()
        };
        let mut backoff = Backoff::for_action("submit", &config);
        let delay = backoff.next_delay(1);
        assert!(delay >= Duration::from_millis(1_000));
        assert!(delay <= Duration::from_millis(1_500));
    }
}
