use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use dashmap::DashMap;

use crate::config::RetryConfig;

/// Per-key exponential backoff for failed reconciles.
///
/// Delays grow as `base * 2^(n-1)` up to `max`, spread by a jitter window
/// derived deterministically from the key and failure count so that keys
/// failing together do not retry in lockstep.
#[derive(Debug)]
pub struct RetryPolicy<K: Eq + Hash> {
    config: RetryConfig,
    failures: DashMap<K, u16>,
}

impl<K> RetryPolicy<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Records a failure for `key` and returns how long to wait before the
    /// next attempt.
    pub fn next_delay(&self, key: &K) -> Duration {
        let attempt = {
            let mut failures = self.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let anchor = self.base_delay_ms(attempt);
        Duration::from_millis(self.jittered_delay_ms(anchor, key, attempt))
    }

    pub fn failures(&self, key: &K) -> u16 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }

    /// Forgets the failure history after a successful reconcile.
    pub fn reset(&self, key: &K) {
        self.failures.remove(key);
    }

    fn base_delay_ms(&self, attempt: u16) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = (attempt.saturating_sub(1)) as i32;
        let scaled = (self.config.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.config.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    fn jittered_delay_ms(&self, anchor_ms: u64, key: &K, attempt: u16) -> u64 {
        if anchor_ms == 0 {
            return 0;
        }

        let jitter_ratio = f64::from(self.config.jitter_ratio.max(0.0));
        let jitter_span = ((anchor_ms as f64) * jitter_ratio)
            .max(self.config.jitter_min_ms as f64)
            .min(self.config.backoff_max_ms as f64);

        let lower = 0f64.max(anchor_ms as f64 - jitter_span);
        let upper =
            (anchor_ms as f64 + jitter_span).min(self.config.backoff_max_ms as f64);
        if upper <= lower {
            return lower.round() as u64;
        }

        let unit = deterministic_unit(key, attempt);
        (lower + (upper - lower) * unit).round() as u64
    }
}

fn deterministic_unit<K: Hash>(key: &K, attempt: u16) -> f64 {
    let mut hasher = DefaultHasher::default();
    key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let bits = hasher.finish();
    (bits as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy<String> {
        RetryPolicy::new(RetryConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
            jitter_ratio: 0.25,
            jitter_min_ms: 100,
        })
    }

    #[test]
    fn delays_grow_within_jitter_bounds_and_cap() {
        let policy = policy();
        let key = "default/web-1".to_string();

        let expected_anchor = [1_000u64, 2_000, 4_000, 8_000, 10_000, 10_000];
        for anchor in expected_anchor {
            let delay = policy.next_delay(&key).as_millis() as u64;
            let span = (anchor / 4).max(100);
            assert!(delay >= anchor - span, "{delay} below window of {anchor}");
            assert!(delay <= (anchor + span).min(10_000), "{delay} above window of {anchor}");
        }
        assert_eq!(policy.failures(&key), 6);
    }

    #[test]
    fn reset_starts_over() {
        let policy = policy();
        let key = "ns/a".to_string();
        policy.next_delay(&key);
        policy.next_delay(&key);
        policy.reset(&key);
        assert_eq!(policy.failures(&key), 0);
        assert!(policy.next_delay(&key) <= Duration::from_millis(1_250));
    }

    #[test]
    fn jitter_is_deterministic_per_key() {
        let a = policy();
        let b = policy();
        let key = "ns/a".to_string();
        assert_eq!(a.next_delay(&key), b.next_delay(&key));
    }
}
