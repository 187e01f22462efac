use std::time::Duration;

/// Bounded retry policy: a maximum attempt count and an ordered,
/// non-empty list of per-attempt delays (`spec.md` §4.1).
///
/// The delay before attempt `i > 0` is `delays[min(i-1, delays.len()-1)]`:
/// once the list is exhausted its last entry is reused for any remaining
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Construct a policy. `max_attempts` must be >= 1 and `delays` must be
    /// non-empty; both are configuration errors the caller is expected to
    /// have validated (see `config::CoreConfig`), so this never fails at
    /// runtime — it panics on a programmer error instead of returning a
    /// `Result` the hot path would have to unwrap anyway.
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        assert!(max_attempts >= 1, "max_attempts must be at least 1");
        assert!(!delays.is_empty(), "delays must be non-empty");
        Self { max_attempts, delays }
    }

    /// The network-fetch defaults from `spec.md` §4.1: 3 attempts, delays
    /// 100ms / 1s / 10s.
    pub fn network_defaults() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_millis(100),
                Duration::from_secs(1),
                Duration::from_secs(10),
            ],
        )
    }

    /// The block-storage defaults from `spec.md` §4.1: 2 attempts, delays
    /// 100ms / 1s.
    pub fn block_storage_defaults() -> Self {
        Self::new(2, vec![Duration::from_millis(100), Duration::from_secs(1)])
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to use before making attempt `attempt` (1-based: the delay
    /// before the *second* attempt is `delay_before_attempt(2)`).
    pub(crate) fn delay_before_attempt(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).saturating_sub(2).min(self.delays.len() - 1);
        self.delays[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_attempt_policy_has_no_meaningful_delay_use() {
        let p = RetryPolicy::new(1, vec![Duration::from_millis(1)]);
        assert_eq!(p.max_attempts(), 1);
    }

    #[test]
    fn delay_schedule_reuses_last_entry_on_overflow() {
        let p = RetryPolicy::new(
            5,
            vec![Duration::from_millis(100), Duration::from_secs(1), Duration::from_secs(10)],
        );
        assert_eq!(p.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(p.delay_before_attempt(3), Duration::from_secs(1));
        assert_eq!(p.delay_before_attempt(4), Duration::from_secs(10));
        // Overflow: attempt 5 reuses the last delay.
        assert_eq!(p.delay_before_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn network_defaults_match_spec() {
        let p = RetryPolicy::network_defaults();
        assert_eq!(p.max_attempts(), 3);
        assert_eq!(p.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(p.delay_before_attempt(3), Duration::from_secs(1));
    }

    #[test]
    fn block_storage_defaults_match_spec() {
        let p = RetryPolicy::block_storage_defaults();
        assert_eq!(p.max_attempts(), 2);
        assert_eq!(p.delay_before_attempt(2), Duration::from_millis(100));
    }

    #[test]
    #[should_panic(expected = "max_attempts")]
    fn zero_attempts_is_a_configuration_error() {
        RetryPolicy::new(0, vec![Duration::from_millis(1)]);
    }

    #[test]
    #[should_panic(expected = "delays")]
    fn empty_delay_list_is_a_configuration_error() {
        RetryPolicy::new(3, vec![]);
    }
}
