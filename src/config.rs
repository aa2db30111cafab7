use std::time::Duration;

/// Explicit configuration for the client façade. No package-level mutable
/// flags: everything the façade and Sync Engine need is carried here,
/// constructed by the caller (the shell resolves `ENGRAM_STORE` etc. before
/// building this).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub store_path: std::path::PathBuf,
    pub store_id: String,
    pub remote_base_url: Option<String>,
    pub api_key: Option<String>,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(store_path: impl Into<std::path::PathBuf>, store_id: impl Into<String>) -> Self {
        ClientConfig {
            store_path: store_path.into(),
            store_id: store_id.into(),
            remote_base_url: None,
            api_key: None,
            user_agent: format!("engram-core/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_remote(mut self, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.remote_base_url = Some(base_url.into());
        self.api_key = Some(api_key.into());
        self
    }
}

/// Capped exponential backoff parameters for Push's transient-failure retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (1-indexed) retry attempt, doubling from
    /// `base_delay` and capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let scaled = self.base_delay.as_millis().saturating_mul(factor as u128);
        let capped = scaled.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }
}
