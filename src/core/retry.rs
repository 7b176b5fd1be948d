//! 重试延迟策略

use std::time::Duration;

/// 重试延迟：linear 是 delay × 次数，exponential 是 base × 2^(次数-1)
#[derive(Debug, Clone, Copy)]
pub enum RetryPolicy {
    Linear { delay_secs: u64 },
    Exponential { base_secs: u64 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Linear { delay_secs: 60 }
    }
}

impl RetryPolicy {
    /// 第 retry_count 次重试（1 起）前的等待时长
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let count = retry_count.max(1);
        let secs = match self {
            RetryPolicy::Linear { delay_secs } => delay_secs.saturating_mul(count as u64),
            RetryPolicy::Exponential { base_secs } => {
                base_secs.saturating_mul(1u64 << (count - 1).min(16))
            }
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_grows_with_count() {
        let policy = RetryPolicy::Linear { delay_secs: 60 };
        assert_eq!(policy.next_delay(1), Duration::from_secs(60));
        assert_eq!(policy.next_delay(3), Duration::from_secs(180));
    }

    #[test]
    fn test_exponential_doubles() {
        let policy = RetryPolicy::Exponential { base_secs: 30 };
        assert_eq!(policy.next_delay(1), Duration::from_secs(30));
        assert_eq!(policy.next_delay(2), Duration::from_secs(60));
        assert_eq!(policy.next_delay(4), Duration::from_secs(240));
    }
}
