//! 按提供商的限流器
//!
//! 三条独立上限：并发在途、滚动一分钟、滚动一天。拒绝是非阻塞的——
//! 调度器跳过被拒任务，等下一个 tick 或 release 事件再试；限流器内部
//! 不排队，公平性由调度器的优先级 + FIFO 保证。
//! 使用量计数（请求 / tokens / 成本）也记在这里，按提供商分片加锁，
//! 与只读的描述分离以避免写争用。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::model::ProviderDescriptor;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// 单个提供商的限流参数（从描述拷贝，构造后只读）
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_concurrent: u32,
    per_minute: u32,
    per_day: u32,
}

/// 单个提供商的滑动窗口与使用量（分片互斥区）
#[derive(Default)]
struct Usage {
    in_flight: u32,
    minute_window: VecDeque<Instant>,
    day_window: VecDeque<Instant>,
    total_requests: u64,
    total_tokens: u64,
    total_cost: f64,
}

/// 使用量快照
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub in_flight: u32,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// 限流器：提供商表构造后只读，无全局锁
pub struct RateLimiter {
    providers: HashMap<String, (Limits, Mutex<Usage>)>,
    released: Notify,
}

impl RateLimiter {
    pub fn new(descriptors: &[ProviderDescriptor]) -> Self {
        let providers = descriptors
            .iter()
            .map(|d| {
                let limits = Limits {
                    max_concurrent: d.max_concurrent_requests.max(1),
                    per_minute: d.max_requests_per_minute.max(1),
                    per_day: d.max_requests_per_day.max(1),
                };
                (d.id.clone(), (limits, Mutex::new(Usage::default())))
            })
            .collect();
        Self {
            providers,
            released: Notify::new(),
        }
    }

    /// 尝试获取一个调用许可；拒绝时立即返回 false，不等待
    pub fn try_acquire(&self, provider_id: &str) -> bool {
        let Some((limits, usage)) = self.providers.get(provider_id) else {
            tracing::warn!("Rate limiter: unknown provider {}", provider_id);
            return false;
        };
        let mut usage = usage.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        prune(&mut usage.minute_window, now, MINUTE);
        prune(&mut usage.day_window, now, DAY);

        if usage.in_flight >= limits.max_concurrent
            || usage.minute_window.len() as u32 >= limits.per_minute
            || usage.day_window.len() as u32 >= limits.per_day
        {
            return false;
        }

        usage.in_flight += 1;
        usage.minute_window.push_back(now);
        usage.day_window.push_back(now);
        usage.total_requests += 1;
        true
    }

    /// 释放许可（与 try_acquire 严格配对，成功失败都要调）
    pub fn release(&self, provider_id: &str) {
        if let Some((_, usage)) = self.providers.get(provider_id) {
            let mut usage = usage.lock().expect("limiter lock poisoned");
            usage.in_flight = usage.in_flight.saturating_sub(1);
        }
        // 唤醒调度器：可能有被限流跳过的 ready 任务
        self.released.notify_one();
    }

    /// 记一次调用的 token 与成本
    pub fn record_usage(&self, provider_id: &str, tokens: u64, cost: f64) {
        if let Some((_, usage)) = self.providers.get(provider_id) {
            let mut usage = usage.lock().expect("limiter lock poisoned");
            usage.total_tokens += tokens;
            usage.total_cost += cost;
        }
    }

    pub fn usage(&self, provider_id: &str) -> UsageSnapshot {
        self.providers
            .get(provider_id)
            .map(|(_, usage)| {
                let usage = usage.lock().expect("limiter lock poisoned");
                UsageSnapshot {
                    in_flight: usage.in_flight,
                    total_requests: usage.total_requests,
                    total_tokens: usage.total_tokens,
                    total_cost: usage.total_cost,
                }
            })
            .unwrap_or_default()
    }

    /// release 事件通知（调度器 select 用）
    pub fn released(&self) -> &Notify {
        &self.released
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(front) = window.front() {
        if now.duration_since(*front) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, concurrent: u32, per_minute: u32) -> ProviderDescriptor {
        let mut d = ProviderDescriptor::new(id);
        d.max_concurrent_requests = concurrent;
        d.max_requests_per_minute = per_minute;
        d
    }

    #[test]
    fn test_concurrent_ceiling() {
        let limiter = RateLimiter::new(&[descriptor("p", 2, 100)]);
        assert!(limiter.try_acquire("p"));
        assert!(limiter.try_acquire("p"));
        assert!(!limiter.try_acquire("p"));

        limiter.release("p");
        assert!(limiter.try_acquire("p"));
    }

    #[test]
    fn test_minute_ceiling_counts_completed_requests() {
        let limiter = RateLimiter::new(&[descriptor("p", 10, 3)]);
        for _ in 0..3 {
            assert!(limiter.try_acquire("p"));
            limiter.release("p");
        }
        // 并发为 0，但一分钟窗口已满
        assert!(!limiter.try_acquire("p"));
    }

    #[test]
    fn test_unknown_provider_denied() {
        let limiter = RateLimiter::new(&[]);
        assert!(!limiter.try_acquire("nope"));
    }

    #[test]
    fn test_usage_accounting() {
        let limiter = RateLimiter::new(&[descriptor("p", 5, 100)]);
        assert!(limiter.try_acquire("p"));
        limiter.record_usage("p", 1200, 0.03);
        limiter.release("p");

        let snapshot = limiter.usage("p");
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.total_tokens, 1200);
        assert!((snapshot.total_cost - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_release_never_underflows() {
        let limiter = RateLimiter::new(&[descriptor("p", 1, 10)]);
        limiter.release("p");
        assert_eq!(limiter.usage("p").in_flight, 0);
    }
}
