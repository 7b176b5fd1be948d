//! 提供商注册表与选择
//!
//! 按 ID 注册提供商；选择时先按能力与语言过滤，再在候选里
//! 优先默认提供商，其次选累计请求数最少的（朴素负载均衡）。

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{ProviderDescriptor, TaskType};

use super::limiter::RateLimiter;
use super::traits::AiProvider;

/// 提供商注册表
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        let id = provider.descriptor().id.clone();
        if self.providers.insert(id.clone(), provider).is_some() {
            tracing::warn!("Provider {} registered twice, keeping the latest", id);
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn AiProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// 全部提供商描述（限流器初始化用）
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .values()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    /// 为某阶段选择提供商：能力 + 双语言过滤，默认提供商优先，
    /// 其次取累计请求数最少者
    pub fn select(
        &self,
        task_type: TaskType,
        source_language: &str,
        target_language: &str,
        limiter: &RateLimiter,
    ) -> Option<String> {
        let mut candidates: Vec<&ProviderDescriptor> = self
            .providers
            .values()
            .map(|p| p.descriptor())
            .filter(|d| {
                d.supports(task_type)
                    && d.supports_language(source_language)
                    && d.supports_language(target_language)
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| {
            b.is_default.cmp(&a.is_default).then_with(|| {
                limiter
                    .usage(&a.id)
                    .total_requests
                    .cmp(&limiter.usage(&b.id).total_requests)
            })
        });
        Some(candidates[0].id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn registry_of(descriptors: Vec<ProviderDescriptor>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for d in descriptors {
            registry.register(Arc::new(MockProvider::new(d)));
        }
        registry
    }

    #[test]
    fn test_select_prefers_default() {
        let mut a = ProviderDescriptor::new("a");
        a.is_default = false;
        let mut b = ProviderDescriptor::new("b");
        b.is_default = true;
        let registry = registry_of(vec![a, b]);
        let limiter = RateLimiter::new(&registry.descriptors());

        let picked = registry.select(TaskType::Translate, "zh-CN", "en-US", &limiter);
        assert_eq!(picked.as_deref(), Some("b"));
    }

    #[test]
    fn test_select_filters_capability_and_language() {
        let mut outline_only = ProviderDescriptor::new("outline-only");
        outline_only.capabilities = vec![TaskType::Outline];
        let mut ja = ProviderDescriptor::new("ja");
        ja.supported_languages = vec!["ja-JP".to_string(), "en-US".to_string()];
        let registry = registry_of(vec![outline_only, ja]);
        let limiter = RateLimiter::new(&registry.descriptors());

        assert!(registry
            .select(TaskType::Translate, "zh-CN", "en-US", &limiter)
            .is_none());
        assert_eq!(
            registry
                .select(TaskType::Outline, "zh-CN", "en-US", &limiter)
                .as_deref(),
            Some("outline-only")
        );
    }

    #[test]
    fn test_select_balances_by_request_count() {
        let registry = registry_of(vec![ProviderDescriptor::new("a"), ProviderDescriptor::new("b")]);
        let limiter = RateLimiter::new(&registry.descriptors());
        // a 背了两次请求后，应倾向 b
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("a"));

        let picked = registry.select(TaskType::Translate, "zh-CN", "en-US", &limiter);
        assert_eq!(picked.as_deref(), Some("b"));
    }
}
