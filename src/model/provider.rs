//! AI 提供商描述：能力集、语言支持、限流参数与单价
//!
//! 只读配置，由限流器与调度器查询；使用量计数单独记在限流器里，
//! 避免对描述本身的写争用。

use serde::{Deserialize, Serialize};

use super::task::TaskType;

/// 提供商描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// 提供商 ID（配置键，如 deepseek-chat）
    pub id: String,
    /// 显示名称
    pub display_name: String,
    /// 可承接的任务类型
    pub capabilities: Vec<TaskType>,
    /// 支持的语言（BCP-47，如 zh-CN）
    pub supported_languages: Vec<String>,
    /// 最大并发请求数
    pub max_concurrent_requests: u32,
    /// 滚动一分钟内最大请求数
    pub max_requests_per_minute: u32,
    /// 滚动一天内最大请求数
    pub max_requests_per_day: u32,
    /// 单次调用超时（秒）
    pub timeout_secs: u64,
    /// 千输入 tokens 单价
    pub cost_per_1k_input_tokens: f64,
    /// 千输出 tokens 单价
    pub cost_per_1k_output_tokens: f64,
    /// 是否默认提供商（选择时优先）
    pub is_default: bool,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            capabilities: vec![
                TaskType::Outline,
                TaskType::CharacterMap,
                TaskType::Translate,
                TaskType::QualityCheck,
                TaskType::Review,
            ],
            supported_languages: vec!["zh-CN".to_string(), "en-US".to_string()],
            max_concurrent_requests: 5,
            max_requests_per_minute: 60,
            max_requests_per_day: 10_000,
            timeout_secs: 30,
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
            is_default: false,
        }
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.supported_languages.iter().any(|l| l == language)
    }

    /// 按输入/输出 tokens 计费
    pub fn cost_of(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1000.0 * self.cost_per_1k_input_tokens
            + output_tokens as f64 / 1000.0 * self.cost_per_1k_output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_of() {
        let mut d = ProviderDescriptor::new("p");
        d.cost_per_1k_input_tokens = 0.5;
        d.cost_per_1k_output_tokens = 1.0;
        let cost = d.cost_of(2000, 1000);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_capability_and_language() {
        let d = ProviderDescriptor::new("p");
        assert!(d.supports(TaskType::Translate));
        assert!(d.supports_language("zh-CN"));
        assert!(!d.supports_language("ja-JP"));
    }
}
