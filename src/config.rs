//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `YILIU__*` 覆盖（双下划线表示嵌套，如 `YILIU__PIPELINE__WORKER_SLOTS=8`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RetryPolicy;
use crate::model::{ProviderDescriptor, TaskType};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub retry: RetrySection,
    /// [provider.<id>] 段，每个提供商一段
    #[serde(default)]
    pub provider: HashMap<String, ProviderSection>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            retry: RetrySection::default(),
            provider: HashMap::new(),
        }
    }
}

/// [pipeline] 段：worker 池、调度节拍、失败策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// worker 执行槽数
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,
    /// 调度定时器间隔（毫秒），兼做重试与活性检查节拍
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// running 超过该秒数视为 worker 失联
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
    /// 终态失败章节占比超过该值时项目转 failed
    #[serde(default = "default_failure_ratio_threshold")]
    pub failure_ratio_threshold: f64,
    /// 启动时的每章成本估算
    #[serde(default = "default_estimated_cost_per_chapter")]
    pub estimated_cost_per_chapter: f64,
    /// 未在项目配置里指定时的任务最大重试次数
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            worker_slots: default_worker_slots(),
            tick_interval_ms: default_tick_interval_ms(),
            claim_timeout_secs: default_claim_timeout_secs(),
            failure_ratio_threshold: default_failure_ratio_threshold(),
            estimated_cost_per_chapter: default_estimated_cost_per_chapter(),
            default_max_retries: default_max_retries(),
        }
    }
}

fn default_worker_slots() -> usize {
    4
}

fn default_tick_interval_ms() -> u64 {
    200
}

fn default_claim_timeout_secs() -> u64 {
    300
}

fn default_failure_ratio_threshold() -> f64 {
    0.5
}

fn default_estimated_cost_per_chapter() -> f64 {
    0.5
}

fn default_max_retries() -> u32 {
    3
}

/// [retry] 段：重试延迟策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// linear / exponential
    #[serde(default = "default_retry_policy")]
    pub policy: String,
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            policy: default_retry_policy(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_retry_policy() -> String {
    "linear".to_string()
}

fn default_retry_delay_secs() -> u64 {
    60
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        match self.policy.as_str() {
            "exponential" => RetryPolicy::Exponential {
                base_secs: self.delay_secs,
            },
            _ => RetryPolicy::Linear {
                delay_secs: self.delay_secs,
            },
        }
    }
}

/// [provider.<id>] 段：后端种类、凭据与限流参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// mock / openai（openai 指任意 OpenAI 兼容端点）
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// 可承接的阶段名；空表示全部
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: u32,
    #[serde(default = "default_per_minute")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_per_day")]
    pub max_requests_per_day: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cost_per_1k_input_tokens: f64,
    #[serde(default)]
    pub cost_per_1k_output_tokens: f64,
    /// 选择时优先
    #[serde(default)]
    pub default: bool,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            display_name: None,
            base_url: None,
            api_key: None,
            model: None,
            capabilities: Vec::new(),
            languages: default_languages(),
            max_concurrent_requests: default_max_concurrent(),
            max_requests_per_minute: default_per_minute(),
            max_requests_per_day: default_per_day(),
            timeout_secs: default_timeout_secs(),
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
            default: false,
        }
    }
}

fn default_provider_kind() -> String {
    "mock".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["zh-CN".to_string(), "en-US".to_string()]
}

fn default_max_concurrent() -> u32 {
    5
}

fn default_per_minute() -> u32 {
    60
}

fn default_per_day() -> u32 {
    10_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl ProviderSection {
    /// 转为提供商描述；未知的阶段名忽略
    pub fn to_descriptor(&self, id: &str) -> ProviderDescriptor {
        let mut d = ProviderDescriptor::new(id);
        if let Some(name) = &self.display_name {
            d.display_name = name.clone();
        }
        if !self.capabilities.is_empty() {
            d.capabilities = self
                .capabilities
                .iter()
                .filter_map(|s| parse_task_type(s))
                .collect();
        }
        d.supported_languages = self.languages.clone();
        d.max_concurrent_requests = self.max_concurrent_requests;
        d.max_requests_per_minute = self.max_requests_per_minute;
        d.max_requests_per_day = self.max_requests_per_day;
        d.timeout_secs = self.timeout_secs;
        d.cost_per_1k_input_tokens = self.cost_per_1k_input_tokens;
        d.cost_per_1k_output_tokens = self.cost_per_1k_output_tokens;
        d.is_default = self.default;
        d
    }
}

fn parse_task_type(s: &str) -> Option<TaskType> {
    match s {
        "outline" => Some(TaskType::Outline),
        "character_map" => Some(TaskType::CharacterMap),
        "translate" => Some(TaskType::Translate),
        "quality_check" => Some(TaskType::QualityCheck),
        "review" => Some(TaskType::Review),
        _ => {
            tracing::warn!("Unknown task type in provider capabilities: {}", s);
            None
        }
    }
}

/// 从 config 目录加载配置，环境变量 YILIU__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 YILIU__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("YILIU")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
