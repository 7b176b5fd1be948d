//! AI 能力提供商：抽象、限流、注册与选择

pub mod http;
pub mod limiter;
pub mod mock;
pub mod registry;
pub mod traits;

pub use http::OpenAiCompatProvider;
pub use limiter::{RateLimiter, UsageSnapshot};
pub use mock::MockProvider;
pub use registry::ProviderRegistry;
pub use traits::{AiProvider, InvokePayload, Invocation, ProviderError};
