// ==========================================
// 价目表归一化管道 - AI 辅助层
// ==========================================
// 职责: 供应方抽象、调用网关（限流/记录/超时）、导入兜底、属性补全
// 红线: AI 失败只降级，不中断导入或匹配
// ==========================================

pub mod enrichment;
pub mod gateway;
pub mod import_assist;
pub mod provider;

pub use enrichment::{AiEnricher, EnrichmentOutcome, EnrichmentStats};
pub use gateway::{AiCall, AiCallError, AiGateway, RateLimitScope};
pub use provider::{AiProvider, AiProviderError, AiResponse, OpenAiCompatibleProvider};
