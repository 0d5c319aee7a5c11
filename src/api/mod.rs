// ==========================================
// 价目表归一化管道 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供 CLI / HTTP / 机器人调用
// ==========================================

pub mod error;
pub mod pipeline_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use pipeline_api::PipelineApi;
