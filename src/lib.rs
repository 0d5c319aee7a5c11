// ==========================================
// 价目表归一化管道 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + OpenAI 兼容接口
// 系统定位: 供应商价目表 → 标准 SKU 报价（人工最终确认映射）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 文件解析与名称解析
pub mod importer;

// 引擎层 - 匹配与发布
pub mod engine;

// AI 辅助层 - 列映射 / 文本抽取 / 属性补全
pub mod ai;

// 配置层 - 字典与阈值
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

pub use api::{ApiError, ApiResult, PipelineApi};
pub use config::NormalizationConfig;
pub use domain::{Confidence, ItemAttributes, SupplierItem};
pub use engine::{MatchingEngine, PublishReconciler};
pub use importer::PriceListImporter;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
