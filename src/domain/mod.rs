// ==========================================
// 价目表归一化管道 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、值对象
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod ai;
pub mod batch;
pub mod catalog;
pub mod confidence;
pub mod item;
pub mod types;

// 重导出核心类型
pub use ai::{AiRun, AiSuggestion};
pub use batch::{ImportBatch, ParseEvent, ParseRun, RawRow, Supplier};
pub use catalog::{DictionaryEntry, NormalizationTask, NormalizedSku, Offer, SkuMapping};
pub use confidence::Confidence;
pub use item::{AttributeField, AttributeValue, ItemAttributes, OfferCandidate, SupplierItem};
pub use types::{
    AiRunKind, AiRunStatus, AttributeSource, BatchStatus, DictionaryStatus, ItemStatus,
    MappingMethod, MappingStatus, PriceType, Severity, SourceType, SupplierTier, TaskStatus,
    ValidationStatus,
};
