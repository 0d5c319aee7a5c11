// ==========================================
// 价目表归一化管道 - 领域类型定义
// ==========================================
// 职责: 批次 / 条目 / 映射 / 任务 / AI 运行的状态枚举
// 序列化格式: snake_case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 源文件类型 (Source Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Csv,
    Xlsx,
    Pdf,
}

impl SourceType {
    /// 从文件扩展名推断（不区分大小写）
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" | "txt" => Some(SourceType::Csv),
            "xlsx" | "xlsm" => Some(SourceType::Xlsx),
            "pdf" => Some(SourceType::Pdf),
            _ => None,
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Self::from_extension(s)
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Xlsx => "xlsx",
            SourceType::Pdf => "pdf",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 导入批次状态 (Batch Status)
// ==========================================
// 红线: 状态单调推进; failed 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Received,
    Parsed,
    Failed,
    Published,
}

impl BatchStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "received" => Some(BatchStatus::Received),
            "parsed" => Some(BatchStatus::Parsed),
            "failed" => Some(BatchStatus::Failed),
            "published" => Some(BatchStatus::Published),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchStatus::Received => "received",
            BatchStatus::Parsed => "parsed",
            BatchStatus::Failed => "failed",
            BatchStatus::Published => "published",
        }
    }

    /// 状态转换是否合法
    ///
    /// - received → parsed | failed
    /// - parsed → published
    /// - published → published（重复发布）
    /// - failed → 无
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Received, BatchStatus::Parsed)
                | (BatchStatus::Received, BatchStatus::Failed)
                | (BatchStatus::Parsed, BatchStatus::Published)
                | (BatchStatus::Published, BatchStatus::Published)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 解析事件级别 (Severity)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warn" | "warning" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 供应商条目状态 (Item Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Deleted, // 软删除
}

impl ItemStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(ItemStatus::Active),
            "deleted" => Some(ItemStatus::Deleted),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Deleted => "deleted",
        }
    }
}

// ==========================================
// 价格类型 (Price Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Fixed,
    Range,
}

impl PriceType {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Some(PriceType::Fixed),
            "range" => Some(PriceType::Range),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            PriceType::Fixed => "fixed",
            PriceType::Range => "range",
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 候选报价校验结果 (Validation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Ok,
    Warn,
    Error,
}

impl ValidationStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ok" => Some(ValidationStatus::Ok),
            "warn" => Some(ValidationStatus::Warn),
            "error" => Some(ValidationStatus::Error),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ValidationStatus::Ok => "ok",
            ValidationStatus::Warn => "warn",
            ValidationStatus::Error => "error",
        }
    }

    /// 可发布（ok / warn）
    pub fn is_publishable(&self) -> bool {
        matches!(self, ValidationStatus::Ok | ValidationStatus::Warn)
    }
}

// ==========================================
// 字典条目状态 (Dictionary Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryStatus {
    Active,
    Draft,
    Archived,
}

impl DictionaryStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(DictionaryStatus::Active),
            "draft" => Some(DictionaryStatus::Draft),
            "archived" => Some(DictionaryStatus::Archived),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            DictionaryStatus::Active => "active",
            DictionaryStatus::Draft => "draft",
            DictionaryStatus::Archived => "archived",
        }
    }
}

// ==========================================
// 映射方式 (Mapping Method)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    Rule,
    Manual,
    Semantic,
}

impl MappingMethod {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "rule" => Some(MappingMethod::Rule),
            "manual" => Some(MappingMethod::Manual),
            "semantic" => Some(MappingMethod::Semantic),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            MappingMethod::Rule => "rule",
            MappingMethod::Manual => "manual",
            MappingMethod::Semantic => "semantic",
        }
    }
}

// ==========================================
// 映射状态 (Mapping Status)
// ==========================================
// 红线: 每个 SupplierItem 至多一条 confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Proposed,
    Confirmed,
    Rejected,
}

impl MappingStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "proposed" => Some(MappingStatus::Proposed),
            "confirmed" => Some(MappingStatus::Confirmed),
            "rejected" => Some(MappingStatus::Rejected),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            MappingStatus::Proposed => "proposed",
            MappingStatus::Confirmed => "confirmed",
            MappingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 归一化任务状态 (Task Status)
// ==========================================
// 红线: 每个 SupplierItem 至多一条 open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(TaskStatus::Open),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

// ==========================================
// 属性来源 (Attribute Source)
// ==========================================
// 优先级: manual > ai > parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSource {
    Parser,
    Ai,
    Manual,
}

impl AttributeSource {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AttributeSource::Parser => "parser",
            AttributeSource::Ai => "ai",
            AttributeSource::Manual => "manual",
        }
    }
}

// ==========================================
// 供应商等级 (Supplier Tier)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierTier {
    Key,
    Regular,
}

impl SupplierTier {
    pub fn from_db_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "key" => SupplierTier::Key,
            _ => SupplierTier::Regular, // 默认值
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SupplierTier::Key => "key",
            SupplierTier::Regular => "regular",
        }
    }
}

// ==========================================
// AI 运行状态 / 类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiRunStatus {
    Running,
    Succeeded,
    Failed,
}

impl AiRunStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "running" => Some(AiRunStatus::Running),
            "succeeded" => Some(AiRunStatus::Succeeded),
            "failed" => Some(AiRunStatus::Failed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AiRunStatus::Running => "running",
            AiRunStatus::Succeeded => "succeeded",
            AiRunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiRunKind {
    Enrichment,
    ColumnMapping,
    TextExtraction,
}

impl AiRunKind {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "enrichment" => Some(AiRunKind::Enrichment),
            "column_mapping" => Some(AiRunKind::ColumnMapping),
            "text_extraction" => Some(AiRunKind::TextExtraction),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AiRunKind::Enrichment => "enrichment",
            AiRunKind::ColumnMapping => "column_mapping",
            AiRunKind::TextExtraction => "text_extraction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_transitions() {
        assert!(BatchStatus::Received.can_transition_to(BatchStatus::Parsed));
        assert!(BatchStatus::Received.can_transition_to(BatchStatus::Failed));
        assert!(BatchStatus::Parsed.can_transition_to(BatchStatus::Published));
        assert!(!BatchStatus::Failed.can_transition_to(BatchStatus::Parsed));
        assert!(!BatchStatus::Parsed.can_transition_to(BatchStatus::Received));
    }

    #[test]
    fn test_db_str_roundtrip() {
        for s in [TaskStatus::Open, TaskStatus::InProgress, TaskStatus::Done] {
            assert_eq!(TaskStatus::from_db_str(s.to_db_str()), Some(s));
        }
        assert_eq!(SourceType::from_extension(".XLSX"), Some(SourceType::Xlsx));
        assert_eq!(SupplierTier::from_db_str("unknown"), SupplierTier::Regular);
    }
}
