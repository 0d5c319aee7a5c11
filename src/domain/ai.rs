// ==========================================
// 价目表归一化管道 - AI 运行领域模型
// ==========================================
// 实体: AiRun / AiSuggestion
// 用途: input_hash 用于缓存复用
// ==========================================

use crate::domain::confidence::Confidence;
use crate::domain::item::AttributeField;
use crate::domain::types::{AiRunKind, AiRunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRun {
    pub run_id: String,
    pub supplier_id: String,
    pub kind: AiRunKind,
    pub input_hash: String,
    pub status: AiRunStatus,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 单字段建议（按 raw_name 关联条目，而非按位置）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSuggestion {
    pub run_id: String,
    pub raw_name: String,
    pub field: AttributeField,
    pub value: String,
    pub confidence: Confidence,
}
