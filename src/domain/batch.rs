// ==========================================
// 价目表归一化管道 - 导入批次领域模型
// ==========================================
// 实体: Supplier / ImportBatch / RawRow / ParseRun / ParseEvent
// 红线: RawRow 创建后不可变; ParseEvent 只追加
// ==========================================

use crate::domain::types::{BatchStatus, Severity, SourceType, SupplierTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Supplier - 供应商
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub supplier_id: String,
    pub name: String,
    pub tier: SupplierTier,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// ImportBatch - 一次文件上传
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: String,
    pub supplier_id: String,
    pub source_type: SourceType,
    pub file_name: Option<String>,
    pub status: BatchStatus,
    pub meta: serde_json::Value, // 失败原因 / 行数统计
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// RawRow - 不可变源记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub raw_row_id: String,
    pub batch_id: String,
    pub ordinal: usize,       // 源文件物理行号
    pub cells: Vec<String>,   // 原始单元格
    pub raw_text: String,     // 单元格以 " | " 拼接
}

// ==========================================
// ParseRun - 一次解析执行
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRun {
    pub run_id: String,
    pub batch_id: String,
    pub parser_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ==========================================
// ParseEvent - 解析诊断事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseEvent {
    pub row_number: Option<usize>, // None 表示批次级事件
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ParseEvent {
    pub fn row(row_number: usize, severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            row_number: Some(row_number),
            severity,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn batch(severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            row_number: None,
            severity,
            code: code.to_string(),
            message: message.into(),
        }
    }
}
