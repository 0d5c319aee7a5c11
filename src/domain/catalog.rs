// ==========================================
// 价目表归一化管道 - 目录与映射领域模型
// ==========================================
// 实体: DictionaryEntry / NormalizedSku / SkuMapping / NormalizationTask / Offer
// ==========================================

use crate::domain::confidence::Confidence;
use crate::domain::types::{
    DictionaryStatus, MappingMethod, MappingStatus, PriceType, TaskStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// DictionaryEntry - 归一化规则 / 同义词
// ==========================================
// 红线: (dict_type, key) 唯一
// dict_type: product_type / variety_alias / subtype / country / color / stopword
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub entry_id: String,
    pub dict_type: String,
    pub key: String,
    pub value: String,
    pub synonyms: Vec<String>,
    pub rules: serde_json::Value,
    pub status: DictionaryStatus,
}

// ==========================================
// NormalizedSku - 目录标准商品
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSku {
    pub sku_id: String,
    pub product_type: String,
    pub variety: Option<String>,
    pub subtype: Option<String>,
    pub color: Option<String>,
    pub title: String,
    pub meta: serde_json::Value,
}

// ==========================================
// SkuMapping - SupplierItem ↔ NormalizedSku
// ==========================================
// 红线: 每个 SupplierItem 至多一条 confirmed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuMapping {
    pub mapping_id: String,
    pub item_id: String,
    pub sku_id: String,
    pub confidence: Confidence,
    pub method: MappingMethod,
    pub status: MappingStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

// ==========================================
// NormalizationTask - 人工复核单元
// ==========================================
// 红线: 每个 SupplierItem 至多一条 open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationTask {
    pub task_id: String,
    pub item_id: String,
    pub reason: String,
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// Offer - 已发布报价
// ==========================================
// 红线: 任一时刻每个供应商只有一套 active 报价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub supplier_id: String,
    pub batch_id: String,
    pub candidate_id: String,
    pub item_id: String,
    pub sku_id: String,
    pub display_title: String,
    pub length_cm: Option<u32>,
    pub pack_qty: Option<u32>,
    pub price_type: PriceType,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
