// ==========================================
// 价目表归一化管道 - 供应商条目领域模型
// ==========================================
// 实体: SupplierItem / ItemAttributes / OfferCandidate
// 红线: 属性只合并不删除; manual 来源与 _locked 字段不被自动覆盖
// ==========================================

use crate::domain::confidence::Confidence;
use crate::domain::types::{AttributeSource, ItemStatus, PriceType, ValidationStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ==========================================
// AttributeField - 属性字段名
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeField {
    CleanName,
    FlowerType,
    Subtype,
    Variety,
    Farm,
    OriginCountry,
    Colors,
    LengthCm,
    PackQty,
    IsBundleList,
    BundleVarieties,
}

impl AttributeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeField::CleanName => "clean_name",
            AttributeField::FlowerType => "flower_type",
            AttributeField::Subtype => "subtype",
            AttributeField::Variety => "variety",
            AttributeField::Farm => "farm",
            AttributeField::OriginCountry => "origin_country",
            AttributeField::Colors => "colors",
            AttributeField::LengthCm => "length_cm",
            AttributeField::PackQty => "pack_qty",
            AttributeField::IsBundleList => "is_bundle_list",
            AttributeField::BundleVarieties => "bundle_varieties",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "clean_name" => Some(AttributeField::CleanName),
            "flower_type" => Some(AttributeField::FlowerType),
            "subtype" => Some(AttributeField::Subtype),
            "variety" => Some(AttributeField::Variety),
            "farm" => Some(AttributeField::Farm),
            "origin_country" => Some(AttributeField::OriginCountry),
            "colors" => Some(AttributeField::Colors),
            "length_cm" => Some(AttributeField::LengthCm),
            "pack_qty" => Some(AttributeField::PackQty),
            "is_bundle_list" => Some(AttributeField::IsBundleList),
            "bundle_varieties" => Some(AttributeField::BundleVarieties),
            _ => None,
        }
    }
}

// ==========================================
// AttributeValue - 属性值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Number(i64),
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// 空文本 / 空列表视为缺失
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Text(s) => s.trim().is_empty(),
            AttributeValue::List(v) => v.is_empty(),
            _ => false,
        }
    }
}

// ==========================================
// ItemAttributes - 带来源追踪的属性集合
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemAttributes {
    #[serde(default)]
    pub values: BTreeMap<AttributeField, AttributeValue>,
    #[serde(rename = "_sources", default)]
    pub sources: BTreeMap<AttributeField, AttributeSource>,
    #[serde(rename = "_confidences", default)]
    pub confidences: BTreeMap<AttributeField, Confidence>,
    #[serde(rename = "_locked", default)]
    pub locked: BTreeSet<AttributeField>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub needs_review: BTreeSet<AttributeField>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ai_marked: BTreeSet<AttributeField>,
}

impl ItemAttributes {
    pub fn get(&self, field: AttributeField) -> Option<&AttributeValue> {
        self.values.get(&field).filter(|v| !v.is_empty())
    }

    pub fn text(&self, field: AttributeField) -> Option<&str> {
        self.get(field).and_then(|v| v.as_text())
    }

    pub fn number(&self, field: AttributeField) -> Option<i64> {
        self.get(field).and_then(|v| v.as_number())
    }

    pub fn flag(&self, field: AttributeField) -> bool {
        matches!(self.values.get(&field), Some(AttributeValue::Flag(true)))
    }

    pub fn list(&self, field: AttributeField) -> &[String] {
        self.get(field).and_then(|v| v.as_list()).unwrap_or(&[])
    }

    pub fn source(&self, field: AttributeField) -> Option<AttributeSource> {
        self.sources.get(&field).copied()
    }

    pub fn is_locked(&self, field: AttributeField) -> bool {
        self.locked.contains(&field)
    }

    /// 字段能否被指定来源写入
    ///
    /// - 锁定字段: 仅 manual 可写
    /// - 低优先级来源不覆盖高优先级来源（parser < ai < manual）
    pub fn is_writable_by(&self, field: AttributeField, source: AttributeSource) -> bool {
        if self.is_locked(field) && source != AttributeSource::Manual {
            return false;
        }
        match self.source(field) {
            Some(existing) if self.get(field).is_some() => source >= existing,
            _ => true,
        }
    }

    /// 写入单个字段，返回是否实际写入
    pub fn apply(
        &mut self,
        field: AttributeField,
        value: AttributeValue,
        source: AttributeSource,
        confidence: Option<Confidence>,
    ) -> bool {
        if value.is_empty() || !self.is_writable_by(field, source) {
            return false;
        }
        self.values.insert(field, value);
        self.sources.insert(field, source);
        match confidence {
            Some(c) => {
                self.confidences.insert(field, c);
            }
            None => {
                self.confidences.remove(&field);
            }
        }
        self.needs_review.remove(&field);
        if source != AttributeSource::Ai {
            self.ai_marked.remove(&field);
        }
        true
    }

    /// 合并另一份属性（只增不删）
    ///
    /// 对方缺失的字段保持原值；对方已有值按来源优先级逐字段写入。
    pub fn merge_from(&mut self, incoming: &ItemAttributes) -> usize {
        let mut written = 0;
        for (field, value) in &incoming.values {
            let source = incoming
                .sources
                .get(field)
                .copied()
                .unwrap_or(AttributeSource::Parser);
            let confidence = incoming.confidences.get(field).copied();
            if self.apply(*field, value.clone(), source, confidence) {
                written += 1;
            }
        }
        written
    }

    pub fn lock(&mut self, field: AttributeField) {
        self.locked.insert(field);
    }
}

// ==========================================
// SupplierItem - 供应商稳定产品线
// ==========================================
// 红线: (supplier_id, stable_key) 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierItem {
    pub item_id: String,
    pub supplier_id: String,
    pub stable_key: String,
    pub raw_name: String,
    pub raw_group: Option<String>,
    pub attributes: ItemAttributes,
    pub status: ItemStatus,
    pub last_batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// OfferCandidate - 单批次内的价格/数量变体
// ==========================================
// 红线: price_max >= price_min; 数量非负; 创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferCandidate {
    pub candidate_id: String,
    pub batch_id: String,
    pub item_id: String,
    pub row_number: usize,
    pub length_cm: Option<u32>,
    pub pack_qty: Option<u32>,
    pub price_type: PriceType,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub validation: ValidationStatus,
    pub validation_notes: Vec<String>,
    pub created_at: DateTime<Utc>,
}
