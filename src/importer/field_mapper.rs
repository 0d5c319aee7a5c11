// ==========================================
// 价目表归一化管道 - 列映射器
// ==========================================
// 职责: 表头 → 标准字段 {name, price, pack_qty, length, country, group, color}
// 规则: 小写后关键词包含匹配；每个字段取第一个命中列；每列只归属一个字段
// 兜底: name/price 未解析时可接受 AI 列映射建议（置信度 ≥ 阈值且列号有效）
// ==========================================

use crate::config::ColumnKeywords;
use crate::domain::confidence::Confidence;
use crate::importer::file_parser::TabularRow;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnField {
    Name,
    Price,
    PackQty,
    Length,
    Country,
    Group,
    Color,
}

impl ColumnField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnField::Name => "name",
            ColumnField::Price => "price",
            ColumnField::PackQty => "pack_qty",
            ColumnField::Length => "length",
            ColumnField::Country => "country",
            ColumnField::Group => "group",
            ColumnField::Color => "color",
        }
    }
}

/// AI 列映射建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSuggestion {
    pub field: ColumnField,
    pub column_index: usize,
    pub confidence: Confidence,
}

/// 字段 → 列号
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub name: Option<usize>,
    pub price: Option<usize>,
    pub pack_qty: Option<usize>,
    pub length: Option<usize>,
    pub country: Option<usize>,
    pub group: Option<usize>,
    pub color: Option<usize>,
}

/// 按映射取出的单行字段值（空串视为缺失）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedRow {
    pub name: Option<String>,
    pub price: Option<String>,
    pub pack_qty: Option<String>,
    pub length: Option<String>,
    pub country: Option<String>,
    pub group: Option<String>,
    pub color: Option<String>,
}

impl ColumnMapping {
    fn slot(&mut self, field: ColumnField) -> &mut Option<usize> {
        match field {
            ColumnField::Name => &mut self.name,
            ColumnField::Price => &mut self.price,
            ColumnField::PackQty => &mut self.pack_qty,
            ColumnField::Length => &mut self.length,
            ColumnField::Country => &mut self.country,
            ColumnField::Group => &mut self.group,
            ColumnField::Color => &mut self.color,
        }
    }

    fn assigned(&self) -> [Option<usize>; 7] {
        [
            self.name,
            self.price,
            self.pack_qty,
            self.length,
            self.country,
            self.group,
            self.color,
        ]
    }

    /// 必填字段（name、price）均已解析
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.price.is_some()
    }

    /// 未解析的必填字段
    pub fn missing_mandatory(&self) -> Vec<ColumnField> {
        let mut missing = Vec::new();
        if self.name.is_none() {
            missing.push(ColumnField::Name);
        }
        if self.price.is_none() {
            missing.push(ColumnField::Price);
        }
        missing
    }

    /// 应用 AI 建议，仅填补空缺字段；返回采纳条数
    pub fn apply_suggestions(
        &mut self,
        suggestions: &[ColumnSuggestion],
        header_count: usize,
        min_confidence: Confidence,
    ) -> usize {
        let mut accepted = 0;
        for s in suggestions {
            if s.confidence < min_confidence || s.column_index >= header_count {
                debug!(field = s.field.as_str(), column = s.column_index, confidence = %s.confidence, "AI 列映射建议被拒绝");
                continue;
            }
            if self.assigned().contains(&Some(s.column_index)) {
                continue;
            }
            let slot = self.slot(s.field);
            if slot.is_none() {
                *slot = Some(s.column_index);
                accepted += 1;
            }
        }
        accepted
    }

    pub fn extract(&self, row: &TabularRow) -> MappedRow {
        let get = |index: Option<usize>| {
            index
                .and_then(|i| row.cell(i))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };
        MappedRow {
            name: get(self.name),
            price: get(self.price),
            pack_qty: get(self.pack_qty),
            length: get(self.length),
            country: get(self.country),
            group: get(self.group),
            color: get(self.color),
        }
    }
}

// ==========================================
// ColumnMapper
// ==========================================
pub struct ColumnMapper<'a> {
    keywords: &'a ColumnKeywords,
}

impl<'a> ColumnMapper<'a> {
    pub fn new(keywords: &'a ColumnKeywords) -> Self {
        Self { keywords }
    }

    /// 关键词匹配
    ///
    /// 字段处理顺序: price → pack_qty → length → country → group → color → name
    /// （name 关键词最宽泛，放最后，避免吞掉 "Группа товаров" 之类的列）
    pub fn map_headers(&self, headers: &[String]) -> ColumnMapping {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let order: [(ColumnField, &Vec<String>); 7] = [
            (ColumnField::Price, &self.keywords.price),
            (ColumnField::PackQty, &self.keywords.pack_qty),
            (ColumnField::Length, &self.keywords.length),
            (ColumnField::Country, &self.keywords.country),
            (ColumnField::Group, &self.keywords.group),
            (ColumnField::Color, &self.keywords.color),
            (ColumnField::Name, &self.keywords.name),
        ];

        let mut mapping = ColumnMapping::default();
        for (field, keywords) in order {
            let taken = mapping.assigned();
            let hit = lowered.iter().enumerate().find(|(index, header)| {
                !header.is_empty()
                    && !taken.contains(&Some(*index))
                    && keywords.iter().any(|k| header.contains(k.to_lowercase().as_str()))
            });
            if let Some((index, _)) = hit {
                *mapping.slot(field) = Some(index);
            }
        }

        debug!(mapping = ?mapping, "列映射完成");
        mapping
    }
}
