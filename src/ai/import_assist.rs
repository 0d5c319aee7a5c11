// ==========================================
// 价目表归一化管道 - AI 导入辅助
// ==========================================
// 1. 列映射兜底: 表头 + 样本行 → {"mappings":[{field, column_index, confidence}]}
// 2. PDF 文本提取: 无表格的页面文本 → {"rows":[{name, price, pack_qty, length_cm, country}]}
// ==========================================

use crate::ai::gateway::{input_hash, AiCallError, AiGateway};
use crate::domain::confidence::Confidence;
use crate::domain::types::AiRunKind;
use crate::importer::field_mapper::{ColumnField, ColumnSuggestion};
use crate::importer::file_parser::TabularRow;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// AI 文本提取结果的合成表头（列号即 ColumnMapping 下标）
pub const EXTRACTED_HEADERS: [&str; 5] = ["name", "price", "pack_qty", "length_cm", "country"];

const MAX_TEXT_CHARS: usize = 12_000;

const COLUMN_MAPPING_SYSTEM: &str = "You map columns of a wholesale flower price list. \
Fields: name, price, pack_qty, length, country, group, color. \
Reply with a JSON object {\"mappings\":[{\"field\":\"name\",\"column_index\":0,\"confidence\":0.0}]}. \
column_index is zero-based. Omit fields you cannot find.";

const TEXT_EXTRACTION_SYSTEM: &str = "You extract offers from the text of a wholesale flower price list. \
Reply with a JSON object {\"rows\":[{\"name\":\"\",\"price\":\"\",\"pack_qty\":\"\",\"length_cm\":\"\",\"country\":\"\"}]}. \
Keep names exactly as written. Use empty strings for unknown values. Skip headers and totals.";

#[derive(Deserialize)]
struct RawMapping {
    field: ColumnField,
    column_index: usize,
    confidence: f64,
}

/// Markdown 表格样本（表头 + 前 N 行）
fn build_data_sample(headers: &[String], rows: &[TabularRow], max_rows: usize) -> String {
    let mut sample = String::new();
    let indexed: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{i}: {h}"))
        .collect();
    sample.push_str(&format!("| {} |\n", indexed.join(" | ")));
    for row in rows.iter().take(max_rows) {
        sample.push_str(&format!("| {} |\n", row.cells.join(" | ")));
    }
    if rows.len() > max_rows {
        sample.push_str(&format!("... ({} more rows)\n", rows.len() - max_rows));
    }
    sample
}

pub async fn suggest_columns(
    gateway: &AiGateway,
    supplier_id: &str,
    headers: &[String],
    rows: &[TabularRow],
) -> Result<Vec<ColumnSuggestion>, AiCallError> {
    let sample = build_data_sample(headers, rows, gateway.settings().column_mapping_sample_rows);
    let hash = input_hash(&[sample.as_str()]);
    let call = gateway
        .invoke(AiRunKind::ColumnMapping, supplier_id, &hash, COLUMN_MAPPING_SYSTEM, &sample)
        .await?;

    let suggestions: Vec<ColumnSuggestion> = call
        .json
        .get("mappings")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| serde_json::from_value::<RawMapping>(e.clone()).ok())
                .map(|m| ColumnSuggestion {
                    field: m.field,
                    column_index: m.column_index,
                    confidence: Confidence::from_f64(m.confidence),
                })
                .collect()
        })
        .unwrap_or_default();
    debug!(run_id = %call.run_id, count = suggestions.len(), "AI 列映射建议");
    Ok(suggestions)
}

fn value_to_cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub async fn extract_rows_from_text(
    gateway: &AiGateway,
    supplier_id: &str,
    pages: &[String],
) -> Result<Vec<TabularRow>, AiCallError> {
    let text: String = pages.join("\n").chars().take(MAX_TEXT_CHARS).collect();
    let hash = input_hash(&[text.as_str()]);
    let call = gateway
        .invoke(AiRunKind::TextExtraction, supplier_id, &hash, TEXT_EXTRACTION_SYSTEM, &text)
        .await?;

    let headers: Vec<String> = EXTRACTED_HEADERS.iter().map(|h| h.to_string()).collect();
    let rows: Vec<TabularRow> = call
        .json
        .get("rows")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    EXTRACTED_HEADERS
                        .iter()
                        .map(|key| value_to_cell(entry.get(*key)))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells[0].is_empty())
                .enumerate()
                .map(|(i, cells)| TabularRow {
                    row_number: i + 1,
                    cells,
                    headers: headers.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    debug!(run_id = %call.run_id, rows = rows.len(), "AI 文本提取完成");
    Ok(rows)
}
