// ==========================================
// 价目表归一化管道 - 价目表导入编排器
// ==========================================
// 流程: 解析 → 列映射（AI 兜底）→ 原始行落库 → 逐行提取 → 条目 upsert → 候选报价
// 批次状态: received → parsed | failed
// 红线: 行级失败只记 ParseEvent 并继续；批次级失败置 failed 并写入 meta.error
// ==========================================

use crate::ai::gateway::AiGateway;
use crate::ai::import_assist::{extract_rows_from_text, suggest_columns};
use crate::config::NormalizationConfig;
use crate::domain::batch::{ImportBatch, ParseEvent, ParseRun, RawRow};
use crate::domain::confidence::Confidence;
use crate::domain::item::{AttributeField, AttributeValue, ItemAttributes, OfferCandidate, SupplierItem};
use crate::domain::types::{AttributeSource, BatchStatus, ItemStatus, Severity, SourceType, ValidationStatus};
use crate::importer::attribute_extractor::{
    extract_length_cm, extract_origin_country, extract_pack_qty, parse_length_cell, parse_pack_cell, parse_price,
};
use crate::importer::error::{ImportError, ImportResult, RowError};
use crate::importer::field_mapper::{ColumnMapper, ColumnMapping};
use crate::importer::file_parser::{Extraction, ParseOptions, TabularRow, UniversalFileParser};
use crate::importer::name_parser::{NameParser, ParsedName};
use crate::importer::name_sanitizer::NameSanitizer;
use crate::importer::stable_key::stable_key;
use crate::repository::ImportRepository;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// ImportReport - 导入结果汇总
// ==========================================
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub batch_id: String,
    pub total_rows: usize,
    pub ok_rows: usize,
    pub warn_rows: usize,
    pub error_rows: usize,
    pub items_created: usize,
    pub items_updated: usize,
    pub candidates_created: usize,
    pub events: Vec<ParseEvent>,
}

/// 提取阶段产物
struct PreparedRows {
    rows: Vec<TabularRow>,
    mapping: ColumnMapping,
    events: Vec<ParseEvent>,
}

/// 单行处理结果
struct RowSummary {
    validation: ValidationStatus,
    item_created: bool,
    events: Vec<ParseEvent>,
}

/// 行内共享的只读组件
struct RowContext<'a> {
    supplier_id: &'a str,
    batch_id: &'a str,
    mapping: &'a ColumnMapping,
    sanitizer: NameSanitizer<'a>,
    parser: NameParser<'a>,
}

fn parsed_attributes(parsed: &ParsedName, country: Option<String>) -> ItemAttributes {
    let mut attrs = ItemAttributes::default();
    let mut put = |field: AttributeField, value: AttributeValue| {
        attrs.apply(field, value, AttributeSource::Parser, None);
    };
    let text = |v: &Option<String>| v.clone().map(AttributeValue::Text);

    for (field, value) in [
        (AttributeField::FlowerType, text(&parsed.flower_type)),
        (AttributeField::Subtype, text(&parsed.subtype)),
        (AttributeField::Variety, text(&parsed.variety)),
        (AttributeField::Farm, text(&parsed.farm)),
        (AttributeField::OriginCountry, country.map(AttributeValue::Text)),
    ] {
        if let Some(value) = value {
            put(field, value);
        }
    }
    if !parsed.colors.is_empty() {
        put(AttributeField::Colors, AttributeValue::List(parsed.colors.clone()));
    }
    if parsed.is_bundle_list {
        put(AttributeField::IsBundleList, AttributeValue::Flag(true));
        put(
            AttributeField::BundleVarieties,
            AttributeValue::List(parsed.bundle_varieties.clone()),
        );
    }
    attrs
}

// ==========================================
// PriceListImporter
// ==========================================
pub struct PriceListImporter {
    import_repo: Arc<dyn ImportRepository>,
    config: Arc<NormalizationConfig>,
    gateway: Option<Arc<AiGateway>>,
    file_parser: UniversalFileParser,
}

impl PriceListImporter {
    pub fn new(
        import_repo: Arc<dyn ImportRepository>,
        config: Arc<NormalizationConfig>,
        gateway: Option<Arc<AiGateway>>,
    ) -> Self {
        Self {
            import_repo,
            config,
            gateway,
            file_parser: UniversalFileParser,
        }
    }

    /// 导入一份价目表文件
    ///
    /// 批次级失败时批次已置 failed，错误同时返回给调用方。
    #[instrument(skip(self, bytes), fields(batch_id, size = bytes.len()))]
    pub async fn import_file(
        &self,
        supplier_id: &str,
        source_type: SourceType,
        file_name: Option<&str>,
        bytes: &[u8],
    ) -> ImportResult<ImportReport> {
        let supplier = self
            .import_repo
            .find_supplier(supplier_id)?
            .filter(|s| s.is_active)
            .ok_or_else(|| ImportError::SupplierNotFound(supplier_id.to_string()))?;

        let now = Utc::now();
        let batch = ImportBatch {
            batch_id: Uuid::new_v4().to_string(),
            supplier_id: supplier.supplier_id.clone(),
            source_type,
            file_name: file_name.map(|f| f.to_string()),
            status: BatchStatus::Received,
            meta: json!({}),
            created_at: now,
            updated_at: now,
        };
        self.import_repo.create_batch(&batch)?;
        tracing::Span::current().record("batch_id", batch.batch_id.as_str());

        let run = ParseRun {
            run_id: Uuid::new_v4().to_string(),
            batch_id: batch.batch_id.clone(),
            parser_version: self.config.parser_version.clone(),
            started_at: now,
            finished_at: None,
        };
        self.import_repo.create_parse_run(&run)?;
        info!(supplier_id, source_type = source_type.to_db_str(), "开始导入价目表");

        match self.run_pipeline(&batch, &run, bytes).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "批次导入失败");
                self.fail_batch(&batch, &run, &e);
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, batch: &ImportBatch, run: &ParseRun, bytes: &[u8]) -> ImportResult<ImportReport> {
        let prepared = self.prepare_rows(batch, bytes).await?;

        let raw_rows: Vec<RawRow> = prepared
            .rows
            .iter()
            .map(|row| RawRow {
                raw_row_id: Uuid::new_v4().to_string(),
                batch_id: batch.batch_id.clone(),
                ordinal: row.row_number,
                cells: row.cells.clone(),
                raw_text: row.raw_text(),
            })
            .collect();
        self.import_repo.insert_raw_rows(&raw_rows)?;

        let ctx = RowContext {
            supplier_id: &batch.supplier_id,
            batch_id: &batch.batch_id,
            mapping: &prepared.mapping,
            sanitizer: NameSanitizer::new(&self.config),
            parser: NameParser::new(&self.config),
        };

        let mut report = ImportReport {
            batch_id: batch.batch_id.clone(),
            total_rows: prepared.rows.len(),
            events: prepared.events,
            ..Default::default()
        };

        for row in &prepared.rows {
            match self.process_row(&ctx, row)? {
                Ok(summary) => {
                    match summary.validation {
                        ValidationStatus::Warn => report.warn_rows += 1,
                        _ => report.ok_rows += 1,
                    }
                    if summary.item_created {
                        report.items_created += 1;
                    } else {
                        report.items_updated += 1;
                    }
                    report.candidates_created += 1;
                    report.events.extend(summary.events);
                }
                Err(row_error) => {
                    debug!(row = row.row_number, error = %row_error, "行解析失败");
                    report.error_rows += 1;
                    report.events.push(ParseEvent::row(
                        row.row_number,
                        Severity::Error,
                        row_error.code(),
                        row_error.to_string(),
                    ));
                }
            }
        }

        self.import_repo.append_parse_events(&run.run_id, &report.events)?;
        self.import_repo.finish_parse_run(&run.run_id, Utc::now())?;

        let meta = json!({
            "parser_version": self.config.parser_version,
            "total_rows": report.total_rows,
            "ok_rows": report.ok_rows,
            "warn_rows": report.warn_rows,
            "error_rows": report.error_rows,
        });
        self.import_repo
            .update_batch_status(&batch.batch_id, BatchStatus::Parsed, &meta)?;

        info!(
            total = report.total_rows,
            ok = report.ok_rows,
            warn = report.warn_rows,
            errors = report.error_rows,
            items_created = report.items_created,
            items_updated = report.items_updated,
            "价目表导入完成"
        );
        Ok(report)
    }

    /// 文件 → 数据行 + 列映射（含 AI 兜底）
    async fn prepare_rows(&self, batch: &ImportBatch, bytes: &[u8]) -> ImportResult<PreparedRows> {
        let options = ParseOptions::from_config(&self.config);
        let mut events = Vec::new();

        match self.file_parser.parse(batch.source_type, bytes, &options)? {
            Extraction::Rows(rows) => {
                let headers = rows
                    .first()
                    .map(|r| r.headers.clone())
                    .ok_or_else(|| ImportError::NoTableData("表头之后没有数据行".to_string()))?;
                let mut mapping = ColumnMapper::new(&self.config.columns).map_headers(&headers);

                if !mapping.is_complete() {
                    self.fill_mapping_with_ai(batch, &headers, &rows, &mut mapping, &mut events)
                        .await;
                }
                for field in mapping.missing_mandatory() {
                    warn!(field = field.as_str(), "必填列未解析，所有行将记为错误");
                    events.push(ParseEvent::batch(
                        Severity::Warn,
                        "unmapped_column",
                        format!("column '{}' not found in headers", field.as_str()),
                    ));
                }
                Ok(PreparedRows { rows, mapping, events })
            }
            Extraction::PageText(pages) => {
                let Some(gateway) = self.gateway.as_ref() else {
                    return Err(ImportError::NoTableData(
                        "PDF 未识别到表格，且未配置 AI 文本提取".to_string(),
                    ));
                };
                let rows = extract_rows_from_text(gateway, &batch.supplier_id, &pages)
                    .await
                    .map_err(|e| ImportError::NoTableData(format!("AI 文本提取失败: {e}")))?;
                if rows.is_empty() {
                    return Err(ImportError::NoTableData("AI 文本提取未返回任何行".to_string()));
                }
                events.push(ParseEvent::batch(
                    Severity::Info,
                    "ai_text_extraction",
                    format!("{} rows extracted from {} pages", rows.len(), pages.len()),
                ));
                let mapping = ColumnMapping {
                    name: Some(0),
                    price: Some(1),
                    pack_qty: Some(2),
                    length: Some(3),
                    country: Some(4),
                    ..Default::default()
                };
                Ok(PreparedRows { rows, mapping, events })
            }
        }
    }

    async fn fill_mapping_with_ai(
        &self,
        batch: &ImportBatch,
        headers: &[String],
        rows: &[TabularRow],
        mapping: &mut ColumnMapping,
        events: &mut Vec<ParseEvent>,
    ) {
        let Some(gateway) = self.gateway.as_ref() else {
            return;
        };
        match suggest_columns(gateway, &batch.supplier_id, headers, rows).await {
            Ok(suggestions) => {
                let min = Confidence::from_points(i32::from(self.config.ai.column_mapping_min_points));
                let accepted = mapping.apply_suggestions(&suggestions, headers.len(), min);
                info!(suggested = suggestions.len(), accepted, "AI 列映射兜底");
                events.push(ParseEvent::batch(
                    Severity::Info,
                    "ai_column_mapping",
                    format!("{accepted} of {} suggestions accepted", suggestions.len()),
                ));
            }
            Err(e) => {
                warn!(error = %e, "AI 列映射兜底失败");
                events.push(ParseEvent::batch(Severity::Warn, "ai_column_mapping_failed", e.to_string()));
            }
        }
    }

    /// 外层 Result: 仓储失败（终止批次）；内层 Result: 行级错误
    fn process_row(&self, ctx: &RowContext<'_>, row: &TabularRow) -> ImportResult<Result<RowSummary, RowError>> {
        let limits = &self.config.limits;
        let mapped = ctx.mapping.extract(row);

        let Some(name) = mapped.name else {
            return Ok(Err(RowError::MissingName));
        };
        let Some(price_raw) = mapped.price else {
            return Ok(Err(RowError::MissingPrice));
        };
        let price = parse_price(&price_raw);
        if let Some(err) = price.error.clone() {
            return Ok(Err(RowError::InvalidPrice(err)));
        }
        let clean = ctx.sanitizer.sanitize(&name);
        if clean.is_empty() {
            return Ok(Err(RowError::EmptyAfterSanitize(name)));
        }

        let mut parsed = ctx.parser.parse(&clean);
        if parsed.colors.is_empty() {
            if let Some(color) = mapped.color.as_deref() {
                parsed.colors.push(color.to_lowercase());
            }
        }
        let length_cm = mapped
            .length
            .as_deref()
            .and_then(|v| parse_length_cell(v, limits))
            .or_else(|| extract_length_cm(&name, limits));
        let pack_qty = mapped
            .pack_qty
            .as_deref()
            .and_then(|v| parse_pack_cell(v, limits))
            .or_else(|| extract_pack_qty(&name, limits));
        let country = mapped
            .country
            .as_deref()
            .map(|cell| {
                extract_origin_country(cell, &self.config.countries, &self.config.country_codes)
                    .unwrap_or_else(|| cell.to_string())
            })
            .or_else(|| extract_origin_country(&name, &self.config.countries, &self.config.country_codes));

        let now = Utc::now();
        let incoming = parsed_attributes(&parsed, country);
        let key = stable_key(ctx.supplier_id, mapped.group.as_deref(), &name);

        let (item_id, item_created) = match self.import_repo.find_item_by_key(ctx.supplier_id, &key)? {
            Some(mut existing) => {
                existing.attributes.merge_from(&incoming);
                existing.raw_name = name.clone();
                existing.raw_group = mapped.group.clone();
                existing.status = ItemStatus::Active;
                existing.last_batch_id = Some(ctx.batch_id.to_string());
                existing.updated_at = now;
                self.import_repo.update_item(&existing)?;
                (existing.item_id, false)
            }
            None => {
                let item = SupplierItem {
                    item_id: Uuid::new_v4().to_string(),
                    supplier_id: ctx.supplier_id.to_string(),
                    stable_key: key,
                    raw_name: name.clone(),
                    raw_group: mapped.group.clone(),
                    attributes: incoming,
                    status: ItemStatus::Active,
                    last_batch_id: Some(ctx.batch_id.to_string()),
                    created_at: now,
                    updated_at: now,
                };
                self.import_repo.insert_item(&item)?;
                (item.item_id, true)
            }
        };

        // 软校验
        let mut events = Vec::new();
        let mut notes = Vec::new();
        if length_cm.is_none() {
            notes.push("missing_length".to_string());
            events.push(ParseEvent::row(row.row_number, Severity::Info, "missing_length", "length not found"));
        }
        if pack_qty.is_none() {
            notes.push("missing_pack_qty".to_string());
            events.push(ParseEvent::row(row.row_number, Severity::Info, "missing_pack_qty", "pack quantity not found"));
        }
        if parsed.is_bundle_list {
            notes.push("bundle_list".to_string());
            events.push(ParseEvent::row(
                row.row_number,
                Severity::Warn,
                "bundle_list",
                format!("row lists {} varieties", parsed.bundle_varieties.len()),
            ));
        }
        let validation = if notes.is_empty() {
            ValidationStatus::Ok
        } else {
            ValidationStatus::Warn
        };

        self.import_repo.insert_candidate(&OfferCandidate {
            candidate_id: Uuid::new_v4().to_string(),
            batch_id: ctx.batch_id.to_string(),
            item_id,
            row_number: row.row_number,
            length_cm,
            pack_qty,
            price_type: price.price_type,
            price_min: price.price_min,
            price_max: price.price_max,
            validation,
            validation_notes: notes,
            created_at: now,
        })?;

        Ok(Ok(RowSummary {
            validation,
            item_created,
            events,
        }))
    }

    /// 批次置 failed；此处的仓储错误只记日志，不覆盖原始错误
    fn fail_batch(&self, batch: &ImportBatch, run: &ParseRun, cause: &ImportError) {
        let message = cause.to_string();
        let meta = json!({ "error": message });
        let event = ParseEvent::batch(Severity::Error, "batch_failed", message);

        if let Err(e) = self.import_repo.append_parse_events(&run.run_id, &[event]) {
            warn!(error = %e, "写入批次失败事件出错");
        }
        if let Err(e) = self.import_repo.finish_parse_run(&run.run_id, Utc::now()) {
            warn!(error = %e, "结束解析运行出错");
        }
        if let Err(e) = self
            .import_repo
            .update_batch_status(&batch.batch_id, BatchStatus::Failed, &meta)
        {
            warn!(error = %e, "批次状态置 failed 出错");
        }
    }
}
