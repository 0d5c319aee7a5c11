// ==========================================
// 价目表归一化管道 - 匹配引擎
// ==========================================
// 输入: 供应商全部 active SupplierItem
// 输出: proposed SkuMapping + NormalizationTask
// 候选优先级: (a) 花型+品种精确 → (b) 未识别品种时的通用 SKU → (c) 同花型前 N 个（通用 SKU 置前）
// 任务策略: 无候选 / 最高分 < 阈值 / 前两名差值 < 阈值 / 拼单行；每条目至多一个 open 任务
// 红线: 单条目失败只记日志并跳过；重复运行不产生新映射或新任务
// ==========================================

use crate::config::NormalizationConfig;
use crate::domain::catalog::{NormalizationTask, NormalizedSku, SkuMapping};
use crate::domain::confidence::Confidence;
use crate::domain::item::{AttributeField, AttributeValue, SupplierItem};
use crate::domain::types::{AttributeSource, MappingMethod, MappingStatus, SupplierTier, TaskStatus};
use crate::engine::scoring::{calculate_confidence, variety_similarity, ScoreInputs, VarietyMatch};
use crate::engine::text_signals::{detect_product_types, has_mix_keyword, normalize_text, SubtypeRules};
use crate::importer::name_parser::NameParser;
use crate::importer::name_sanitizer::NameSanitizer;
use crate::repository::{CatalogRepository, ImportRepository, RepositoryError, RepositoryResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub const REASON_NO_CANDIDATES: &str = "no_candidates";
pub const REASON_LOW_CONFIDENCE: &str = "low_confidence";
pub const REASON_AMBIGUOUS: &str = "ambiguous";
pub const REASON_BUNDLE_LIST: &str = "bundle_list";

/// 单条目匹配失败（记入 ProposeReport.items_failed，不中断整体）
#[derive(Error, Debug)]
#[error("条目 {item_id} 匹配失败: {source}")]
pub struct MatchingItemError {
    pub item_id: String,
    #[source]
    pub source: RepositoryError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProposeReport {
    pub items_processed: usize,
    pub items_skipped_confirmed: usize,
    pub mappings_proposed: usize,
    pub mappings_created: usize,
    pub tasks_created: usize,
    pub items_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmReport {
    pub mapping_id: String,
    pub item_id: String,
    pub sku_id: String,
    pub tasks_closed: usize,
}

/// 已打分的候选
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub sku: NormalizedSku,
    pub confidence: Confidence,
}

/// 条目匹配信号
#[derive(Debug, Clone, Default)]
struct ItemSignals {
    product_type: Option<String>,
    variety: Option<String>,
    subtype: Option<String>,
    country: Option<String>,
    has_mix: bool,
    few_tokens: bool,
    conflicting_type: bool,
    is_bundle_list: bool,
}

#[derive(Debug, Default)]
struct ItemOutcome {
    proposed: usize,
    created: usize,
    task_created: bool,
}

pub struct MatchingEngine {
    import_repo: Arc<dyn ImportRepository>,
    catalog_repo: Arc<dyn CatalogRepository>,
    config: Arc<NormalizationConfig>,
}

impl MatchingEngine {
    pub fn new(
        import_repo: Arc<dyn ImportRepository>,
        catalog_repo: Arc<dyn CatalogRepository>,
        config: Arc<NormalizationConfig>,
    ) -> Self {
        Self {
            import_repo,
            catalog_repo,
            config,
        }
    }

    // ==========================================
    // 提议映射
    // ==========================================

    #[instrument(skip(self))]
    pub fn propose_mappings(&self, supplier_id: &str) -> RepositoryResult<ProposeReport> {
        let supplier = self
            .import_repo
            .find_supplier(supplier_id)?
            .ok_or_else(|| RepositoryError::not_found("Supplier", supplier_id))?;
        let items = self.import_repo.list_active_items(supplier_id)?;
        info!(items = items.len(), "开始匹配");

        let subtypes = SubtypeRules::new(&self.config);
        let sanitizer = NameSanitizer::new(&self.config);
        let parser = NameParser::new(&self.config);
        let mut report = ProposeReport::default();

        for item in &items {
            report.items_processed += 1;
            match self.process_item(item, supplier.tier, &subtypes, &sanitizer, &parser) {
                Ok(Some(outcome)) => {
                    report.mappings_proposed += outcome.proposed;
                    report.mappings_created += outcome.created;
                    if outcome.task_created {
                        report.tasks_created += 1;
                    }
                }
                Ok(None) => report.items_skipped_confirmed += 1,
                Err(e) => {
                    error!(item_id = %e.item_id, error = %e.source, "条目匹配失败，已跳过");
                    report.items_failed += 1;
                }
            }
        }

        info!(
            processed = report.items_processed,
            created = report.mappings_created,
            tasks = report.tasks_created,
            failed = report.items_failed,
            "匹配完成"
        );
        Ok(report)
    }

    /// Ok(None): 条目已有 confirmed 映射，跳过
    fn process_item(
        &self,
        item: &SupplierItem,
        tier: SupplierTier,
        subtypes: &SubtypeRules,
        sanitizer: &NameSanitizer<'_>,
        parser: &NameParser<'_>,
    ) -> Result<Option<ItemOutcome>, MatchingItemError> {
        let wrap = |source: RepositoryError| MatchingItemError {
            item_id: item.item_id.clone(),
            source,
        };

        if self.catalog_repo.confirmed_mapping(&item.item_id).map_err(wrap)?.is_some() {
            return Ok(None);
        }

        let signals = self.item_signals(item, subtypes, sanitizer, parser);
        let candidates = self.score_candidates(&signals).map_err(wrap)?;
        let now = Utc::now();
        let mut outcome = ItemOutcome::default();

        let min = Confidence::from_points(i32::from(self.config.thresholds.proposal_min_points));
        for candidate in candidates
            .iter()
            .filter(|c| c.confidence > min)
            .take(self.config.thresholds.max_proposals)
        {
            outcome.proposed += 1;
            let created = self
                .catalog_repo
                .insert_proposed_mapping(&SkuMapping {
                    mapping_id: Uuid::new_v4().to_string(),
                    item_id: item.item_id.clone(),
                    sku_id: candidate.sku.sku_id.clone(),
                    confidence: candidate.confidence,
                    method: MappingMethod::Rule,
                    status: MappingStatus::Proposed,
                    created_at: now,
                    decided_at: None,
                })
                .map_err(wrap)?;
            if created {
                outcome.created += 1;
            }
        }

        if let Some(reason) = self.task_reason(&signals, &candidates) {
            let candidate_count = self
                .import_repo
                .count_candidates_for_item(&item.item_id)
                .map_err(wrap)?;
            let priority = self.task_priority(candidate_count, tier);
            outcome.task_created = self
                .catalog_repo
                .create_task_if_absent(&NormalizationTask {
                    task_id: Uuid::new_v4().to_string(),
                    item_id: item.item_id.clone(),
                    reason: reason.to_string(),
                    priority,
                    status: TaskStatus::Open,
                    created_at: now,
                    updated_at: now,
                })
                .map_err(wrap)?;
            debug!(item_id = %item.item_id, reason, priority, created = outcome.task_created, "复核任务");
        }

        Ok(Some(outcome))
    }

    fn item_signals(
        &self,
        item: &SupplierItem,
        subtypes: &SubtypeRules,
        sanitizer: &NameSanitizer<'_>,
        parser: &NameParser<'_>,
    ) -> ItemSignals {
        let attrs = &item.attributes;
        let text = normalize_text(&item.raw_name, item.raw_group.as_deref(), &self.config.stopwords);
        let detected = detect_product_types(&text, &self.config);

        let product_type = attrs
            .text(AttributeField::FlowerType)
            .map(|s| s.to_string())
            .or_else(|| detected.first().cloned());
        let conflicting_type = detected.len() > 1
            || product_type
                .as_ref()
                .is_some_and(|t| !detected.is_empty() && !detected.iter().any(|d| d == t));

        let is_bundle_list = attrs.flag(AttributeField::IsBundleList);
        let variety = if is_bundle_list {
            None
        } else {
            attrs
                .text(AttributeField::Variety)
                .map(|v| self.config.canonical_variety(v))
                .or_else(|| parser.parse(&sanitizer.sanitize(&item.raw_name)).variety)
        };

        ItemSignals {
            product_type,
            variety,
            subtype: attrs
                .text(AttributeField::Subtype)
                .map(|s| s.to_string())
                .or_else(|| subtypes.detect(&item.raw_name)),
            country: attrs.text(AttributeField::OriginCountry).map(|s| s.to_string()),
            has_mix: has_mix_keyword(&text, &self.config),
            few_tokens: text.tokens.len() < self.config.thresholds.min_tokens,
            conflicting_type,
            is_bundle_list,
        }
    }

    /// 候选检索 + 打分，按置信度降序
    fn score_candidates(&self, signals: &ItemSignals) -> RepositoryResult<Vec<ScoredCandidate>> {
        let Some(product_type) = signals.product_type.as_deref() else {
            return Ok(Vec::new());
        };
        let same_type = self.catalog_repo.list_skus_by_type(product_type)?;
        let (generic, specific): (Vec<NormalizedSku>, Vec<NormalizedSku>) =
            same_type.into_iter().partition(|s| s.variety.is_none());

        let pool: Vec<NormalizedSku> = match signals.variety.as_deref() {
            Some(variety) => {
                let exact: Vec<NormalizedSku> = specific
                    .iter()
                    .filter(|s| {
                        s.variety
                            .as_deref()
                            .is_some_and(|v| v.to_lowercase() == variety.to_lowercase())
                    })
                    .cloned()
                    .collect();
                if exact.is_empty() {
                    self.type_candidates(generic, specific)
                } else {
                    exact
                }
            }
            None if !generic.is_empty() => generic,
            None => self.type_candidates(generic, specific),
        };

        let thresholds = &self.config.thresholds;
        let mut scored: Vec<ScoredCandidate> = pool
            .into_iter()
            .map(|sku| {
                let variety_match = match (signals.variety.as_deref(), sku.variety.as_deref()) {
                    (Some(a), Some(b)) => {
                        variety_similarity(a, b, thresholds.high_similarity, thresholds.low_similarity)
                    }
                    _ => VarietyMatch::None,
                };
                let inputs = ScoreInputs {
                    product_type_match: sku.product_type.to_lowercase() == product_type.to_lowercase(),
                    variety_match,
                    subtype_match: matches!(
                        (signals.subtype.as_deref(), sku.subtype.as_deref()),
                        (Some(a), Some(b)) if a.to_lowercase() == b.to_lowercase()
                    ),
                    country_match: matches!(
                        (signals.country.as_deref(), sku.meta.get("origin_country").and_then(|v| v.as_str())),
                        (Some(a), Some(b)) if a.to_lowercase() == b.to_lowercase()
                    ),
                    has_mix_keyword: signals.has_mix,
                    few_tokens: signals.few_tokens,
                    conflicting_type: signals.conflicting_type,
                };
                ScoredCandidate {
                    confidence: calculate_confidence(&inputs, &self.config.weights),
                    sku,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        Ok(scored)
    }

    /// 同花型候选，通用 SKU 置前，总数不超过上限
    fn type_candidates(&self, generic: Vec<NormalizedSku>, specific: Vec<NormalizedSku>) -> Vec<NormalizedSku> {
        generic
            .into_iter()
            .take(1)
            .chain(specific)
            .take(self.config.thresholds.max_type_candidates)
            .collect()
    }

    fn task_reason(&self, signals: &ItemSignals, candidates: &[ScoredCandidate]) -> Option<&'static str> {
        let thresholds = &self.config.thresholds;
        if signals.is_bundle_list {
            return Some(REASON_BUNDLE_LIST);
        }
        let Some(top) = candidates.first() else {
            return Some(REASON_NO_CANDIDATES);
        };
        if top.confidence.points() < thresholds.task_below_points {
            return Some(REASON_LOW_CONFIDENCE);
        }
        if let Some(second) = candidates.get(1) {
            if top.confidence.points() - second.confidence.points() < thresholds.ambiguity_gap_points {
                return Some(REASON_AMBIGUOUS);
            }
        }
        None
    }

    /// 100 + 2×候选报价数 + 50（重点供应商）
    pub fn task_priority(&self, candidate_count: usize, tier: SupplierTier) -> i32 {
        let t = &self.config.thresholds;
        let count = i32::try_from(candidate_count).unwrap_or(i32::MAX / 4);
        let mut priority = t.task_priority_base + t.task_priority_per_candidate * count;
        if tier == SupplierTier::Key {
            priority += t.task_priority_key_supplier;
        }
        priority
    }

    // ==========================================
    // 人工决策
    // ==========================================

    /// 确认映射：单事务内保证每条目唯一 confirmed，并关闭其任务；
    /// 再把 SKU 的花型 / 品种以 manual 来源写回条目属性
    #[instrument(skip(self))]
    pub fn confirm_mapping(&self, mapping_id: &str) -> RepositoryResult<ConfirmReport> {
        let mapping = self
            .catalog_repo
            .find_mapping(mapping_id)?
            .ok_or_else(|| RepositoryError::not_found("SkuMapping", mapping_id))?;
        let tasks_closed = self.catalog_repo.confirm_mapping(mapping_id, Utc::now())?;

        let sku = self
            .catalog_repo
            .find_sku(&mapping.sku_id)?
            .ok_or_else(|| RepositoryError::not_found("NormalizedSku", &mapping.sku_id))?;
        let mut item = self
            .import_repo
            .find_item(&mapping.item_id)?
            .ok_or_else(|| RepositoryError::not_found("SupplierItem", &mapping.item_id))?;

        item.attributes.apply(
            AttributeField::FlowerType,
            AttributeValue::Text(sku.product_type.clone()),
            AttributeSource::Manual,
            None,
        );
        if let Some(variety) = sku.variety.clone() {
            item.attributes.apply(
                AttributeField::Variety,
                AttributeValue::Text(variety),
                AttributeSource::Manual,
                None,
            );
        }
        item.updated_at = Utc::now();
        self.import_repo.update_item(&item)?;

        info!(item_id = %item.item_id, sku_id = %sku.sku_id, tasks_closed, "映射已确认");
        Ok(ConfirmReport {
            mapping_id: mapping.mapping_id,
            item_id: mapping.item_id,
            sku_id: mapping.sku_id,
            tasks_closed,
        })
    }

    #[instrument(skip(self))]
    pub fn reject_mapping(&self, mapping_id: &str) -> RepositoryResult<()> {
        self.catalog_repo.reject_mapping(mapping_id, Utc::now())?;
        info!("映射已拒绝");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::batch::Supplier;
    use crate::domain::item::ItemAttributes;
    use crate::domain::types::ItemStatus;
    use crate::importer::stable_key::stable_key;
    use crate::repository::{SqliteCatalogRepository, SqliteImportRepository};
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::Mutex;

    struct Fixture {
        import_repo: Arc<SqliteImportRepository>,
        catalog_repo: Arc<SqliteCatalogRepository>,
        engine: MatchingEngine,
    }

    fn fixture(tier: SupplierTier) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let import_repo = Arc::new(SqliteImportRepository::from_connection(conn.clone()));
        let catalog_repo = Arc::new(SqliteCatalogRepository::from_connection(conn));
        import_repo
            .upsert_supplier(&Supplier {
                supplier_id: "s1".to_string(),
                name: "Флора Опт".to_string(),
                tier,
                is_active: true,
                created_at: Utc::now(),
            })
            .unwrap();
        let engine = MatchingEngine::new(
            import_repo.clone(),
            catalog_repo.clone(),
            Arc::new(NormalizationConfig::default()),
        );
        Fixture {
            import_repo,
            catalog_repo,
            engine,
        }
    }

    fn sku(id: &str, product_type: &str, variety: Option<&str>) -> NormalizedSku {
        NormalizedSku {
            sku_id: id.to_string(),
            product_type: product_type.to_string(),
            variety: variety.map(|v| v.to_string()),
            subtype: None,
            color: None,
            title: format!("{product_type} {}", variety.unwrap_or("")).trim().to_string(),
            meta: json!({}),
        }
    }

    fn item(f: &Fixture, raw_name: &str, variety: Option<&str>) -> SupplierItem {
        let mut attributes = ItemAttributes::default();
        attributes.apply(
            AttributeField::FlowerType,
            AttributeValue::Text("Роза".to_string()),
            AttributeSource::Parser,
            None,
        );
        if let Some(v) = variety {
            attributes.apply(AttributeField::Variety, AttributeValue::Text(v.to_string()), AttributeSource::Parser, None);
        }
        let now = Utc::now();
        let item = SupplierItem {
            item_id: Uuid::new_v4().to_string(),
            supplier_id: "s1".to_string(),
            stable_key: stable_key("s1", None, raw_name),
            raw_name: raw_name.to_string(),
            raw_group: None,
            attributes,
            status: ItemStatus::Active,
            last_batch_id: None,
            created_at: now,
            updated_at: now,
        };
        f.import_repo.insert_item(&item).unwrap();
        item
    }

    #[test]
    fn test_exact_match_no_task_and_idempotent() {
        let f = fixture(SupplierTier::Regular);
        f.catalog_repo.insert_sku(&sku("sku-explorer", "Роза", Some("Explorer"))).unwrap();
        f.catalog_repo.insert_sku(&sku("sku-freedom", "Роза", Some("Freedom"))).unwrap();
        let it = item(&f, "Роза Explorer 60см Эквадор", Some("Explorer"));

        let first = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(first.mappings_created, 1);
        assert_eq!(first.tasks_created, 0);

        let mappings = f.catalog_repo.list_mappings_for_item(&it.item_id).unwrap();
        assert_eq!(mappings[0].sku_id, "sku-explorer");
        assert_eq!(mappings[0].confidence.points(), 850);

        let second = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(second.mappings_proposed, first.mappings_proposed);
        assert_eq!(second.mappings_created, 0);
        assert_eq!(second.tasks_created, 0);
    }

    #[test]
    fn test_close_scores_open_ambiguous_task() {
        let f = fixture(SupplierTier::Regular);
        f.catalog_repo.insert_sku(&sku("sku-naomi", "Роза", Some("Naomi"))).unwrap();
        f.catalog_repo.insert_sku(&sku("sku-naomi-premium", "Роза", Some("Red Naomi Premium"))).unwrap();
        let it = item(&f, "Роза Red Naomi 60см", Some("Red Naomi"));

        let report = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(report.mappings_created, 2);
        assert_eq!(report.tasks_created, 1);

        let mappings = f.catalog_repo.list_mappings_for_item(&it.item_id).unwrap();
        assert!(mappings.iter().all(|m| m.confidence.points() == 700));
        let task = f.catalog_repo.find_open_task(&it.item_id).unwrap().unwrap();
        assert_eq!(task.reason, REASON_AMBIGUOUS);
        assert_eq!(task.priority, 100);
    }

    #[test]
    fn test_subtype_word_does_not_flag_type_conflict() {
        let f = fixture(SupplierTier::Regular);
        let mut juliet = sku("sku-juliet", "Роза", Some("Juliet"));
        juliet.subtype = Some("Пионовидная".to_string());
        f.catalog_repo.insert_sku(&juliet).unwrap();
        let it = item(&f, "Роза пионовидная Juliet 50см", Some("Juliet"));

        let report = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(report.tasks_created, 0);
        let mappings = f.catalog_repo.list_mappings_for_item(&it.item_id).unwrap();
        assert_eq!(mappings[0].confidence.points(), 900);
    }

    #[test]
    fn test_no_candidates_opens_single_task_with_priority() {
        let f = fixture(SupplierTier::Key);
        let it = item(&f, "Роза Vendela 50см", Some("Vendela"));

        let report = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(report.tasks_created, 1);
        let task = f.catalog_repo.find_open_task(&it.item_id).unwrap().unwrap();
        assert_eq!(task.reason, REASON_NO_CANDIDATES);
        assert_eq!(task.priority, 150);

        let again = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(again.tasks_created, 0);
        assert_eq!(f.catalog_repo.list_open_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_low_confidence_type_candidates_open_task() {
        let f = fixture(SupplierTier::Regular);
        f.catalog_repo.insert_sku(&sku("sku-generic", "Роза", None)).unwrap();
        f.catalog_repo.insert_sku(&sku("sku-freedom", "Роза", Some("Freedom"))).unwrap();
        let it = item(&f, "Роза Vendela 50см Эквадор", Some("Vendela"));

        let report = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(report.mappings_created, 2);
        let task = f.catalog_repo.find_open_task(&it.item_id).unwrap().unwrap();
        assert_eq!(task.reason, REASON_LOW_CONFIDENCE);
    }

    #[test]
    fn test_confirm_closes_task_and_writes_manual_attributes() {
        let f = fixture(SupplierTier::Regular);
        f.catalog_repo.insert_sku(&sku("sku-generic", "Роза", None)).unwrap();
        f.catalog_repo.insert_sku(&sku("sku-mondial", "Роза", Some("Mondial"))).unwrap();
        let it = item(&f, "Роза Мондиаль белая 60см", None);

        f.engine.propose_mappings("s1").unwrap();
        let mapping = f
            .catalog_repo
            .list_mappings_for_item(&it.item_id)
            .unwrap()
            .into_iter()
            .find(|m| m.sku_id == "sku-mondial")
            .unwrap();

        let confirmed = f.engine.confirm_mapping(&mapping.mapping_id).unwrap();
        assert_eq!(confirmed.item_id, it.item_id);
        assert!(f.catalog_repo.find_open_task(&it.item_id).unwrap().is_none());

        let updated = f.import_repo.find_item(&it.item_id).unwrap().unwrap();
        assert_eq!(updated.attributes.text(AttributeField::Variety), Some("Mondial"));
        assert_eq!(updated.attributes.source(AttributeField::Variety), Some(AttributeSource::Manual));

        let report = f.engine.propose_mappings("s1").unwrap();
        assert_eq!(report.items_skipped_confirmed, 1);
    }

    #[test]
    fn test_task_priority_formula() {
        let f = fixture(SupplierTier::Regular);
        assert_eq!(f.engine.task_priority(3, SupplierTier::Regular), 106);
        assert_eq!(f.engine.task_priority(3, SupplierTier::Key), 156);
    }
}
