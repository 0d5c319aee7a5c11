// ==========================================
// 价目表归一化管道 - AI 属性补全
// ==========================================
// 触发: 缺 clean_name 或 {flower_type, origin_country, variety} 任一
// 上限: 待补全条目超过 batch_max_rows 时整批跳过，不建运行
// 缓存: 同 input_hash 的最近 succeeded 运行 → 按 raw_name 回放建议
// 分级: ≥900 直接写入；700..900 写入并标记 ai_marked；<700 不写，标记 needs_review
// 红线: locked / manual 字段从不被覆盖；供应方失败只体现在结果中，不向上抛
// ==========================================

use crate::ai::gateway::{input_hash, AiCallError, AiGateway, RateLimitScope};
use crate::domain::ai::AiSuggestion;
use crate::domain::confidence::Confidence;
use crate::domain::item::{AttributeField, AttributeValue, ItemAttributes, SupplierItem};
use crate::domain::types::{AiRunKind, AttributeSource};
use crate::repository::{ImportRepository, RepositoryResult};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const REQUIRED_FIELDS: [AttributeField; 4] = [
    AttributeField::CleanName,
    AttributeField::FlowerType,
    AttributeField::OriginCountry,
    AttributeField::Variety,
];

const ENRICHMENT_SYSTEM: &str = "You normalize wholesale flower product names. \
For every input line return attribute suggestions as a JSON object \
{\"suggestions\":[{\"raw_name\":\"\",\"field\":\"\",\"value\":\"\",\"confidence\":0.0}]}. \
Allowed fields: clean_name, flower_type, subtype, variety, farm, origin_country, colors. \
raw_name must repeat the input line exactly. confidence is between 0 and 1.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub items_considered: usize,
    pub items_updated: usize,
    pub fields_applied: usize,
    pub fields_marked: usize,
    pub fields_needs_review: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    /// 未配置 AI 供应方
    NoProvider,
    NothingToEnrich,
    /// 待补全条目超出单批上限，整批跳过
    BatchTooLarge { items: usize, cap: usize },
    RateLimited { scope: RateLimitScope },
    Cached { run_id: String, stats: EnrichmentStats },
    Completed { run_id: String, stats: EnrichmentStats },
    Failed { run_id: Option<String>, error: String },
}

/// 拼单行的 variety 恒为空，不算缺失，也不接受 AI 写入
fn skips_field(attributes: &ItemAttributes, field: AttributeField) -> bool {
    field == AttributeField::Variety && attributes.flag(AttributeField::IsBundleList)
}

fn needs_enrichment(item: &SupplierItem) -> bool {
    REQUIRED_FIELDS
        .iter()
        .any(|f| !skips_field(&item.attributes, *f) && item.attributes.get(*f).is_none())
}

fn to_attribute_value(field: AttributeField, raw: &str) -> Option<AttributeValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match field {
        AttributeField::LengthCm | AttributeField::PackQty => {
            let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok().map(AttributeValue::Number)
        }
        AttributeField::Colors | AttributeField::BundleVarieties => Some(AttributeValue::List(
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )),
        AttributeField::IsBundleList => raw.parse().ok().map(AttributeValue::Flag),
        _ => Some(AttributeValue::Text(raw.to_string())),
    }
}

fn suggestion_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

/// 解析供应方 JSON；只保留输入中出现过的 raw_name 与已知字段
fn parse_suggestions(run_id: &str, json: &Value, raw_names: &HashSet<&str>) -> Vec<AiSuggestion> {
    json.get("suggestions")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    let raw_name = e.get("raw_name")?.as_str()?;
                    if !raw_names.contains(raw_name) {
                        return None;
                    }
                    Some(AiSuggestion {
                        run_id: run_id.to_string(),
                        raw_name: raw_name.to_string(),
                        field: AttributeField::parse(e.get("field")?.as_str()?)?,
                        value: suggestion_value(e.get("value")?)?,
                        confidence: Confidence::from_f64(e.get("confidence")?.as_f64()?),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// 按置信度分级写入单个条目；返回是否有改动
pub fn apply_suggestion(
    attributes: &mut ItemAttributes,
    suggestion: &AiSuggestion,
    auto_apply: Confidence,
    apply_mark: Confidence,
    stats: &mut EnrichmentStats,
) -> bool {
    let field = suggestion.field;
    if skips_field(attributes, field) || !attributes.is_writable_by(field, AttributeSource::Ai) {
        return false;
    }
    let Some(value) = to_attribute_value(field, &suggestion.value) else {
        return false;
    };

    if suggestion.confidence >= apply_mark {
        if !attributes.apply(field, value, AttributeSource::Ai, Some(suggestion.confidence)) {
            return false;
        }
        if suggestion.confidence >= auto_apply {
            attributes.ai_marked.remove(&field);
            stats.fields_applied += 1;
        } else {
            attributes.ai_marked.insert(field);
            stats.fields_marked += 1;
        }
        true
    } else if attributes.needs_review.insert(field) {
        stats.fields_needs_review += 1;
        true
    } else {
        false
    }
}

pub struct AiEnricher {
    import_repo: Arc<dyn ImportRepository>,
    gateway: Option<Arc<AiGateway>>,
}

impl AiEnricher {
    pub fn new(import_repo: Arc<dyn ImportRepository>, gateway: Option<Arc<AiGateway>>) -> Self {
        Self { import_repo, gateway }
    }

    #[instrument(skip(self))]
    pub async fn enrich_supplier(&self, supplier_id: &str) -> RepositoryResult<EnrichmentOutcome> {
        let Some(gateway) = self.gateway.as_ref() else {
            return Ok(EnrichmentOutcome::NoProvider);
        };

        let mut items: Vec<SupplierItem> = self
            .import_repo
            .list_active_items(supplier_id)?
            .into_iter()
            .filter(needs_enrichment)
            .collect();
        if items.is_empty() {
            return Ok(EnrichmentOutcome::NothingToEnrich);
        }
        let cap = gateway.settings().batch_max_rows;
        if items.len() > cap {
            info!(total = items.len(), cap, "待补全条目超出单批上限，跳过 AI 补全");
            return Ok(EnrichmentOutcome::BatchTooLarge { items: items.len(), cap });
        }

        let raw_names: Vec<&str> = items.iter().map(|i| i.raw_name.as_str()).collect();
        let hash = input_hash(&raw_names);

        if let Some(run) = gateway.runs().find_succeeded_run(&hash, AiRunKind::Enrichment)? {
            let suggestions = gateway.runs().list_suggestions(&run.run_id)?;
            info!(run_id = %run.run_id, suggestions = suggestions.len(), "命中 AI 缓存，回放建议");
            let stats = self.apply_all(gateway, &mut items, &suggestions)?;
            return Ok(EnrichmentOutcome::Cached {
                run_id: run.run_id,
                stats,
            });
        }

        let user = raw_names.join("\n");
        let call = match gateway
            .invoke(AiRunKind::Enrichment, supplier_id, &hash, ENRICHMENT_SYSTEM, &user)
            .await
        {
            Ok(call) => call,
            Err(AiCallError::RateLimited(scope)) => return Ok(EnrichmentOutcome::RateLimited { scope }),
            Err(AiCallError::Provider { run_id, source }) => {
                return Ok(EnrichmentOutcome::Failed {
                    run_id: Some(run_id),
                    error: source.to_string(),
                })
            }
            Err(AiCallError::Repository(e)) => return Err(e),
        };

        let known: HashSet<&str> = raw_names.iter().copied().collect();
        let suggestions = parse_suggestions(&call.run_id, &call.json, &known);
        gateway.runs().insert_suggestions(&suggestions)?;
        let stats = self.apply_all(gateway, &mut items, &suggestions)?;
        info!(run_id = %call.run_id, ?stats, "AI 补全完成");

        Ok(EnrichmentOutcome::Completed {
            run_id: call.run_id,
            stats,
        })
    }

    fn apply_all(
        &self,
        gateway: &AiGateway,
        items: &mut [SupplierItem],
        suggestions: &[AiSuggestion],
    ) -> RepositoryResult<EnrichmentStats> {
        let settings = gateway.settings();
        let auto_apply = Confidence::from_points(i32::from(settings.auto_apply_points));
        let apply_mark = Confidence::from_points(i32::from(settings.apply_mark_points));
        let mut stats = EnrichmentStats {
            items_considered: items.len(),
            ..Default::default()
        };

        for item in items.iter_mut() {
            let mut changed = false;
            for suggestion in suggestions.iter().filter(|s| s.raw_name == item.raw_name) {
                changed |= apply_suggestion(&mut item.attributes, suggestion, auto_apply, apply_mark, &mut stats);
            }
            if changed {
                item.updated_at = Utc::now();
                if let Err(e) = self.import_repo.update_item(item) {
                    warn!(item_id = %item.item_id, error = %e, "AI 补全结果写回失败");
                    return Err(e);
                }
                stats.items_updated += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn suggestion(field: AttributeField, value: &str, points: i32) -> AiSuggestion {
        AiSuggestion {
            run_id: "run-1".to_string(),
            raw_name: "Роза Эксплорер".to_string(),
            field,
            value: value.to_string(),
            confidence: Confidence::from_points(points),
        }
    }

    fn tiers() -> (Confidence, Confidence) {
        (Confidence::from_points(900), Confidence::from_points(700))
    }

    #[test]
    fn test_confidence_tiers() {
        let (auto, mark) = tiers();
        let mut attrs = ItemAttributes::default();
        let mut stats = EnrichmentStats::default();

        assert!(apply_suggestion(&mut attrs, &suggestion(AttributeField::Variety, "Explorer", 950), auto, mark, &mut stats));
        assert!(apply_suggestion(&mut attrs, &suggestion(AttributeField::OriginCountry, "Эквадор", 750), auto, mark, &mut stats));
        assert!(apply_suggestion(&mut attrs, &suggestion(AttributeField::Farm, "NARANJO", 500), auto, mark, &mut stats));

        assert_eq!(attrs.text(AttributeField::Variety), Some("Explorer"));
        assert!(!attrs.ai_marked.contains(&AttributeField::Variety));
        assert!(attrs.ai_marked.contains(&AttributeField::OriginCountry));
        assert_eq!(attrs.text(AttributeField::Farm), None);
        assert!(attrs.needs_review.contains(&AttributeField::Farm));
        assert_eq!((stats.fields_applied, stats.fields_marked, stats.fields_needs_review), (1, 1, 1));
    }

    #[test]
    fn test_manual_and_locked_fields_untouched() {
        let (auto, mark) = tiers();
        let mut attrs = ItemAttributes::default();
        attrs.apply(AttributeField::Variety, AttributeValue::Text("Explorer".into()), AttributeSource::Manual, None);
        attrs.apply(AttributeField::FlowerType, AttributeValue::Text("Роза".into()), AttributeSource::Parser, None);
        attrs.lock(AttributeField::FlowerType);
        let mut stats = EnrichmentStats::default();

        assert!(!apply_suggestion(&mut attrs, &suggestion(AttributeField::Variety, "Explorer XL", 990), auto, mark, &mut stats));
        assert!(!apply_suggestion(&mut attrs, &suggestion(AttributeField::FlowerType, "Пион", 990), auto, mark, &mut stats));
        assert!(!apply_suggestion(&mut attrs, &suggestion(AttributeField::FlowerType, "Пион", 300), auto, mark, &mut stats));
        assert_eq!(attrs.text(AttributeField::Variety), Some("Explorer"));
        assert!(attrs.needs_review.is_empty());
    }

    #[test]
    fn test_needs_review_counted_once() {
        let (auto, mark) = tiers();
        let mut attrs = ItemAttributes::default();
        let mut stats = EnrichmentStats::default();

        assert!(apply_suggestion(&mut attrs, &suggestion(AttributeField::Farm, "NARANJO", 500), auto, mark, &mut stats));
        assert!(!apply_suggestion(&mut attrs, &suggestion(AttributeField::Farm, "NARANJO", 500), auto, mark, &mut stats));
        assert_eq!(stats.fields_needs_review, 1);
    }

    #[test]
    fn test_bundle_list_rejects_variety() {
        let (auto, mark) = tiers();
        let mut attrs = ItemAttributes::default();
        attrs.apply(AttributeField::IsBundleList, AttributeValue::Flag(true), AttributeSource::Parser, None);
        let mut stats = EnrichmentStats::default();

        assert!(!apply_suggestion(&mut attrs, &suggestion(AttributeField::Variety, "Explorer", 950), auto, mark, &mut stats));
        assert_eq!(attrs.text(AttributeField::Variety), None);
        assert!(apply_suggestion(&mut attrs, &suggestion(AttributeField::OriginCountry, "Эквадор", 950), auto, mark, &mut stats));
    }

    #[test]
    fn test_bundle_list_variety_not_counted_as_missing() {
        let mut attrs = ItemAttributes::default();
        attrs.apply(AttributeField::IsBundleList, AttributeValue::Flag(true), AttributeSource::Parser, None);
        for (field, value) in [
            (AttributeField::CleanName, "Роза микс"),
            (AttributeField::FlowerType, "Роза"),
            (AttributeField::OriginCountry, "Эквадор"),
        ] {
            attrs.apply(field, AttributeValue::Text(value.into()), AttributeSource::Manual, None);
        }
        let item = SupplierItem {
            item_id: "item-1".to_string(),
            supplier_id: "s1".to_string(),
            stable_key: "0123456789abcdef".to_string(),
            raw_name: "Роза Explorer, Freedom, Mondial, Vendela".to_string(),
            raw_group: None,
            attributes: attrs,
            status: crate::domain::types::ItemStatus::Active,
            last_batch_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!needs_enrichment(&item));
    }

    #[test]
    fn test_parse_suggestions_filters_unknown() {
        let known: HashSet<&str> = ["Роза Эксплорер"].into_iter().collect();
        let payload = json!({"suggestions": [
            {"raw_name": "Роза Эксплорер", "field": "variety", "value": "Explorer", "confidence": 0.93},
            {"raw_name": "Роза Эксплорер", "field": "colors", "value": ["красный", "белый"], "confidence": 0.8},
            {"raw_name": "Неизвестно", "field": "variety", "value": "X", "confidence": 0.99},
            {"raw_name": "Роза Эксплорер", "field": "price", "value": "100", "confidence": 0.99}
        ]});

        let parsed = parse_suggestions("run-1", &payload, &known);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].confidence.points(), 930);
        assert_eq!(parsed[1].value, "красный, белый");
        assert_eq!(
            to_attribute_value(AttributeField::Colors, &parsed[1].value),
            Some(AttributeValue::List(vec!["красный".into(), "белый".into()]))
        );
    }
}
