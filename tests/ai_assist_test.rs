// ==========================================
// 集成测试 - AI 辅助（Mock 供应方）
// ==========================================
// 测试目标: 属性补全分级 / 缓存回放 / 限流 / 供应方失败 / 列映射兜底
// ==========================================

mod test_helpers;

use price_ingest::ai::{AiProvider, EnrichmentOutcome, RateLimitScope};
use price_ingest::config::{config_keys, ConfigManager};
use price_ingest::db::init_schema;
use price_ingest::domain::{AttributeField, AttributeSource, SupplierTier};
use price_ingest::logging;
use serde_json::{json, Value};
use std::sync::Arc;
use test_helpers::{create_test_db, seed_supplier, shared_connection, write_csv, MockAiProvider, TestEnv};

const PRICE_CSV: &str = "\
Наименование;Цена;Длина
Роза Explorer;95;60
Хризантема кустовая Бакарди;70;70
";

/// 按输入行生成补全建议
fn enrichment_response(user: &str) -> Value {
    let suggestions: Vec<Value> = user
        .lines()
        .flat_map(|line| match line {
            "Роза Explorer" => vec![
                json!({"raw_name": line, "field": "clean_name", "value": "Роза Explorer", "confidence": 0.95}),
                json!({"raw_name": line, "field": "origin_country", "value": "Эквадор", "confidence": 0.92}),
            ],
            "Хризантема кустовая Бакарди" => vec![
                json!({"raw_name": line, "field": "clean_name", "value": "Хризантема Бакарди", "confidence": 0.75}),
                json!({"raw_name": line, "field": "origin_country", "value": "Колумбия", "confidence": 0.4}),
            ],
            _ => Vec::new(),
        })
        .collect();
    json!({ "suggestions": suggestions })
}

fn as_provider(mock: &Arc<MockAiProvider>) -> Option<Arc<dyn AiProvider>> {
    Some(mock.clone() as Arc<dyn AiProvider>)
}

// ==========================================
// 测试用例 1: 置信度分级写入
// ==========================================

#[tokio::test]
async fn test_enrichment_applies_tiers() {
    logging::init_test();
    let mock = MockAiProvider::new(|_, user| Ok(enrichment_response(user)));
    let env = TestEnv::new(as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();

    let outcome = env.api.enrich_supplier("s1").await.unwrap();
    let EnrichmentOutcome::Completed { stats, .. } = outcome else {
        panic!("expected Completed, got {outcome:?}");
    };
    assert_eq!(stats.items_considered, 2);
    assert_eq!(stats.items_updated, 2);
    assert_eq!(stats.fields_applied, 2);
    assert_eq!(stats.fields_marked, 1);
    assert_eq!(stats.fields_needs_review, 1);
    assert_eq!(mock.calls(), 1);

    let explorer = env.item_by_name("s1", "Роза Explorer");
    assert_eq!(explorer.attributes.text(AttributeField::CleanName), Some("Роза Explorer"));
    assert_eq!(explorer.attributes.source(AttributeField::CleanName), Some(AttributeSource::Ai));
    assert_eq!(explorer.attributes.text(AttributeField::OriginCountry), Some("Эквадор"));
    assert!(explorer.attributes.ai_marked.is_empty());

    let bakardi = env.item_by_name("s1", "Хризантема кустовая Бакарди");
    assert!(bakardi.attributes.ai_marked.contains(&AttributeField::CleanName));
    assert_eq!(bakardi.attributes.text(AttributeField::OriginCountry), None);
    assert!(bakardi.attributes.needs_review.contains(&AttributeField::OriginCountry));
}

// ==========================================
// 测试用例 2: 相同输入命中缓存
// ==========================================

#[tokio::test]
async fn test_enrichment_replays_cached_run() {
    logging::init_test();
    // 只返回低置信度建议，条目仍需补全，第二次输入不变
    let mock = MockAiProvider::fixed(json!({"suggestions": [
        {"raw_name": "Роза Explorer", "field": "origin_country", "value": "Эквадор", "confidence": 0.3}
    ]}));
    let env = TestEnv::new(as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();

    let first = env.api.enrich_supplier("s1").await.unwrap();
    let EnrichmentOutcome::Completed { run_id, .. } = first else {
        panic!("expected Completed, got {first:?}");
    };

    let second = env.api.enrich_supplier("s1").await.unwrap();
    match second {
        EnrichmentOutcome::Cached { run_id: cached, stats } => {
            assert_eq!(cached, run_id);
            assert_eq!(stats.items_considered, 2);
        }
        other => panic!("expected Cached, got {other:?}"),
    }
    assert_eq!(mock.calls(), 1);
}

// ==========================================
// 测试用例 3: 供应商日限额
// ==========================================

#[tokio::test]
async fn test_enrichment_rate_limited_per_supplier() {
    logging::init_test();
    let (db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    // 建表后写入限额覆写，再组装 API（配置在组装时加载）
    init_schema(&conn.lock().unwrap()).unwrap();
    ConfigManager::from_connection(conn.clone())
        .set_config_value(config_keys::AI_SUPPLIER_DAILY_CAP, "1")
        .unwrap();

    let mock = MockAiProvider::fixed(json!({"suggestions": []}));
    let env = TestEnv::with_connection(db_file, conn, as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();

    let first = env.api.enrich_supplier("s1").await.unwrap();
    assert!(matches!(first, EnrichmentOutcome::Completed { .. }));

    // 新条目改变输入集合，缓存不命中，触发限流
    let (_dir2, path2) = write_csv("Наименование;Цена\nТюльпан Strong Gold;40\n");
    env.api.import_file("s1", &path2).await.unwrap();

    let second = env.api.enrich_supplier("s1").await.unwrap();
    assert_eq!(
        second,
        EnrichmentOutcome::RateLimited {
            scope: RateLimitScope::Supplier
        }
    );
    assert_eq!(mock.calls(), 1);
}

// ==========================================
// 测试用例 3b: 全局日限额
// ==========================================

#[tokio::test]
async fn test_enrichment_rate_limited_globally() {
    logging::init_test();
    let (db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    init_schema(&conn.lock().unwrap()).unwrap();
    ConfigManager::from_connection(conn.clone())
        .set_config_value(config_keys::AI_GLOBAL_DAILY_CAP, "1")
        .unwrap();

    let mock = MockAiProvider::fixed(json!({"suggestions": []}));
    let env = TestEnv::with_connection(db_file, conn, as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    seed_supplier(&env.api, "s2", SupplierTier::Regular);
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();
    let (_dir2, path2) = write_csv("Наименование;Цена\nТюльпан Strong Gold;40\n");
    env.api.import_file("s2", &path2).await.unwrap();

    let first = env.api.enrich_supplier("s1").await.unwrap();
    assert!(matches!(first, EnrichmentOutcome::Completed { .. }));

    // s2 当日尚无运行，但全局额度已被 s1 用完
    let second = env.api.enrich_supplier("s2").await.unwrap();
    assert_eq!(
        second,
        EnrichmentOutcome::RateLimited {
            scope: RateLimitScope::Global
        }
    );
    assert_eq!(mock.calls(), 1);
}

// ==========================================
// 测试用例 3c: 超出单批上限整批跳过
// ==========================================

#[tokio::test]
async fn test_enrichment_skips_oversized_batch() {
    logging::init_test();
    let mock = MockAiProvider::fixed(json!({"suggestions": []}));
    let env = TestEnv::new(as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let cap = env.api.config().ai.batch_max_rows;

    let mut csv = String::from("Наименование;Цена\n");
    for i in 0..cap + 10 {
        csv.push_str(&format!("Роза Sort{i};95\n"));
    }
    let (_dir, path) = write_csv(&csv);
    env.api.import_file("s1", &path).await.unwrap();

    let outcome = env.api.enrich_supplier("s1").await.unwrap();
    assert_eq!(
        outcome,
        EnrichmentOutcome::BatchTooLarge {
            items: cap + 10,
            cap
        }
    );
    assert_eq!(mock.calls(), 0);
}

// ==========================================
// 测试用例 3d: 拼单行不接受单一品种建议
// ==========================================

#[tokio::test]
async fn test_bundle_list_keeps_variety_empty() {
    logging::init_test();
    let bundle = "Роза Explorer, Freedom, Mondial, Vendela";
    let mock = MockAiProvider::fixed(json!({"suggestions": [
        {"raw_name": bundle, "field": "variety", "value": "Explorer", "confidence": 0.95},
        {"raw_name": bundle, "field": "clean_name", "value": "Роза микс", "confidence": 0.95}
    ]}));
    let env = TestEnv::new(as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv(&format!("Наименование;Цена;Длина\n\"{bundle}\";90;60\n"));
    env.api.import_file("s1", &path).await.unwrap();

    let outcome = env.api.enrich_supplier("s1").await.unwrap();
    assert!(matches!(outcome, EnrichmentOutcome::Completed { .. }));

    let item = env.item_by_name("s1", bundle);
    assert!(item.attributes.flag(AttributeField::IsBundleList));
    assert_eq!(item.attributes.text(AttributeField::Variety), None);
    assert_eq!(item.attributes.text(AttributeField::CleanName), Some("Роза микс"));
}

// ==========================================
// 测试用例 4: 供应方失败只降级
// ==========================================

#[tokio::test]
async fn test_provider_failure_is_reported_not_raised() {
    logging::init_test();
    let mock = MockAiProvider::failing(503);
    let env = TestEnv::new(as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();

    let outcome = env.api.enrich_supplier("s1").await.unwrap();
    match outcome {
        EnrichmentOutcome::Failed { run_id, error } => {
            assert!(run_id.is_some());
            assert!(error.contains("503"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    // 失败的运行不作为缓存
    let again = env.api.enrich_supplier("s1").await.unwrap();
    assert!(matches!(again, EnrichmentOutcome::Failed { .. }));
    assert_eq!(mock.calls(), 2);

    let item = env.item_by_name("s1", "Роза Explorer");
    assert_eq!(item.attributes.text(AttributeField::CleanName), None);
}

// ==========================================
// 测试用例 5: 表头无法识别时 AI 列映射兜底
// ==========================================

#[tokio::test]
async fn test_column_mapping_fallback() {
    logging::init_test();
    let mock = MockAiProvider::new(|system, _| {
        assert!(system.contains("map columns"));
        Ok(json!({"mappings": [
            {"field": "name", "column_index": 1, "confidence": 0.9},
            {"field": "price", "column_index": 2, "confidence": 0.85},
            {"field": "length", "column_index": 3, "confidence": 0.2}
        ]}))
    });
    let env = TestEnv::new(as_provider(&mock));
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv("Код;Позиция;Сумма;Рост\nA-1;Роза Explorer;95;60\nA-2;Роза Vendela;80;50\n");

    let report = env.api.import_file("s1", &path).await.unwrap();
    assert_eq!(report.error_rows, 0);
    assert_eq!(report.items_created, 2);
    assert!(report.events.iter().any(|e| e.code == "ai_column_mapping"));
    assert_eq!(mock.calls(), 1);
}

// ==========================================
// 测试用例 6: 无供应方时列映射失败记为行错误
// ==========================================

#[tokio::test]
async fn test_unmapped_columns_without_provider() {
    logging::init_test();
    let env = TestEnv::new(None);
    seed_supplier(&env.api, "s1", SupplierTier::Regular);
    let (_dir, path) = write_csv("Код;Позиция;Сумма\nA-1;Роза Explorer;95\n");

    let report = env.api.import_file("s1", &path).await.unwrap();
    assert_eq!(report.error_rows, 1);
    assert!(report.events.iter().any(|e| e.code == "unmapped_column"));
}
