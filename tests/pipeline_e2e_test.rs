// ==========================================
// 端到端集成测试 - 导入 → 匹配 → 确认 → 发布
// ==========================================
// 测试目标: 验证 PipelineApi 在真实 SQLite 文件库上的完整流程
// 覆盖范围: PriceListImporter + MatchingEngine + PublishReconciler
// ==========================================

mod test_helpers;

use price_ingest::api::ApiError;
use price_ingest::domain::{SourceType, Supplier, SupplierTier};
use price_ingest::logging;
use price_ingest::repository::{CatalogRepository, ImportRepository, SqliteCatalogRepository};
use test_helpers::{seed_supplier, sku, write_csv, TestEnv};

const PRICE_CSV: &str = "\
Прайс-лист на неделю
Наименование;Цена;Длина;Страна
Роза Explorer;95;60;Эквадор
Роза Vendela;80-85;50;Кения
Хризантема кустовая Бакарди;70;70;Колумбия
Без цены;;;
";

fn prepare_env() -> (TestEnv, SqliteCatalogRepository) {
    logging::init_test();
    let env = TestEnv::new(None);
    seed_supplier(&env.api, "s1", SupplierTier::Key);
    env.api.register_sku(&sku("sku-explorer", "Роза", Some("Explorer"), None)).unwrap();
    env.api
        .register_sku(&sku("sku-bakardi", "Хризантема", Some("Бакарди"), Some("Кустовая")))
        .unwrap();
    let catalog = SqliteCatalogRepository::from_connection(env.conn.clone());
    (env, catalog)
}

fn confirm_top_mapping(env: &TestEnv, catalog: &SqliteCatalogRepository, raw_name: &str, sku_id: &str) {
    let item = env.item_by_name("s1", raw_name);
    let mapping = catalog
        .list_mappings_for_item(&item.item_id)
        .unwrap()
        .into_iter()
        .find(|m| m.sku_id == sku_id)
        .unwrap_or_else(|| panic!("no proposal {sku_id} for {raw_name}"));
    let report = env.api.confirm_mapping(&mapping.mapping_id).unwrap();
    assert_eq!(report.item_id, item.item_id);
}

// ==========================================
// 测试用例 1: 完整流程
// ==========================================

#[tokio::test]
async fn test_import_propose_confirm_publish() {
    let (env, catalog) = prepare_env();
    let (_dir, path) = write_csv(PRICE_CSV);

    // ===== 导入 =====
    let report = env.api.import_file("s1", &path).await.unwrap();
    assert_eq!(report.total_rows, 4);
    assert_eq!(report.ok_rows + report.warn_rows, 3);
    assert_eq!(report.error_rows, 1);
    assert_eq!(report.items_created, 3);
    assert!(report.events.iter().any(|e| e.code == "missing_price"));

    // ===== 匹配 =====
    let propose = env.api.propose_mappings("s1").unwrap();
    assert_eq!(propose.items_processed, 3);
    assert_eq!(propose.items_failed, 0);
    assert_eq!(propose.mappings_created, 3);
    assert_eq!(propose.tasks_created, 1);

    let vendela = env.item_by_name("s1", "Роза Vendela");
    let task = catalog.find_open_task(&vendela.item_id).unwrap().unwrap();
    assert_eq!(task.reason, "low_confidence");
    // 100 + 2×1 候选 + 50 重点供应商
    assert_eq!(task.priority, 152);

    // ===== 人工确认 =====
    confirm_top_mapping(&env, &catalog, "Роза Explorer", "sku-explorer");
    confirm_top_mapping(&env, &catalog, "Хризантема кустовая Бакарди", "sku-bakardi");

    // ===== 发布 =====
    let published = env.api.publish_supplier("s1").unwrap();
    assert_eq!(published.batch_id, report.batch_id);
    assert_eq!(published.deactivated, 0);
    assert_eq!(published.created, 2);
    assert_eq!(published.skipped_unmapped, 1);

    let offers = env.api.list_active_offers("s1").unwrap();
    assert_eq!(offers.len(), 2);
    let explorer = offers.iter().find(|o| o.sku_id == "sku-explorer").unwrap();
    assert_eq!(explorer.length_cm, Some(60));
    assert!(explorer.display_title.starts_with("Роза"));
    assert!(explorer.display_title.contains("Explorer"));
    assert!(explorer.display_title.ends_with("60 см"));

    let batch = env.items.find_batch(&report.batch_id).unwrap().unwrap();
    assert_eq!(batch.status.to_db_str(), "published");
}

// ==========================================
// 测试用例 2: 幂等性
// ==========================================

#[tokio::test]
async fn test_matching_and_publish_are_idempotent() {
    let (env, catalog) = prepare_env();
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();

    let first = env.api.propose_mappings("s1").unwrap();
    let second = env.api.propose_mappings("s1").unwrap();
    assert_eq!(second.mappings_proposed, first.mappings_proposed);
    assert_eq!(second.mappings_created, 0);
    assert_eq!(second.tasks_created, 0);
    assert_eq!(env.api.list_open_tasks().unwrap().len(), 1);

    confirm_top_mapping(&env, &catalog, "Роза Explorer", "sku-explorer");

    let first_publish = env.api.publish_supplier("s1").unwrap();
    let second_publish = env.api.publish_supplier("s1").unwrap();
    assert_eq!(second_publish.deactivated, first_publish.created);
    assert_eq!(second_publish.created, first_publish.created);
    assert_eq!(env.api.list_active_offers("s1").unwrap().len(), 1);

    // 已确认条目在后续匹配中跳过
    let third = env.api.propose_mappings("s1").unwrap();
    assert_eq!(third.items_skipped_confirmed, 1);
    assert_eq!(third.mappings_created, 0);
}

// ==========================================
// 测试用例 3: 重新导入更新同一条目
// ==========================================

#[tokio::test]
async fn test_reimport_updates_existing_items() {
    let (env, _catalog) = prepare_env();
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();

    let (_dir2, path2) = write_csv(PRICE_CSV);
    let report = env.api.import_file("s1", &path2).await.unwrap();
    assert_eq!(report.items_created, 0);
    assert_eq!(report.items_updated, 3);
    assert_eq!(env.items.list_active_items("s1").unwrap().len(), 3);
}

// ==========================================
// 测试用例 4: 拼单行开复核任务，不产生单一品种
// ==========================================

#[tokio::test]
async fn test_bundle_list_row_opens_task() {
    let (env, catalog) = prepare_env();
    let csv = "Наименование;Цена;Длина;Страна\n\"Роза Explorer, Freedom, Mondial, Vendela\";90;60;Эквадор\n";
    let (_dir, path) = write_csv(csv);
    env.api.import_file("s1", &path).await.unwrap();

    let item = env.item_by_name("s1", "Роза Explorer, Freedom, Mondial, Vendela");
    assert!(item.attributes.flag(price_ingest::domain::AttributeField::IsBundleList));
    assert_eq!(item.attributes.text(price_ingest::domain::AttributeField::Variety), None);

    env.api.propose_mappings("s1").unwrap();
    let task = catalog.find_open_task(&item.item_id).unwrap().unwrap();
    assert_eq!(task.reason, "bundle_list");
}

// ==========================================
// 测试用例 5: 发布前置条件
// ==========================================

#[tokio::test]
async fn test_publish_preconditions() {
    let (env, _catalog) = prepare_env();

    // 无 parsed 批次
    assert!(matches!(
        env.api.publish_supplier("s1"),
        Err(ApiError::PreconditionFailed(_))
    ));

    // 供应商停用
    let (_dir, path) = write_csv(PRICE_CSV);
    env.api.import_file("s1", &path).await.unwrap();
    env.items
        .upsert_supplier(&Supplier {
            supplier_id: "s1".to_string(),
            name: "Флора Опт".to_string(),
            tier: SupplierTier::Key,
            is_active: false,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
    assert!(matches!(
        env.api.publish_supplier("s1"),
        Err(ApiError::PreconditionFailed(_))
    ));
}

// ==========================================
// 测试用例 6: 批次级失败
// ==========================================

#[tokio::test]
async fn test_matrix_price_list_fails_batch() {
    let (env, _catalog) = prepare_env();
    let csv = "Наименование;40 см 10;50 см 10;60 см 10\nРоза Explorer;90;95;99\n";
    let (_dir, path) = write_csv(csv);

    let err = env.api.import_file("s1", &path).await.unwrap_err();
    assert!(matches!(err, ApiError::ImportFailed(_)));
    assert!(env.items.list_active_items("s1").unwrap().is_empty());
}

// ==========================================
// 测试用例 7: XLSX 价目表
// ==========================================

#[tokio::test]
async fn test_xlsx_price_list_import() {
    let (env, _catalog) = prepare_env();
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Прайс-лист на неделю").unwrap();
    for (col, header) in ["Наименование", "Цена", "Длина", "Страна"].iter().enumerate() {
        sheet.write_string(1, col as u16, *header).unwrap();
    }
    sheet.write_string(2, 0, "Роза Explorer").unwrap();
    sheet.write_number(2, 1, 95.0).unwrap();
    sheet.write_number(2, 2, 60.0).unwrap();
    sheet.write_string(2, 3, "Эквадор").unwrap();
    sheet.write_string(3, 0, "Хризантема кустовая Бакарди").unwrap();
    sheet.write_string(3, 1, "70-75").unwrap();
    sheet.write_number(3, 2, 70.0).unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let report = env
        .api
        .import_bytes("s1", SourceType::Xlsx, Some("price.xlsx"), &bytes)
        .await
        .unwrap();
    assert_eq!(report.total_rows, 2);
    assert_eq!(report.error_rows, 0);
    assert_eq!(report.items_created, 2);

    let explorer = env.item_by_name("s1", "Роза Explorer");
    assert_eq!(
        explorer.attributes.text(price_ingest::domain::AttributeField::OriginCountry),
        Some("Эквадор")
    );
}
