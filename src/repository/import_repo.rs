// ==========================================
// 价目表归一化管道 - 导入数据仓储
// ==========================================
// 表: supplier / import_batch / raw_row / parse_run / parse_event
//     supplier_item / offer_candidate
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::batch::{ImportBatch, ParseEvent, ParseRun, RawRow, Supplier};
use crate::domain::item::{ItemAttributes, OfferCandidate, SupplierItem};
use crate::domain::types::{
    BatchStatus, ItemStatus, PriceType, Severity, SourceType, SupplierTier, ValidationStatus,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_support::{parse_decimal, parse_enum, parse_json, to_u32};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ImportRepository Trait
// ==========================================
// 实现者: SqliteImportRepository
pub trait ImportRepository: Send + Sync {
    // ===== 供应商 =====
    fn upsert_supplier(&self, supplier: &Supplier) -> RepositoryResult<()>;
    fn find_supplier(&self, supplier_id: &str) -> RepositoryResult<Option<Supplier>>;

    // ===== 批次 =====
    fn create_batch(&self, batch: &ImportBatch) -> RepositoryResult<()>;
    fn find_batch(&self, batch_id: &str) -> RepositoryResult<Option<ImportBatch>>;

    /// 更新批次状态与 meta（状态机校验由调用方负责）
    fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        meta: &serde_json::Value,
    ) -> RepositoryResult<()>;

    /// 供应商最近一个指定状态的批次
    fn latest_batch_with_status(
        &self,
        supplier_id: &str,
        status: BatchStatus,
    ) -> RepositoryResult<Option<ImportBatch>>;

    // ===== 原始行 / 解析诊断 =====

    /// 批量插入原始行（单事务）
    fn insert_raw_rows(&self, rows: &[RawRow]) -> RepositoryResult<usize>;
    fn count_raw_rows(&self, batch_id: &str) -> RepositoryResult<usize>;
    fn create_parse_run(&self, run: &ParseRun) -> RepositoryResult<()>;
    fn finish_parse_run(&self, run_id: &str, finished_at: DateTime<Utc>) -> RepositoryResult<()>;

    /// 追加解析事件（只追加）
    fn append_parse_events(&self, run_id: &str, events: &[ParseEvent]) -> RepositoryResult<usize>;
    fn list_parse_events(&self, batch_id: &str) -> RepositoryResult<Vec<ParseEvent>>;

    // ===== 供应商条目 =====
    fn find_item(&self, item_id: &str) -> RepositoryResult<Option<SupplierItem>>;
    fn find_item_by_key(
        &self,
        supplier_id: &str,
        stable_key: &str,
    ) -> RepositoryResult<Option<SupplierItem>>;
    fn insert_item(&self, item: &SupplierItem) -> RepositoryResult<()>;

    /// 覆盖写回条目可变列（raw_name / raw_group / attributes / last_batch_id / updated_at）
    fn update_item(&self, item: &SupplierItem) -> RepositoryResult<()>;
    fn list_active_items(&self, supplier_id: &str) -> RepositoryResult<Vec<SupplierItem>>;

    // ===== 报价候选 =====
    fn insert_candidate(&self, candidate: &OfferCandidate) -> RepositoryResult<()>;
    fn list_candidates(&self, batch_id: &str) -> RepositoryResult<Vec<OfferCandidate>>;
    fn count_candidates_for_item(&self, item_id: &str) -> RepositoryResult<usize>;
}

// ==========================================
// SqliteImportRepository
// ==========================================
pub struct SqliteImportRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteImportRepository {
    /// 创建新的仓储实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

const BATCH_COLUMNS: &str =
    "batch_id, supplier_id, source_type, file_name, status, meta_json, created_at, updated_at";

const ITEM_COLUMNS: &str = "item_id, supplier_id, stable_key, raw_name, raw_group, attributes_json, \
     status, last_batch_id, created_at, updated_at";

const CANDIDATE_COLUMNS: &str = "candidate_id, batch_id, item_id, row_number, length_cm, pack_qty, \
     price_type, price_min, price_max, validation, validation_notes_json, created_at";

fn map_batch(row: &Row<'_>) -> rusqlite::Result<ImportBatch> {
    Ok(ImportBatch {
        batch_id: row.get(0)?,
        supplier_id: row.get(1)?,
        source_type: parse_enum(2, &row.get::<_, String>(2)?, SourceType::from_db_str)?,
        file_name: row.get(3)?,
        status: parse_enum(4, &row.get::<_, String>(4)?, BatchStatus::from_db_str)?,
        meta: parse_json(5, &row.get::<_, String>(5)?)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_item(row: &Row<'_>) -> rusqlite::Result<SupplierItem> {
    let attributes: ItemAttributes = parse_json(5, &row.get::<_, String>(5)?)?;
    Ok(SupplierItem {
        item_id: row.get(0)?,
        supplier_id: row.get(1)?,
        stable_key: row.get(2)?,
        raw_name: row.get(3)?,
        raw_group: row.get(4)?,
        attributes,
        status: parse_enum(6, &row.get::<_, String>(6)?, ItemStatus::from_db_str)?,
        last_batch_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_candidate(row: &Row<'_>) -> rusqlite::Result<OfferCandidate> {
    Ok(OfferCandidate {
        candidate_id: row.get(0)?,
        batch_id: row.get(1)?,
        item_id: row.get(2)?,
        row_number: row.get::<_, i64>(3)?.max(0) as usize,
        length_cm: to_u32(row.get(4)?),
        pack_qty: to_u32(row.get(5)?),
        price_type: parse_enum(6, &row.get::<_, String>(6)?, PriceType::from_db_str)?,
        price_min: parse_decimal(7, row.get(7)?)?,
        price_max: parse_decimal(8, row.get(8)?)?,
        validation: parse_enum(9, &row.get::<_, String>(9)?, ValidationStatus::from_db_str)?,
        validation_notes: parse_json(10, &row.get::<_, String>(10)?)?,
        created_at: row.get(11)?,
    })
}

impl ImportRepository for SqliteImportRepository {
    fn upsert_supplier(&self, supplier: &Supplier) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO supplier (supplier_id, name, tier, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(supplier_id) DO UPDATE SET
                name = excluded.name,
                tier = excluded.tier,
                is_active = excluded.is_active
            "#,
            params![
                supplier.supplier_id,
                supplier.name,
                supplier.tier.to_db_str(),
                supplier.is_active,
                supplier.created_at,
            ],
        )?;
        Ok(())
    }

    fn find_supplier(&self, supplier_id: &str) -> RepositoryResult<Option<Supplier>> {
        let conn = self.get_conn()?;
        let supplier = conn
            .query_row(
                "SELECT supplier_id, name, tier, is_active, created_at FROM supplier WHERE supplier_id = ?1",
                params![supplier_id],
                |row| {
                    Ok(Supplier {
                        supplier_id: row.get(0)?,
                        name: row.get(1)?,
                        tier: SupplierTier::from_db_str(&row.get::<_, String>(2)?),
                        is_active: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(supplier)
    }

    fn create_batch(&self, batch: &ImportBatch) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!("INSERT INTO import_batch ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)", BATCH_COLUMNS),
            params![
                batch.batch_id,
                batch.supplier_id,
                batch.source_type.to_db_str(),
                batch.file_name,
                batch.status.to_db_str(),
                serde_json::to_string(&batch.meta)?,
                batch.created_at,
                batch.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_batch(&self, batch_id: &str) -> RepositoryResult<Option<ImportBatch>> {
        let conn = self.get_conn()?;
        let batch = conn
            .query_row(
                &format!("SELECT {} FROM import_batch WHERE batch_id = ?1", BATCH_COLUMNS),
                params![batch_id],
                map_batch,
            )
            .optional()?;
        Ok(batch)
    }

    fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        meta: &serde_json::Value,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM import_batch WHERE batch_id = ?1",
                params![batch_id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| RepositoryError::not_found("ImportBatch", batch_id))?;
        let from = BatchStatus::from_db_str(&current).ok_or_else(|| RepositoryError::FieldValueError {
            field: "status".to_string(),
            message: format!("未知批次状态 {current}"),
        })?;
        if !from.can_transition_to(status) {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.to_db_str().to_string(),
                to: status.to_db_str().to_string(),
            });
        }

        conn.execute(
            "UPDATE import_batch SET status = ?2, meta_json = ?3, updated_at = ?4 WHERE batch_id = ?1",
            params![batch_id, status.to_db_str(), serde_json::to_string(meta)?, Utc::now()],
        )?;
        Ok(())
    }

    fn latest_batch_with_status(
        &self,
        supplier_id: &str,
        status: BatchStatus,
    ) -> RepositoryResult<Option<ImportBatch>> {
        let conn = self.get_conn()?;
        let batch = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_batch WHERE supplier_id = ?1 AND status = ?2 \
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    BATCH_COLUMNS
                ),
                params![supplier_id, status.to_db_str()],
                map_batch,
            )
            .optional()?;
        Ok(batch)
    }

    fn insert_raw_rows(&self, rows: &[RawRow]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO raw_row (raw_row_id, batch_id, ordinal, cells_json, raw_text) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.raw_row_id,
                    row.batch_id,
                    row.ordinal as i64,
                    serde_json::to_string(&row.cells)?,
                    row.raw_text,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn count_raw_rows(&self, batch_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM raw_row WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn create_parse_run(&self, run: &ParseRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO parse_run (run_id, batch_id, parser_version, started_at, finished_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run.run_id, run.batch_id, run.parser_version, run.started_at, run.finished_at],
        )?;
        Ok(())
    }

    fn finish_parse_run(&self, run_id: &str, finished_at: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE parse_run SET finished_at = ?2 WHERE run_id = ?1",
            params![run_id, finished_at],
        )?;
        Ok(())
    }

    fn append_parse_events(&self, run_id: &str, events: &[ParseEvent]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO parse_event (run_id, row_number, severity, code, message) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                stmt.execute(params![
                    run_id,
                    event.row_number.map(|n| n as i64),
                    event.severity.to_db_str(),
                    event.code,
                    event.message,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    fn list_parse_events(&self, batch_id: &str) -> RepositoryResult<Vec<ParseEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT e.row_number, e.severity, e.code, e.message
            FROM parse_event e
            JOIN parse_run r ON r.run_id = e.run_id
            WHERE r.batch_id = ?1
            ORDER BY e.event_id
            "#,
        )?;
        let events = stmt
            .query_map(params![batch_id], |row| {
                Ok(ParseEvent {
                    row_number: row.get::<_, Option<i64>>(0)?.map(|n| n.max(0) as usize),
                    severity: parse_enum(1, &row.get::<_, String>(1)?, Severity::from_db_str)?,
                    code: row.get(2)?,
                    message: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn find_item(&self, item_id: &str) -> RepositoryResult<Option<SupplierItem>> {
        let conn = self.get_conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {} FROM supplier_item WHERE item_id = ?1", ITEM_COLUMNS),
                params![item_id],
                map_item,
            )
            .optional()?;
        Ok(item)
    }

    fn find_item_by_key(
        &self,
        supplier_id: &str,
        stable_key: &str,
    ) -> RepositoryResult<Option<SupplierItem>> {
        let conn = self.get_conn()?;
        let item = conn
            .query_row(
                &format!(
                    "SELECT {} FROM supplier_item WHERE supplier_id = ?1 AND stable_key = ?2",
                    ITEM_COLUMNS
                ),
                params![supplier_id, stable_key],
                map_item,
            )
            .optional()?;
        Ok(item)
    }

    fn insert_item(&self, item: &SupplierItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO supplier_item ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                ITEM_COLUMNS
            ),
            params![
                item.item_id,
                item.supplier_id,
                item.stable_key,
                item.raw_name,
                item.raw_group,
                serde_json::to_string(&item.attributes)?,
                item.status.to_db_str(),
                item.last_batch_id,
                item.created_at,
                item.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_item(&self, item: &SupplierItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE supplier_item SET
                raw_name = ?2,
                raw_group = ?3,
                attributes_json = ?4,
                status = ?5,
                last_batch_id = ?6,
                updated_at = ?7
            WHERE item_id = ?1
            "#,
            params![
                item.item_id,
                item.raw_name,
                item.raw_group,
                serde_json::to_string(&item.attributes)?,
                item.status.to_db_str(),
                item.last_batch_id,
                item.updated_at,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("SupplierItem", &item.item_id));
        }
        Ok(())
    }

    fn list_active_items(&self, supplier_id: &str) -> RepositoryResult<Vec<SupplierItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM supplier_item WHERE supplier_id = ?1 AND status = 'active' ORDER BY created_at, item_id",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![supplier_id], map_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn insert_candidate(&self, candidate: &OfferCandidate) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO offer_candidate ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                CANDIDATE_COLUMNS
            ),
            params![
                candidate.candidate_id,
                candidate.batch_id,
                candidate.item_id,
                candidate.row_number as i64,
                candidate.length_cm,
                candidate.pack_qty,
                candidate.price_type.to_db_str(),
                candidate.price_min.map(|d| d.to_string()),
                candidate.price_max.map(|d| d.to_string()),
                candidate.validation.to_db_str(),
                serde_json::to_string(&candidate.validation_notes)?,
                candidate.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_candidates(&self, batch_id: &str) -> RepositoryResult<Vec<OfferCandidate>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM offer_candidate WHERE batch_id = ?1 ORDER BY row_number",
            CANDIDATE_COLUMNS
        ))?;
        let candidates = stmt
            .query_map(params![batch_id], map_candidate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    fn count_candidates_for_item(&self, item_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM offer_candidate WHERE item_id = ?1",
            params![item_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::item::{AttributeField, AttributeValue};
    use crate::domain::types::AttributeSource;
    use rust_decimal::Decimal;

    fn repo() -> SqliteImportRepository {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        SqliteImportRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn seed_batch(repo: &SqliteImportRepository) -> ImportBatch {
        let now = Utc::now();
        repo.upsert_supplier(&Supplier {
            supplier_id: "s1".to_string(),
            name: "Флора Опт".to_string(),
            tier: SupplierTier::Key,
            is_active: true,
            created_at: now,
        })
        .unwrap();
        let batch = ImportBatch {
            batch_id: "b1".to_string(),
            supplier_id: "s1".to_string(),
            source_type: SourceType::Csv,
            file_name: Some("price.csv".to_string()),
            status: BatchStatus::Received,
            meta: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        repo.create_batch(&batch).unwrap();
        batch
    }

    #[test]
    fn test_batch_status_and_latest_lookup() {
        let repo = repo();
        seed_batch(&repo);

        repo.update_batch_status("b1", BatchStatus::Parsed, &serde_json::json!({"ok_rows": 3}))
            .unwrap();

        let latest = repo
            .latest_batch_with_status("s1", BatchStatus::Parsed)
            .unwrap()
            .unwrap();
        assert_eq!(latest.batch_id, "b1");
        assert_eq!(latest.meta["ok_rows"], 3);
        assert!(repo.update_batch_status("missing", BatchStatus::Failed, &serde_json::json!({})).is_err());
    }

    #[test]
    fn test_batch_status_rejects_backward_transition() {
        let repo = repo();
        seed_batch(&repo);
        repo.update_batch_status("b1", BatchStatus::Failed, &serde_json::json!({"error": "x"}))
            .unwrap();

        let err = repo
            .update_batch_status("b1", BatchStatus::Parsed, &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::InvalidStateTransition { ref from, ref to } if from == "failed" && to == "parsed"
        ));
        let batch = repo.find_batch("b1").unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
    }

    #[test]
    fn test_item_roundtrip_keeps_attributes() {
        let repo = repo();
        seed_batch(&repo);
        let now = Utc::now();

        let mut attributes = ItemAttributes::default();
        attributes.apply(
            AttributeField::FlowerType,
            AttributeValue::Text("Роза".to_string()),
            AttributeSource::Manual,
            None,
        );
        let item = SupplierItem {
            item_id: "i1".to_string(),
            supplier_id: "s1".to_string(),
            stable_key: "0123456789abcdef".to_string(),
            raw_name: "Роза Explorer 60см".to_string(),
            raw_group: None,
            attributes,
            status: ItemStatus::Active,
            last_batch_id: Some("b1".to_string()),
            created_at: now,
            updated_at: now,
        };
        repo.insert_item(&item).unwrap();

        let loaded = repo.find_item_by_key("s1", "0123456789abcdef").unwrap().unwrap();
        assert_eq!(loaded.attributes, item.attributes);
        assert_eq!(
            loaded.attributes.source(AttributeField::FlowerType),
            Some(AttributeSource::Manual)
        );

        // (supplier_id, stable_key) 唯一
        let dup = SupplierItem { item_id: "i2".to_string(), ..item };
        assert!(matches!(
            repo.insert_item(&dup),
            Err(RepositoryError::UniqueConstraintViolation(_))
        ));
    }

    #[test]
    fn test_candidates_and_events() {
        let repo = repo();
        seed_batch(&repo);
        let now = Utc::now();
        let item = SupplierItem {
            item_id: "i1".to_string(),
            supplier_id: "s1".to_string(),
            stable_key: "k".to_string(),
            raw_name: "Роза".to_string(),
            raw_group: None,
            attributes: ItemAttributes::default(),
            status: ItemStatus::Active,
            last_batch_id: None,
            created_at: now,
            updated_at: now,
        };
        repo.insert_item(&item).unwrap();
        repo.insert_candidate(&OfferCandidate {
            candidate_id: "c1".to_string(),
            batch_id: "b1".to_string(),
            item_id: "i1".to_string(),
            row_number: 2,
            length_cm: Some(60),
            pack_qty: None,
            price_type: PriceType::Range,
            price_min: Some(Decimal::new(95, 0)),
            price_max: Some(Decimal::new(99, 0)),
            validation: ValidationStatus::Warn,
            validation_notes: vec!["missing pack_qty".to_string()],
            created_at: now,
        })
        .unwrap();

        let candidates = repo.list_candidates("b1").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].price_max, Some(Decimal::new(99, 0)));
        assert_eq!(repo.count_candidates_for_item("i1").unwrap(), 1);

        repo.create_parse_run(&ParseRun {
            run_id: "r1".to_string(),
            batch_id: "b1".to_string(),
            parser_version: "test".to_string(),
            started_at: now,
            finished_at: None,
        })
        .unwrap();
        repo.append_parse_events(
            "r1",
            &[ParseEvent::row(3, Severity::Error, "missing_price", "Empty price")],
        )
        .unwrap();
        let events = repo.list_parse_events("b1").unwrap();
        assert_eq!(events[0].row_number, Some(3));
        assert_eq!(events[0].severity, Severity::Error);
    }
}
