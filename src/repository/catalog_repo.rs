// ==========================================
// 价目表归一化管道 - 目录 / 映射 / 复核任务仓储
// ==========================================
// 表: dictionary_entry / normalized_sku / sku_mapping / normalization_task
// 红线: 每个条目至多一条 confirmed 映射、至多一条 open 任务（部分唯一索引兜底）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::catalog::{DictionaryEntry, NormalizationTask, NormalizedSku, SkuMapping};
use crate::domain::confidence::Confidence;
use crate::domain::types::{DictionaryStatus, MappingMethod, MappingStatus, TaskStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_support::{parse_enum, parse_json};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// CatalogRepository Trait
// ==========================================
pub trait CatalogRepository: Send + Sync {
    // ===== 字典 =====
    fn upsert_dictionary_entry(&self, entry: &DictionaryEntry) -> RepositoryResult<()>;
    fn list_dictionary_entries(&self, dict_type: &str) -> RepositoryResult<Vec<DictionaryEntry>>;

    // ===== 标准商品 =====
    fn insert_sku(&self, sku: &NormalizedSku) -> RepositoryResult<()>;
    fn find_sku(&self, sku_id: &str) -> RepositoryResult<Option<NormalizedSku>>;

    /// 同品类 SKU（variety 为 None 时返回全部），按 title 排序
    fn list_skus_by_type(&self, product_type: &str) -> RepositoryResult<Vec<NormalizedSku>>;

    // ===== 映射 =====

    /// 插入 proposed 映射；(item, sku) 已存在则不动，返回是否新建
    fn insert_proposed_mapping(&self, mapping: &SkuMapping) -> RepositoryResult<bool>;
    fn find_mapping(&self, mapping_id: &str) -> RepositoryResult<Option<SkuMapping>>;
    fn list_mappings_for_item(&self, item_id: &str) -> RepositoryResult<Vec<SkuMapping>>;

    /// 条目的 confirmed 映射
    fn confirmed_mapping(&self, item_id: &str) -> RepositoryResult<Option<SkuMapping>>;

    /// 确认映射（单事务）:
    /// 1. 同条目其余 confirmed 映射 → rejected
    /// 2. 目标映射 → confirmed
    /// 3. 同条目 open/in_progress 任务 → done
    ///
    /// 返回关闭的任务数
    fn confirm_mapping(&self, mapping_id: &str, decided_at: DateTime<Utc>) -> RepositoryResult<usize>;
    fn reject_mapping(&self, mapping_id: &str, decided_at: DateTime<Utc>) -> RepositoryResult<()>;

    // ===== 复核任务 =====
    fn find_open_task(&self, item_id: &str) -> RepositoryResult<Option<NormalizationTask>>;

    /// 新建 open 任务；已有 open 任务时返回 false
    fn create_task_if_absent(&self, task: &NormalizationTask) -> RepositoryResult<bool>;
    fn list_open_tasks(&self) -> RepositoryResult<Vec<NormalizationTask>>;
}

// ==========================================
// SqliteCatalogRepository
// ==========================================
pub struct SqliteCatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

const SKU_COLUMNS: &str = "sku_id, product_type, variety, subtype, color, title, meta_json";

const MAPPING_COLUMNS: &str =
    "mapping_id, item_id, sku_id, confidence, method, status, created_at, decided_at";

const TASK_COLUMNS: &str = "task_id, item_id, reason, priority, status, created_at, updated_at";

fn map_sku(row: &Row<'_>) -> rusqlite::Result<NormalizedSku> {
    Ok(NormalizedSku {
        sku_id: row.get(0)?,
        product_type: row.get(1)?,
        variety: row.get(2)?,
        subtype: row.get(3)?,
        color: row.get(4)?,
        title: row.get(5)?,
        meta: parse_json(6, &row.get::<_, String>(6)?)?,
    })
}

fn map_mapping(row: &Row<'_>) -> rusqlite::Result<SkuMapping> {
    Ok(SkuMapping {
        mapping_id: row.get(0)?,
        item_id: row.get(1)?,
        sku_id: row.get(2)?,
        confidence: Confidence::from_points(row.get::<_, i32>(3)?),
        method: parse_enum(4, &row.get::<_, String>(4)?, MappingMethod::from_db_str)?,
        status: parse_enum(5, &row.get::<_, String>(5)?, MappingStatus::from_db_str)?,
        created_at: row.get(6)?,
        decided_at: row.get(7)?,
    })
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<NormalizationTask> {
    Ok(NormalizationTask {
        task_id: row.get(0)?,
        item_id: row.get(1)?,
        reason: row.get(2)?,
        priority: row.get(3)?,
        status: parse_enum(4, &row.get::<_, String>(4)?, TaskStatus::from_db_str)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl CatalogRepository for SqliteCatalogRepository {
    fn upsert_dictionary_entry(&self, entry: &DictionaryEntry) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO dictionary_entry (entry_id, dict_type, key, value, synonyms_json, rules_json, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(dict_type, key) DO UPDATE SET
                value = excluded.value,
                synonyms_json = excluded.synonyms_json,
                rules_json = excluded.rules_json,
                status = excluded.status
            "#,
            params![
                entry.entry_id,
                entry.dict_type,
                entry.key,
                entry.value,
                serde_json::to_string(&entry.synonyms)?,
                serde_json::to_string(&entry.rules)?,
                entry.status.to_db_str(),
            ],
        )?;
        Ok(())
    }

    fn list_dictionary_entries(&self, dict_type: &str) -> RepositoryResult<Vec<DictionaryEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT entry_id, dict_type, key, value, synonyms_json, rules_json, status
            FROM dictionary_entry
            WHERE dict_type = ?1
            ORDER BY key
            "#,
        )?;
        let entries = stmt
            .query_map(params![dict_type], |row| {
                Ok(DictionaryEntry {
                    entry_id: row.get(0)?,
                    dict_type: row.get(1)?,
                    key: row.get(2)?,
                    value: row.get(3)?,
                    synonyms: parse_json(4, &row.get::<_, String>(4)?)?,
                    rules: parse_json(5, &row.get::<_, String>(5)?)?,
                    status: parse_enum(6, &row.get::<_, String>(6)?, DictionaryStatus::from_db_str)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn insert_sku(&self, sku: &NormalizedSku) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!("INSERT INTO normalized_sku ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", SKU_COLUMNS),
            params![
                sku.sku_id,
                sku.product_type,
                sku.variety,
                sku.subtype,
                sku.color,
                sku.title,
                serde_json::to_string(&sku.meta)?,
            ],
        )?;
        Ok(())
    }

    fn find_sku(&self, sku_id: &str) -> RepositoryResult<Option<NormalizedSku>> {
        let conn = self.get_conn()?;
        let sku = conn
            .query_row(
                &format!("SELECT {} FROM normalized_sku WHERE sku_id = ?1", SKU_COLUMNS),
                params![sku_id],
                map_sku,
            )
            .optional()?;
        Ok(sku)
    }

    fn list_skus_by_type(&self, product_type: &str) -> RepositoryResult<Vec<NormalizedSku>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM normalized_sku WHERE product_type = ?1 ORDER BY title, sku_id",
            SKU_COLUMNS
        ))?;
        let skus = stmt
            .query_map(params![product_type], map_sku)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(skus)
    }

    fn insert_proposed_mapping(&self, mapping: &SkuMapping) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO sku_mapping ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                MAPPING_COLUMNS
            ),
            params![
                mapping.mapping_id,
                mapping.item_id,
                mapping.sku_id,
                mapping.confidence.points(),
                mapping.method.to_db_str(),
                MappingStatus::Proposed.to_db_str(),
                mapping.created_at,
                mapping.decided_at,
            ],
        )?;
        Ok(affected > 0)
    }

    fn find_mapping(&self, mapping_id: &str) -> RepositoryResult<Option<SkuMapping>> {
        let conn = self.get_conn()?;
        let mapping = conn
            .query_row(
                &format!("SELECT {} FROM sku_mapping WHERE mapping_id = ?1", MAPPING_COLUMNS),
                params![mapping_id],
                map_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    fn list_mappings_for_item(&self, item_id: &str) -> RepositoryResult<Vec<SkuMapping>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sku_mapping WHERE item_id = ?1 ORDER BY confidence DESC, sku_id",
            MAPPING_COLUMNS
        ))?;
        let mappings = stmt
            .query_map(params![item_id], map_mapping)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mappings)
    }

    fn confirmed_mapping(&self, item_id: &str) -> RepositoryResult<Option<SkuMapping>> {
        let conn = self.get_conn()?;
        let mapping = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sku_mapping WHERE item_id = ?1 AND status = 'confirmed'",
                    MAPPING_COLUMNS
                ),
                params![item_id],
                map_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    fn confirm_mapping(&self, mapping_id: &str, decided_at: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let item_id: Option<String> = tx
            .query_row(
                "SELECT item_id FROM sku_mapping WHERE mapping_id = ?1",
                params![mapping_id],
                |row| row.get(0),
            )
            .optional()?;
        let item_id = item_id.ok_or_else(|| RepositoryError::not_found("SkuMapping", mapping_id))?;

        tx.execute(
            r#"
            UPDATE sku_mapping SET status = 'rejected', decided_at = ?3
            WHERE item_id = ?1 AND mapping_id <> ?2 AND status = 'confirmed'
            "#,
            params![item_id, mapping_id, decided_at],
        )?;
        tx.execute(
            "UPDATE sku_mapping SET status = 'confirmed', decided_at = ?2 WHERE mapping_id = ?1",
            params![mapping_id, decided_at],
        )?;
        let closed = tx.execute(
            r#"
            UPDATE normalization_task SET status = 'done', updated_at = ?2
            WHERE item_id = ?1 AND status IN ('open', 'in_progress')
            "#,
            params![item_id, decided_at],
        )?;

        tx.commit()?;
        Ok(closed)
    }

    fn reject_mapping(&self, mapping_id: &str, decided_at: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE sku_mapping SET status = 'rejected', decided_at = ?2 WHERE mapping_id = ?1",
            params![mapping_id, decided_at],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("SkuMapping", mapping_id));
        }
        Ok(())
    }

    fn find_open_task(&self, item_id: &str) -> RepositoryResult<Option<NormalizationTask>> {
        let conn = self.get_conn()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {} FROM normalization_task WHERE item_id = ?1 AND status = 'open'",
                    TASK_COLUMNS
                ),
                params![item_id],
                map_task,
            )
            .optional()?;
        Ok(task)
    }

    fn create_task_if_absent(&self, task: &NormalizationTask) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        // 部分唯一索引 uq_normalization_task_open 保证每条目至多一条 open
        let affected = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO normalization_task ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                TASK_COLUMNS
            ),
            params![
                task.task_id,
                task.item_id,
                task.reason,
                task.priority,
                TaskStatus::Open.to_db_str(),
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(affected > 0)
    }

    fn list_open_tasks(&self) -> RepositoryResult<Vec<NormalizationTask>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM normalization_task WHERE status = 'open' ORDER BY priority DESC, created_at",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map([], map_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }
}
