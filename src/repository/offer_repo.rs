// ==========================================
// 价目表归一化管道 - 已发布报价仓储
// ==========================================
// 表: offer (+ import_batch.status)
// 红线: 每个供应商任一时刻只有一套 active 报价；替换在单事务内完成
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::catalog::Offer;
use crate::domain::types::{BatchStatus, PriceType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_support::{parse_decimal, parse_enum, to_u32};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait OfferRepository: Send + Sync {
    /// 原子替换供应商的 active 报价集合，并将批次置为 published
    ///
    /// # 返回
    /// - Ok(deactivated): 被停用的旧报价数
    fn replace_active_offers(
        &self,
        supplier_id: &str,
        batch_id: &str,
        offers: &[Offer],
    ) -> RepositoryResult<usize>;

    fn list_active_offers(&self, supplier_id: &str) -> RepositoryResult<Vec<Offer>>;
    fn count_active_offers(&self, supplier_id: &str) -> RepositoryResult<usize>;
}

pub struct SqliteOfferRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOfferRepository {
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

impl OfferRepository for SqliteOfferRepository {
    fn replace_active_offers(
        &self,
        supplier_id: &str,
        batch_id: &str,
        offers: &[Offer],
    ) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let deactivated = tx.execute(
            "UPDATE offer SET is_active = 0 WHERE supplier_id = ?1 AND is_active = 1",
            params![supplier_id],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO offer (
                    offer_id, supplier_id, batch_id, candidate_id, item_id, sku_id,
                    display_title, length_cm, pack_qty, price_type, price_min, price_max,
                    is_active, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13)
                "#,
            )?;
            for offer in offers {
                stmt.execute(params![
                    offer.offer_id,
                    offer.supplier_id,
                    offer.batch_id,
                    offer.candidate_id,
                    offer.item_id,
                    offer.sku_id,
                    offer.display_title,
                    offer.length_cm,
                    offer.pack_qty,
                    offer.price_type.to_db_str(),
                    offer.price_min.map(|d| d.to_string()),
                    offer.price_max.map(|d| d.to_string()),
                    offer.created_at,
                ])?;
            }
        }

        let updated = tx.execute(
            "UPDATE import_batch SET status = ?2, updated_at = ?3 WHERE batch_id = ?1",
            params![batch_id, BatchStatus::Published.to_db_str(), Utc::now()],
        )?;
        if updated == 0 {
            // 事务随 tx drop 回滚
            return Err(RepositoryError::not_found("ImportBatch", batch_id));
        }

        tx.commit()?;
        Ok(deactivated)
    }

    fn list_active_offers(&self, supplier_id: &str) -> RepositoryResult<Vec<Offer>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT offer_id, supplier_id, batch_id, candidate_id, item_id, sku_id,
                   display_title, length_cm, pack_qty, price_type, price_min, price_max,
                   is_active, created_at
            FROM offer
            WHERE supplier_id = ?1 AND is_active = 1
            ORDER BY display_title, offer_id
            "#,
        )?;
        let offers = stmt
            .query_map(params![supplier_id], |row| {
                Ok(Offer {
                    offer_id: row.get(0)?,
                    supplier_id: row.get(1)?,
                    batch_id: row.get(2)?,
                    candidate_id: row.get(3)?,
                    item_id: row.get(4)?,
                    sku_id: row.get(5)?,
                    display_title: row.get(6)?,
                    length_cm: to_u32(row.get(7)?),
                    pack_qty: to_u32(row.get(8)?),
                    price_type: parse_enum(9, &row.get::<_, String>(9)?, PriceType::from_db_str)?,
                    price_min: parse_decimal(10, row.get(10)?)?,
                    price_max: parse_decimal(11, row.get(11)?)?,
                    is_active: row.get(12)?,
                    created_at: row.get(13)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(offers)
    }

    fn count_active_offers(&self, supplier_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM offer WHERE supplier_id = ?1 AND is_active = 1",
            params![supplier_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
