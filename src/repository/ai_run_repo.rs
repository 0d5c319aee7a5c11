// ==========================================
// 价目表归一化管道 - AI 运行记录仓储
// ==========================================
// 表: ai_run / ai_suggestion
// 用途: input_hash 缓存复用；按日计数限流
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::ai::{AiRun, AiSuggestion};
use crate::domain::confidence::Confidence;
use crate::domain::item::AttributeField;
use crate::domain::types::{AiRunKind, AiRunStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_support::parse_enum;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait AiRunRepository: Send + Sync {
    fn create_run(&self, run: &AiRun) -> RepositoryResult<()>;

    /// 结束运行：写入状态、token 数、错误信息
    fn finish_run(
        &self,
        run_id: &str,
        status: AiRunStatus,
        input_tokens: u32,
        output_tokens: u32,
        error: Option<&str>,
    ) -> RepositoryResult<()>;

    fn insert_suggestions(&self, suggestions: &[AiSuggestion]) -> RepositoryResult<usize>;
    fn list_suggestions(&self, run_id: &str) -> RepositoryResult<Vec<AiSuggestion>>;

    /// 同 hash、同类型最近一次 succeeded 运行
    fn find_succeeded_run(&self, input_hash: &str, kind: AiRunKind) -> RepositoryResult<Option<AiRun>>;

    /// since 之后的非 failed 运行数；supplier_id 为 None 时统计全局
    fn count_runs_since(&self, supplier_id: Option<&str>, since: DateTime<Utc>) -> RepositoryResult<u32>;
}

pub struct SqliteAiRunRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAiRunRepository {
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

fn map_run(row: &Row<'_>) -> rusqlite::Result<AiRun> {
    Ok(AiRun {
        run_id: row.get(0)?,
        supplier_id: row.get(1)?,
        kind: parse_enum(2, &row.get::<_, String>(2)?, AiRunKind::from_db_str)?,
        input_hash: row.get(3)?,
        status: parse_enum(4, &row.get::<_, String>(4)?, AiRunStatus::from_db_str)?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
        error: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl AiRunRepository for SqliteAiRunRepository {
    fn create_run(&self, run: &AiRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO ai_run (run_id, supplier_id, kind, input_hash, status, input_tokens, output_tokens, error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                run.run_id,
                run.supplier_id,
                run.kind.to_db_str(),
                run.input_hash,
                run.status.to_db_str(),
                run.input_tokens,
                run.output_tokens,
                run.error,
                run.created_at,
            ],
        )?;
        Ok(())
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: AiRunStatus,
        input_tokens: u32,
        output_tokens: u32,
        error: Option<&str>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE ai_run SET status = ?2, input_tokens = ?3, output_tokens = ?4, error = ?5
            WHERE run_id = ?1
            "#,
            params![run_id, status.to_db_str(), input_tokens, output_tokens, error],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("AiRun", run_id));
        }
        Ok(())
    }

    fn insert_suggestions(&self, suggestions: &[AiSuggestion]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ai_suggestion (run_id, raw_name, field, value, confidence) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in suggestions {
                stmt.execute(params![
                    s.run_id,
                    s.raw_name,
                    s.field.as_str(),
                    s.value,
                    s.confidence.points(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(suggestions.len())
    }

    fn list_suggestions(&self, run_id: &str) -> RepositoryResult<Vec<AiSuggestion>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, raw_name, field, value, confidence FROM ai_suggestion WHERE run_id = ?1 ORDER BY suggestion_id",
        )?;
        let suggestions = stmt
            .query_map(params![run_id], |row| {
                Ok(AiSuggestion {
                    run_id: row.get(0)?,
                    raw_name: row.get(1)?,
                    field: parse_enum(2, &row.get::<_, String>(2)?, AttributeField::parse)?,
                    value: row.get(3)?,
                    confidence: Confidence::from_points(row.get::<_, i32>(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(suggestions)
    }

    fn find_succeeded_run(&self, input_hash: &str, kind: AiRunKind) -> RepositoryResult<Option<AiRun>> {
        let conn = self.get_conn()?;
        let run = conn
            .query_row(
                r#"
                SELECT run_id, supplier_id, kind, input_hash, status, input_tokens, output_tokens, error, created_at
                FROM ai_run
                WHERE input_hash = ?1 AND kind = ?2 AND status = 'succeeded'
                ORDER BY created_at DESC, rowid DESC
                LIMIT 1
                "#,
                params![input_hash, kind.to_db_str()],
                map_run,
            )
            .optional()?;
        Ok(run)
    }

    fn count_runs_since(&self, supplier_id: Option<&str>, since: DateTime<Utc>) -> RepositoryResult<u32> {
        let conn = self.get_conn()?;
        let count: u32 = match supplier_id {
            Some(supplier_id) => conn.query_row(
                "SELECT COUNT(*) FROM ai_run WHERE supplier_id = ?1 AND created_at >= ?2 AND status <> 'failed'",
                params![supplier_id, since],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM ai_run WHERE created_at >= ?1 AND status <> 'failed'",
                params![since],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }
}
