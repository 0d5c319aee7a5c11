// ==========================================
// 价目表归一化管道 - 配置管理器
// ==========================================
// 职责: 从 config_kv 表与 dictionary_entry 表组装 NormalizationConfig
// 存储: config_kv (scope_id='global') + dictionary_entry (status='active')
// ==========================================

use crate::config::normalization_config::{DictionaryRule, NormalizationConfig, SubtypeRule};
use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（覆盖）
    pub fn set_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析数值配置；格式错误时告警并返回 None
    fn get_parsed<T: FromStr>(&self, key: &str) -> RepositoryResult<Option<T>> {
        match self.get_config_value(key)? {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => {
                    warn!(config_key = key, raw_value = %raw, "配置值格式错误，使用默认值");
                    Ok(None)
                }
            },
        }
    }

    /// 组装归一化配置
    ///
    /// 1. 以内置默认值为基础
    /// 2. 应用 config_kv 中的阈值覆写
    /// 3. 合并 dictionary_entry 中的 active 字典条目
    pub fn load_normalization_config(&self) -> RepositoryResult<NormalizationConfig> {
        let mut config = NormalizationConfig::default();

        if let Some(v) = self.get_config_value(config_keys::PARSER_VERSION)? {
            config.parser_version = v;
        }
        if let Some(v) = self.get_parsed::<usize>(config_keys::AI_BATCH_MAX_ROWS)? {
            config.ai.batch_max_rows = v;
        }
        if let Some(v) = self.get_parsed::<u32>(config_keys::AI_SUPPLIER_DAILY_CAP)? {
            config.ai.supplier_daily_cap = v;
        }
        if let Some(v) = self.get_parsed::<u32>(config_keys::AI_GLOBAL_DAILY_CAP)? {
            config.ai.global_daily_cap = v;
        }
        if let Some(v) = self.get_parsed::<u64>(config_keys::AI_TIMEOUT_SECS)? {
            config.ai.timeout_secs = v;
        }
        if let Some(v) = self.get_parsed::<u16>(config_keys::TASK_BELOW_POINTS)? {
            config.thresholds.task_below_points = v.min(1000);
        }
        if let Some(v) = self.get_parsed::<u16>(config_keys::AMBIGUITY_GAP_POINTS)? {
            config.thresholds.ambiguity_gap_points = v.min(1000);
        }
        if let Some(v) = self.get_parsed::<usize>(config_keys::MAX_PROPOSALS)? {
            config.thresholds.max_proposals = v;
        }

        let merged = self.merge_dictionary_entries(&mut config)?;
        debug!(dictionary_entries = merged, "归一化配置加载完成");

        Ok(config)
    }

    /// 合并 active 字典条目，返回合并条数
    fn merge_dictionary_entries(&self, config: &mut NormalizationConfig) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT dict_type, value, synonyms_json, rules_json
            FROM dictionary_entry
            WHERE status = 'active'
            ORDER BY dict_type, key
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut merged = 0;
        for row in rows {
            let (dict_type, value, synonyms_json, rules_json) = row?;
            let synonyms: Vec<String> = serde_json::from_str(&synonyms_json).unwrap_or_default();
            let rule = DictionaryRule { value: value.clone(), synonyms };

            match dict_type.as_str() {
                "product_type" => NormalizationConfig::upsert_rule(&mut config.flower_types, rule),
                "variety_alias" => NormalizationConfig::upsert_rule(&mut config.variety_aliases, rule),
                "country" => NormalizationConfig::upsert_rule(&mut config.countries, rule),
                "color" => NormalizationConfig::upsert_rule(&mut config.colors, rule),
                "stopword" => {
                    let word = value.to_lowercase();
                    if !config.stopwords.contains(&word) {
                        config.stopwords.push(word);
                    }
                }
                "subtype" => {
                    let rules: serde_json::Value =
                        serde_json::from_str(&rules_json).unwrap_or(serde_json::Value::Null);
                    match rules.get("pattern").and_then(|p| p.as_str()) {
                        Some(pattern) => config.subtypes.push(SubtypeRule {
                            value,
                            pattern: pattern.to_string(),
                        }),
                        None => {
                            warn!(value = %value, "subtype 字典条目缺少 rules.pattern，已跳过");
                            continue;
                        }
                    }
                }
                other => {
                    warn!(dict_type = other, "未知字典类型，已跳过");
                    continue;
                }
            }
            merged += 1;
        }

        Ok(merged)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 解析器
    pub const PARSER_VERSION: &str = "parser_version";

    // AI 辅助
    pub const AI_BATCH_MAX_ROWS: &str = "ai_batch_max_rows";
    pub const AI_SUPPLIER_DAILY_CAP: &str = "ai_supplier_daily_cap";
    pub const AI_GLOBAL_DAILY_CAP: &str = "ai_global_daily_cap";
    pub const AI_TIMEOUT_SECS: &str = "ai_timeout_secs";

    // 匹配与任务策略（千分点）
    pub const TASK_BELOW_POINTS: &str = "task_below_points";
    pub const AMBIGUITY_GAP_POINTS: &str = "ambiguity_gap_points";
    pub const MAX_PROPOSALS: &str = "max_proposals";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_overrides_from_config_kv() {
        let manager = manager();
        manager.set_config_value(config_keys::AI_SUPPLIER_DAILY_CAP, "3").unwrap();
        manager.set_config_value(config_keys::TASK_BELOW_POINTS, "bad").unwrap();

        let config = manager.load_normalization_config().unwrap();

        assert_eq!(config.ai.supplier_daily_cap, 3);
        assert_eq!(config.thresholds.task_below_points, 700);
    }

    #[test]
    fn test_dictionary_entries_merged() {
        let manager = manager();
        {
            let conn = manager.get_conn().unwrap();
            conn.execute(
                r#"
                INSERT INTO dictionary_entry (entry_id, dict_type, key, value, synonyms_json, rules_json, status)
                VALUES ('d1', 'product_type', 'астра', 'Астра', '["астра","aster"]', '{}', 'active'),
                       ('d2', 'subtype', 'мини', 'Мини', '[]', '{"pattern":"(?i)\\bмини\\b"}', 'active'),
                       ('d3', 'product_type', 'ирис', 'Ирис', '[]', '{}', 'draft')
                "#,
                [],
            )
            .unwrap();
        }

        let config = manager.load_normalization_config().unwrap();

        assert!(config.flower_type("Астра").is_some());
        assert!(config.flower_type("Ирис").is_none());
        assert_eq!(config.subtypes.last().map(|s| s.value.as_str()), Some("Мини"));
    }
}
