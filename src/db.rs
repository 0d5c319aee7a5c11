// ==========================================
// 价目表归一化管道 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发导入时的偶发 busy 错误
// - 提供幂等建表（CREATE TABLE IF NOT EXISTS），不做迁移
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表
///
/// 时间戳统一存 RFC3339 文本；JSON 列以 *_json 结尾。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (scope_id, key)
);

-- ===== 导入 =====
CREATE TABLE IF NOT EXISTS supplier (
    supplier_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    tier        TEXT NOT NULL DEFAULT 'regular',
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS import_batch (
    batch_id    TEXT PRIMARY KEY,
    supplier_id TEXT NOT NULL REFERENCES supplier(supplier_id),
    source_type TEXT NOT NULL,
    file_name   TEXT,
    status      TEXT NOT NULL,
    meta_json   TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_import_batch_supplier ON import_batch(supplier_id, created_at);

CREATE TABLE IF NOT EXISTS raw_row (
    raw_row_id  TEXT PRIMARY KEY,
    batch_id    TEXT NOT NULL REFERENCES import_batch(batch_id),
    ordinal     INTEGER NOT NULL,
    cells_json  TEXT NOT NULL,
    raw_text    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_raw_row_batch ON raw_row(batch_id, ordinal);

CREATE TABLE IF NOT EXISTS parse_run (
    run_id          TEXT PRIMARY KEY,
    batch_id        TEXT NOT NULL REFERENCES import_batch(batch_id),
    parser_version  TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    finished_at     TEXT
);

CREATE TABLE IF NOT EXISTS parse_event (
    event_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL REFERENCES parse_run(run_id),
    row_number  INTEGER,
    severity    TEXT NOT NULL,
    code        TEXT NOT NULL,
    message     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_parse_event_run ON parse_event(run_id);

CREATE TABLE IF NOT EXISTS supplier_item (
    item_id         TEXT PRIMARY KEY,
    supplier_id     TEXT NOT NULL REFERENCES supplier(supplier_id),
    stable_key      TEXT NOT NULL,
    raw_name        TEXT NOT NULL,
    raw_group       TEXT,
    attributes_json TEXT NOT NULL DEFAULT '{}',
    status          TEXT NOT NULL DEFAULT 'active',
    last_batch_id   TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (supplier_id, stable_key)
);

CREATE TABLE IF NOT EXISTS offer_candidate (
    candidate_id          TEXT PRIMARY KEY,
    batch_id              TEXT NOT NULL REFERENCES import_batch(batch_id),
    item_id               TEXT NOT NULL REFERENCES supplier_item(item_id),
    row_number            INTEGER NOT NULL,
    length_cm             INTEGER,
    pack_qty              INTEGER,
    price_type            TEXT NOT NULL,
    price_min             TEXT,
    price_max             TEXT,
    validation            TEXT NOT NULL,
    validation_notes_json TEXT NOT NULL DEFAULT '[]',
    created_at            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_offer_candidate_batch ON offer_candidate(batch_id);

-- ===== 目录 / 映射 =====
CREATE TABLE IF NOT EXISTS dictionary_entry (
    entry_id      TEXT PRIMARY KEY,
    dict_type     TEXT NOT NULL,
    key           TEXT NOT NULL,
    value         TEXT NOT NULL,
    synonyms_json TEXT NOT NULL DEFAULT '[]',
    rules_json    TEXT NOT NULL DEFAULT '{}',
    status        TEXT NOT NULL DEFAULT 'active',
    UNIQUE (dict_type, key)
);

CREATE TABLE IF NOT EXISTS normalized_sku (
    sku_id        TEXT PRIMARY KEY,
    product_type  TEXT NOT NULL,
    variety       TEXT,
    subtype       TEXT,
    color         TEXT,
    title         TEXT NOT NULL,
    meta_json     TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_normalized_sku_type ON normalized_sku(product_type, variety);

CREATE TABLE IF NOT EXISTS sku_mapping (
    mapping_id  TEXT PRIMARY KEY,
    item_id     TEXT NOT NULL REFERENCES supplier_item(item_id),
    sku_id      TEXT NOT NULL REFERENCES normalized_sku(sku_id),
    confidence  INTEGER NOT NULL,
    method      TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    decided_at  TEXT,
    UNIQUE (item_id, sku_id)
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_sku_mapping_confirmed
    ON sku_mapping(item_id) WHERE status = 'confirmed';

CREATE TABLE IF NOT EXISTS normalization_task (
    task_id     TEXT PRIMARY KEY,
    item_id     TEXT NOT NULL REFERENCES supplier_item(item_id),
    reason      TEXT NOT NULL,
    priority    INTEGER NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_normalization_task_open
    ON normalization_task(item_id) WHERE status = 'open';

-- ===== 发布 =====
CREATE TABLE IF NOT EXISTS offer (
    offer_id      TEXT PRIMARY KEY,
    supplier_id   TEXT NOT NULL REFERENCES supplier(supplier_id),
    batch_id      TEXT NOT NULL REFERENCES import_batch(batch_id),
    candidate_id  TEXT NOT NULL REFERENCES offer_candidate(candidate_id),
    item_id       TEXT NOT NULL REFERENCES supplier_item(item_id),
    sku_id        TEXT NOT NULL REFERENCES normalized_sku(sku_id),
    display_title TEXT NOT NULL,
    length_cm     INTEGER,
    pack_qty      INTEGER,
    price_type    TEXT NOT NULL,
    price_min     TEXT,
    price_max     TEXT,
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_offer_supplier_active ON offer(supplier_id, is_active);

-- ===== AI =====
CREATE TABLE IF NOT EXISTS ai_run (
    run_id        TEXT PRIMARY KEY,
    supplier_id   TEXT NOT NULL,
    kind          TEXT NOT NULL,
    input_hash    TEXT NOT NULL,
    status        TEXT NOT NULL,
    input_tokens  INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    error         TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ai_run_hash ON ai_run(input_hash, kind, status);
CREATE INDEX IF NOT EXISTS idx_ai_run_created ON ai_run(created_at);

CREATE TABLE IF NOT EXISTS ai_suggestion (
    suggestion_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id        TEXT NOT NULL REFERENCES ai_run(run_id),
    raw_name      TEXT NOT NULL,
    field         TEXT NOT NULL,
    value         TEXT NOT NULL,
    confidence    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ai_suggestion_run ON ai_suggestion(run_id);
"#;
