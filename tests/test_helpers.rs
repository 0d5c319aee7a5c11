// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、共享连接、主数据种子、Mock AI 供应方
// ==========================================

#![allow(dead_code)]

use async_trait::async_trait;
use price_ingest::ai::{AiProvider, AiProviderError, AiResponse};
use price_ingest::api::PipelineApi;
use price_ingest::db::open_sqlite_connection;
use price_ingest::domain::{NormalizedSku, SupplierItem, SupplierTier};
use price_ingest::repository::{ImportRepository, SqliteImportRepository};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{NamedTempFile, TempDir};

/// 创建临时测试数据库
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("temp path is not utf-8")?
        .to_string();
    Ok((temp_file, db_path))
}

pub fn shared_connection(db_path: &str) -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(
        open_sqlite_connection(db_path).expect("Failed to open test db"),
    ))
}

/// 测试环境: 临时库 + PipelineApi + 同库的条目仓储
pub struct TestEnv {
    pub _db_file: NamedTempFile,
    pub conn: Arc<Mutex<Connection>>,
    pub api: PipelineApi,
    pub items: SqliteImportRepository,
}

impl TestEnv {
    pub fn new(provider: Option<Arc<dyn AiProvider>>) -> Self {
        let (db_file, db_path) = create_test_db().expect("Failed to create test db");
        let conn = shared_connection(&db_path);
        Self::with_connection(db_file, conn, provider)
    }

    pub fn with_connection(
        db_file: NamedTempFile,
        conn: Arc<Mutex<Connection>>,
        provider: Option<Arc<dyn AiProvider>>,
    ) -> Self {
        let api = PipelineApi::from_connection(conn.clone(), provider)
            .expect("Failed to build PipelineApi");
        let items = SqliteImportRepository::from_connection(conn.clone());
        Self {
            _db_file: db_file,
            conn,
            api,
            items,
        }
    }

    pub fn item_by_name(&self, supplier_id: &str, raw_name: &str) -> SupplierItem {
        self.items
            .list_active_items(supplier_id)
            .expect("Failed to list items")
            .into_iter()
            .find(|i| i.raw_name == raw_name)
            .unwrap_or_else(|| panic!("item '{raw_name}' not found"))
    }
}

pub fn seed_supplier(api: &PipelineApi, supplier_id: &str, tier: SupplierTier) {
    api.register_supplier(supplier_id, "Флора Опт", tier)
        .expect("Failed to register supplier");
}

pub fn sku(sku_id: &str, product_type: &str, variety: Option<&str>, subtype: Option<&str>) -> NormalizedSku {
    NormalizedSku {
        sku_id: sku_id.to_string(),
        product_type: product_type.to_string(),
        variety: variety.map(|v| v.to_string()),
        subtype: subtype.map(|s| s.to_string()),
        color: None,
        title: [Some(product_type), subtype, variety]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" "),
        meta: json!({}),
    }
}

/// 写入临时 CSV 文件（目录需要保持存活）
pub fn write_csv(content: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("price.csv");
    std::fs::write(&path, content).expect("Failed to write csv");
    (dir, path)
}

// ==========================================
// Mock AI 供应方
// ==========================================

type Handler = dyn Fn(&str, &str) -> Result<Value, AiProviderError> + Send + Sync;

/// 按 (system, user) 生成固定响应，并计数调用次数
pub struct MockAiProvider {
    handler: Box<Handler>,
    calls: AtomicUsize,
}

impl MockAiProvider {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &str) -> Result<Value, AiProviderError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
        })
    }

    /// 总是返回同一 JSON
    pub fn fixed(json: Value) -> Arc<Self> {
        Self::new(move |_, _| Ok(json.clone()))
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Self::new(move |_, _| {
            Err(AiProviderError::Status {
                status,
                body: "upstream unavailable".to_string(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn complete_json(&self, system: &str, user: &str) -> Result<AiResponse, AiProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let json = (self.handler)(system, user)?;
        Ok(AiResponse {
            json,
            input_tokens: user.chars().count() as u32,
            output_tokens: 42,
        })
    }
}
