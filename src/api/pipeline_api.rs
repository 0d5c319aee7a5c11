// ==========================================
// 价目表归一化管道 - 管道 API
// ==========================================
// 职责: 对外唯一入口，组装仓储 / 引擎 / AI 网关
// 调用方: CLI、HTTP 层、聊天机器人（同一 import_file 入口）
// ==========================================

use crate::ai::{AiEnricher, AiGateway, AiProvider, EnrichmentOutcome, OpenAiCompatibleProvider};
use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, NormalizationConfig};
use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::batch::Supplier;
use crate::domain::catalog::{NormalizationTask, NormalizedSku, Offer};
use crate::domain::types::{SourceType, SupplierTier};
use crate::engine::{ConfirmReport, MatchingEngine, ProposeReport, PublishReconciler, PublishReport};
use crate::importer::{ImportReport, PriceListImporter};
use crate::repository::{
    CatalogRepository, ImportRepository, OfferRepository, SqliteAiRunRepository,
    SqliteCatalogRepository, SqliteImportRepository, SqliteOfferRepository,
};
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};

pub struct PipelineApi {
    import_repo: Arc<dyn ImportRepository>,
    catalog_repo: Arc<dyn CatalogRepository>,
    offer_repo: Arc<dyn OfferRepository>,
    config: Arc<NormalizationConfig>,
    importer: PriceListImporter,
    matching: MatchingEngine,
    enricher: AiEnricher,
    publisher: PublishReconciler,
}

impl PipelineApi {
    /// 打开数据库（不存在则建表），AI 供应方取自环境变量
    pub fn open(db_path: &str) -> ApiResult<Self> {
        info!(db_path, "初始化 PipelineApi");
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
        let provider = OpenAiCompatibleProvider::from_env()
            .map(|p| Arc::new(p) as Arc<dyn AiProvider>);
        if provider.is_none() {
            info!("未配置 AI_API_KEY，AI 辅助功能关闭");
        }
        Self::from_connection(Arc::new(Mutex::new(conn)), provider)
    }

    /// 基于共享连接组装（测试注入 mock 供应方）
    pub fn from_connection(
        conn: Arc<Mutex<Connection>>,
        provider: Option<Arc<dyn AiProvider>>,
    ) -> ApiResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
            init_schema(&guard).map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        }

        let config = Arc::new(ConfigManager::from_connection(conn.clone()).load_normalization_config()?);

        let import_repo: Arc<dyn ImportRepository> =
            Arc::new(SqliteImportRepository::from_connection(conn.clone()));
        let catalog_repo: Arc<dyn CatalogRepository> =
            Arc::new(SqliteCatalogRepository::from_connection(conn.clone()));
        let offer_repo: Arc<dyn OfferRepository> =
            Arc::new(SqliteOfferRepository::from_connection(conn.clone()));

        let gateway = provider.map(|provider| {
            Arc::new(AiGateway::new(
                provider,
                Arc::new(SqliteAiRunRepository::from_connection(conn)),
                config.ai.clone(),
            ))
        });

        Ok(Self {
            importer: PriceListImporter::new(import_repo.clone(), config.clone(), gateway.clone()),
            matching: MatchingEngine::new(import_repo.clone(), catalog_repo.clone(), config.clone()),
            enricher: AiEnricher::new(import_repo.clone(), gateway),
            publisher: PublishReconciler::new(
                import_repo.clone(),
                catalog_repo.clone(),
                offer_repo.clone(),
            ),
            import_repo,
            catalog_repo,
            offer_repo,
            config,
        })
    }

    pub fn config(&self) -> &NormalizationConfig {
        &self.config
    }

    // ==========================================
    // 主数据
    // ==========================================

    pub fn register_supplier(
        &self,
        supplier_id: &str,
        name: &str,
        tier: SupplierTier,
    ) -> ApiResult<Supplier> {
        if supplier_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("supplier_id 不能为空".to_string()));
        }
        let supplier = Supplier {
            supplier_id: supplier_id.trim().to_string(),
            name: name.trim().to_string(),
            tier,
            is_active: true,
            created_at: Utc::now(),
        };
        self.import_repo.upsert_supplier(&supplier)?;
        Ok(supplier)
    }

    pub fn register_sku(&self, sku: &NormalizedSku) -> ApiResult<()> {
        if sku.product_type.trim().is_empty() {
            return Err(ApiError::InvalidInput("product_type 不能为空".to_string()));
        }
        self.catalog_repo.insert_sku(sku)?;
        Ok(())
    }

    // ==========================================
    // 导入
    // ==========================================

    /// 按文件扩展名识别格式并导入
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn import_file(&self, supplier_id: &str, path: &Path) -> ApiResult<ImportReport> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let source_type = SourceType::from_extension(ext)
            .ok_or_else(|| ApiError::UnsupportedFormat(ext.to_string()))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::InvalidInput(format!("无法读取文件 {}: {}", path.display(), e)))?;
        let file_name = path.file_name().and_then(|n| n.to_str());
        self.import_bytes(supplier_id, source_type, file_name, &bytes).await
    }

    /// 已在内存中的文件内容（聊天机器人 / HTTP 上传）
    pub async fn import_bytes(
        &self,
        supplier_id: &str,
        source_type: SourceType,
        file_name: Option<&str>,
        bytes: &[u8],
    ) -> ApiResult<ImportReport> {
        Ok(self
            .importer
            .import_file(supplier_id, source_type, file_name, bytes)
            .await?)
    }

    // ==========================================
    // 匹配与人工决策
    // ==========================================

    pub fn propose_mappings(&self, supplier_id: &str) -> ApiResult<ProposeReport> {
        Ok(self.matching.propose_mappings(supplier_id)?)
    }

    pub fn confirm_mapping(&self, mapping_id: &str) -> ApiResult<ConfirmReport> {
        Ok(self.matching.confirm_mapping(mapping_id)?)
    }

    pub fn reject_mapping(&self, mapping_id: &str) -> ApiResult<()> {
        Ok(self.matching.reject_mapping(mapping_id)?)
    }

    pub fn list_open_tasks(&self) -> ApiResult<Vec<NormalizationTask>> {
        Ok(self.catalog_repo.list_open_tasks()?)
    }

    // ==========================================
    // AI 补全
    // ==========================================

    /// 限流与供应方失败以 EnrichmentOutcome 返回，不作为错误
    pub async fn enrich_supplier(&self, supplier_id: &str) -> ApiResult<EnrichmentOutcome> {
        if self.import_repo.find_supplier(supplier_id)?.is_none() {
            return Err(ApiError::NotFound(format!("Supplier(id={})不存在", supplier_id)));
        }
        Ok(self.enricher.enrich_supplier(supplier_id).await?)
    }

    // ==========================================
    // 发布
    // ==========================================

    pub fn publish_supplier(&self, supplier_id: &str) -> ApiResult<PublishReport> {
        Ok(self.publisher.publish_supplier(supplier_id)?)
    }

    pub fn list_active_offers(&self, supplier_id: &str) -> ApiResult<Vec<Offer>> {
        Ok(self.offer_repo.list_active_offers(supplier_id)?)
    }
}
