// ==========================================
// 价目表归一化管道 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod ai_run_repo;
pub mod catalog_repo;
pub mod error;
pub mod import_repo;
pub mod offer_repo;
pub(crate) mod sql_support;

// 重导出核心仓储
pub use ai_run_repo::{AiRunRepository, SqliteAiRunRepository};
pub use catalog_repo::{CatalogRepository, SqliteCatalogRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use import_repo::{ImportRepository, SqliteImportRepository};
pub use offer_repo::{OfferRepository, SqliteOfferRepository};
