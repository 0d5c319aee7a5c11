// ==========================================
// 价目表归一化管道 - API层错误类型
// ==========================================
// 职责: 把导入 / 仓储 / 发布层错误转换为调用方可读的错误
// ==========================================

use crate::engine::PublishError;
use crate::importer::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入 / 前置条件错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("文件格式不支持: {0}")]
    UnsupportedFormat(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 发布前置条件（供应商停用 / 无 parsed 批次）
    #[error("前置条件不满足: {0}")]
    PreconditionFailed(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 导入错误（批次已置 failed）
    // ==========================================
    #[error("文件导入失败: {0}")]
    ImportFailed(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::JsonError(e) => ApiError::InternalError(e.to_string()),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::UnsupportedFormat(ext) => ApiError::UnsupportedFormat(ext),
            ImportError::SupplierNotFound(id) => {
                ApiError::NotFound(format!("Supplier(id={})不存在", id))
            }
            ImportError::Repository(e) => e.into(),
            ImportError::Other(e) => ApiError::Other(e),
            other => ApiError::ImportFailed(other.to_string()),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::PreconditionFailed(msg) => ApiError::PreconditionFailed(msg),
            PublishError::Repository(e) => e.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "SkuMapping".to_string(),
            id: "m-001".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("SkuMapping"));
                assert!(msg.contains("m-001"));
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn test_import_error_conversion() {
        let api_err: ApiError = ImportError::MatrixFormat { columns: 4 }.into();
        match api_err {
            ApiError::ImportFailed(msg) => assert!(msg.contains("4")),
            _ => panic!("Expected ImportFailed"),
        }

        let api_err: ApiError = ImportError::UnsupportedFormat("docx".to_string()).into();
        assert!(matches!(api_err, ApiError::UnsupportedFormat(ext) if ext == "docx"));
    }

    #[test]
    fn test_publish_error_conversion() {
        let api_err: ApiError =
            PublishError::PreconditionFailed("no parsed batch for supplier s1".to_string()).into();
        assert!(matches!(api_err, ApiError::PreconditionFailed(_)));
    }
}
