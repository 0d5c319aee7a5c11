// ==========================================
// 价目表归一化管道 - 导入模块错误类型
// ==========================================
// 批次级: ImportError（终止批次，批次置 failed）
// 行级:   RowError（记录 ParseEvent，跳过该行，批次继续）
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型（批次级）
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件格式不支持: {0}（仅支持 .csv/.xlsx/.pdf）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文件解码失败: {0}")]
    Decode(String),

    #[error("Excel 解析失败: {0}")]
    Excel(String),

    #[error("CSV 解析失败: {0}")]
    Csv(String),

    #[error("PDF 文本提取失败: {0}")]
    Pdf(String),

    // ===== 结构错误 =====
    #[error("未提取到任何表格数据: {0}")]
    NoTableData(String),

    #[error("矩阵格式价目表不受支持: 检测到 {columns} 个尺寸列")]
    MatrixFormat { columns: usize },

    // ===== 状态错误 =====
    #[error("供应商不存在: {0}")]
    SupplierNotFound(String),

    // ===== 数据库错误 =====
    #[error("仓储错误: {0}")]
    Repository(#[from] RepositoryError),

    // ===== 通用错误 =====
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Csv(err.to_string())
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::Excel(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

// ==========================================
// RowError - 行级错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("名称列未映射或为空")]
    MissingName,

    #[error("价格列未映射或为空")]
    MissingPrice,

    #[error("价格无效: {0}")]
    InvalidPrice(String),

    #[error("清洗后名称为空: {0}")]
    EmptyAfterSanitize(String),
}

impl RowError {
    /// ParseEvent.code
    pub fn code(&self) -> &'static str {
        match self {
            RowError::MissingName => "missing_name",
            RowError::MissingPrice => "missing_price",
            RowError::InvalidPrice(_) => "invalid_price",
            RowError::EmptyAfterSanitize(_) => "empty_name",
        }
    }
}
