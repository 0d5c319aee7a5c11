// ==========================================
// 价目表归一化管道 - 导入层
// ==========================================
// 职责: 供应商价目表 → SupplierItem / OfferCandidate
// 支持: CSV, Excel (.xlsx), PDF
// ==========================================

// 模块声明
pub mod attribute_extractor;
pub mod decoder;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod name_parser;
pub mod name_sanitizer;
pub mod price_list_importer;
pub mod stable_key;

// 重导出核心类型
pub use attribute_extractor::{
    extract_length_cm, extract_origin_country, extract_pack_qty, parse_price, PriceParse,
};
pub use error::{ImportError, ImportResult, RowError};
pub use field_mapper::{ColumnField, ColumnMapper, ColumnMapping, ColumnSuggestion};
pub use file_parser::{CsvParser, Extraction, PdfParser, TabularRow, UniversalFileParser, XlsxParser};
pub use name_parser::{NameParser, ParsedName};
pub use name_sanitizer::NameSanitizer;
pub use price_list_importer::{ImportReport, PriceListImporter};
pub use stable_key::stable_key;
