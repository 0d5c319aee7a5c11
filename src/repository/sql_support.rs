// ==========================================
// 价目表归一化管道 - 仓储层列解析辅助
// ==========================================
// 职责: 枚举 / JSON / Decimal 列与 rusqlite 之间的转换
// ==========================================

use rust_decimal::Decimal;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use std::str::FromStr;

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// 解析枚举列（未知值视为数据损坏）
pub(crate) fn parse_enum<T>(idx: usize, raw: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| conversion_error(idx, format!("未知枚举值: {}", raw)))
}

/// 解析 JSON 列
pub(crate) fn parse_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, format!("JSON 列解析失败: {}", e)))
}

/// 解析 Decimal 文本列
pub(crate) fn parse_decimal(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Decimal>> {
    match raw {
        None => Ok(None),
        Some(s) => Decimal::from_str(&s)
            .map(Some)
            .map_err(|e| conversion_error(idx, format!("Decimal 列解析失败: {}", e))),
    }
}

/// 可空非负整数列
pub(crate) fn to_u32(raw: Option<i64>) -> Option<u32> {
    raw.and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PriceType;

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_enum(0, "range", PriceType::from_db_str).unwrap(), PriceType::Range);
        assert!(parse_enum(0, "bogus", PriceType::from_db_str).is_err());
        assert_eq!(
            parse_decimal(1, Some("100.50".to_string())).unwrap(),
            Some(Decimal::new(10050, 2))
        );
        assert_eq!(to_u32(Some(-1)), None);
        let v: Vec<String> = parse_json(2, r#"["a","b"]"#).unwrap();
        assert_eq!(v.len(), 2);
    }
}
