// ==========================================
// 价目表归一化管道 - 属性提取器
// ==========================================
// 纯函数: 价格 / 长度 / 装箱数 / 产地
// 约定: 未命中返回 None，不抛错；价格错误以 PriceParse.error 表达
// ==========================================

use crate::config::{DictionaryRule, ExtractorLimits};
use crate::domain::types::PriceType;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

pub const ERR_EMPTY_PRICE: &str = "Empty price";
pub const ERR_INVALID_PRICE: &str = "Invalid price";
pub const ERR_NEGATIVE_PRICE: &str = "Negative price";
pub const ERR_RANGE_INVERTED: &str = "price_min > price_max";

// 货币标记，长者在前
const CURRENCY_MARKERS: &[&str] = &["руб.", "руб", "р.", "rub", "usd", "eur", "₽", "$", "€"];

static PRICE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:[.,]\d+)?)[-–—](\d+(?:[.,]\d+)?)$").unwrap());

static LENGTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^\d])(\d{2,3})\s*(?:см|cm)(?:\s*\(\d+\))?").unwrap());

static PACK_PAREN_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)\)\s*$").unwrap());
static PACK_PAREN_PCS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\((\d+)\s*шт\.?\)").unwrap());
static PACK_BARE_PCS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*шт").unwrap());

static PARENTHESIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]*)\)").unwrap());

// ==========================================
// 价格
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceParse {
    pub price_type: PriceType,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub error: Option<String>,
}

impl PriceParse {
    fn fixed(value: Decimal) -> Self {
        Self {
            price_type: PriceType::Fixed,
            price_min: Some(value),
            price_max: Some(value),
            error: None,
        }
    }

    fn failed(price_type: PriceType, error: &str) -> Self {
        Self {
            price_type,
            price_min: None,
            price_max: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    // "1,234.50" → 千分位逗号；否则逗号视为小数点
    let normalized = if raw.contains(',') && raw.contains('.') {
        raw.replace(',', "")
    } else {
        raw.replace(',', ".")
    };
    Decimal::from_str(&normalized).ok()
}

/// 解析价格文本
///
/// - 去除货币标记与空白（含不换行空格）
/// - `min [-–—] max` 识别为区间；min > max 报错而非交换
/// - 固定价 < 0 报错
pub fn parse_price(text: &str) -> PriceParse {
    let mut s = text.trim().to_lowercase();
    if s.is_empty() {
        return PriceParse::failed(PriceType::Fixed, ERR_EMPTY_PRICE);
    }
    for marker in CURRENCY_MARKERS {
        s = s.replace(marker, "");
    }
    s.retain(|c| !c.is_whitespace() && c != '\u{00A0}' && c != '\u{202F}');
    if s.is_empty() {
        return PriceParse::failed(PriceType::Fixed, ERR_EMPTY_PRICE);
    }

    if let Some(caps) = PRICE_RANGE_RE.captures(&s) {
        let (min, max) = match (parse_decimal(&caps[1]), parse_decimal(&caps[2])) {
            (Some(min), Some(max)) => (min, max),
            _ => return PriceParse::failed(PriceType::Range, ERR_INVALID_PRICE),
        };
        if min > max {
            return PriceParse::failed(PriceType::Range, ERR_RANGE_INVERTED);
        }
        if min == max {
            return PriceParse::fixed(min);
        }
        return PriceParse {
            price_type: PriceType::Range,
            price_min: Some(min),
            price_max: Some(max),
            error: None,
        };
    }

    match parse_decimal(&s) {
        Some(value) if value.is_sign_negative() && !value.is_zero() => {
            PriceParse::failed(PriceType::Fixed, ERR_NEGATIVE_PRICE)
        }
        Some(value) => PriceParse::fixed(value),
        None => PriceParse::failed(PriceType::Fixed, ERR_INVALID_PRICE),
    }
}

// ==========================================
// 长度（厘米）
// ==========================================

/// 只取第一个命中；越界视为误匹配，不再继续查找
pub fn extract_length_cm(text: &str, limits: &ExtractorLimits) -> Option<u32> {
    let caps = LENGTH_RE.captures(text)?;
    let value: u32 = caps[1].parse().ok()?;
    (limits.length_min_cm..=limits.length_max_cm)
        .contains(&value)
        .then_some(value)
}

// ==========================================
// 装箱数
// ==========================================

/// 优先级: 末尾 `(N)` → `(N шт)` → `N шт`；取第一个在范围内的命中
pub fn extract_pack_qty(text: &str, limits: &ExtractorLimits) -> Option<u32> {
    let range = limits.pack_min..=limits.pack_max;
    [&*PACK_PAREN_END_RE, &*PACK_PAREN_PCS_RE, &*PACK_BARE_PCS_RE]
        .iter()
        .filter_map(|re| re.captures(text))
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .find(|qty| range.contains(qty))
}

/// 单元格中的纯数字装箱数（"10"、"10 шт"）
pub fn parse_pack_cell(text: &str, limits: &ExtractorLimits) -> Option<u32> {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    let value: u32 = digits.parse().ok()?;
    (limits.pack_min..=limits.pack_max).contains(&value).then_some(value)
}

/// 单元格中的纯数字长度（"60"、"60 см"）
pub fn parse_length_cell(text: &str, limits: &ExtractorLimits) -> Option<u32> {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    let value: u32 = digits.parse().ok()?;
    (limits.length_min_cm..=limits.length_max_cm)
        .contains(&value)
        .then_some(value)
}

// ==========================================
// 产地
// ==========================================

fn match_rules<'r>(text: &str, rules: &'r [DictionaryRule]) -> Option<&'r DictionaryRule> {
    rules.iter().find(|rule| rule.needles().any(|n| !n.is_empty() && text.contains(n.as_str())))
}

/// 括号内容优先（含国家代码整词），其次全文子串；返回规范国家名
pub fn extract_origin_country(
    text: &str,
    countries: &[DictionaryRule],
    country_codes: &[DictionaryRule],
) -> Option<String> {
    for caps in PARENTHESIZED_RE.captures_iter(text) {
        let inner = caps[1].trim().to_lowercase();
        if inner.is_empty() {
            continue;
        }
        if let Some(rule) = match_rules(&inner, countries) {
            return Some(rule.value.clone());
        }
        if let Some(rule) = country_codes.iter().find(|r| r.needles().any(|n| n == inner)) {
            return Some(rule.value.clone());
        }
    }

    let lower = text.to_lowercase();
    match_rules(&lower, countries).map(|rule| rule.value.clone())
}
