// ==========================================
// 价目表归一化管道 - 名称清洗
// ==========================================
// 固定顺序的纯文本流水线（顺序影响结果）:
// 1. 去零宽/格式字符，统一引号
// 2. 去促销标记（前导 * / #，NEW / новинка / хит / sale ...）
// 3. 去行首编号（"1. " "1) " "12: " "3 - "）
// 4. 去括号噪声（价格/数量/促销），保留括号内国家名
// 5. 折叠重复花型词（"Rose Rose Explorer" → "Rose Explorer"）
// 6. 折叠标点（省略号 / 连续 ! / 连续 -），再折叠空白
// ==========================================

use crate::config::{DictionaryRule, NormalizationConfig};
use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_NUMBERING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d{1,3}\s*(?:[.):]|\s-)\s+").unwrap());
static PARENTHESIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]*)\)").unwrap());
static NOISE_HINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d|шт|руб|₽|\$|€|pcs|цена|price").unwrap());
static ELLIPSIS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"…|\.{2,}").unwrap());
static EXCLAMATIONS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!{2,}").unwrap());
static DASHES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const INVISIBLE: &[char] = &[
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];
const DOUBLE_QUOTES: &[char] = &['“', '”', '„', '‟', '«', '»', '″'];
const SINGLE_QUOTES: &[char] = &['‘', '’', '‚', '‛'];

// ==========================================
// 单阶段纯函数
// ==========================================

/// 阶段 1
pub fn strip_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| !INVISIBLE.contains(c))
        .map(|c| {
            if DOUBLE_QUOTES.contains(&c) {
                '"'
            } else if SINGLE_QUOTES.contains(&c) {
                '\''
            } else {
                c
            }
        })
        .collect()
}

fn bare_token(token: &str) -> String {
    token
        .trim_matches(|c: char| matches!(c, '!' | '.' | ',' | ':' | '*' | '#'))
        .to_lowercase()
}

/// 阶段 2
pub fn strip_promo(text: &str, promo_tokens: &[String]) -> String {
    let trimmed = text.trim_start_matches(|c: char| c == '*' || c == '#' || c.is_whitespace());
    trimmed
        .split_whitespace()
        .filter(|token| {
            let bare = bare_token(token);
            bare.is_empty() && !token.chars().any(|c| c == '*' || c == '#')
                || !bare.is_empty() && !promo_tokens.iter().any(|p| *p == bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 阶段 3
pub fn strip_numbering(text: &str) -> String {
    LEADING_NUMBERING_RE.replace(text, "").into_owned()
}

fn is_country(inner: &str, countries: &[DictionaryRule], codes: &[DictionaryRule]) -> bool {
    countries.iter().any(|r| r.needles().any(|n| inner.contains(n.as_str())))
        || codes.iter().any(|r| r.needles().any(|n| n == inner))
}

/// 阶段 4
pub fn strip_parenthetical_noise(
    text: &str,
    promo_tokens: &[String],
    countries: &[DictionaryRule],
    codes: &[DictionaryRule],
) -> String {
    PARENTHESIZED_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let inner = caps[1].trim().to_lowercase();
            if inner.is_empty() {
                return String::new();
            }
            if is_country(&inner, countries, codes) {
                return caps[0].to_string();
            }
            let promo = inner.split_whitespace().any(|t| promo_tokens.iter().any(|p| *p == bare_token(t)));
            if promo || NOISE_HINT_RE.is_match(&inner) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn flower_rule_index(token: &str, flower_types: &[DictionaryRule]) -> Option<usize> {
    let bare = bare_token(token);
    flower_types.iter().position(|r| r.needles().any(|n| n == bare))
}

/// 阶段 5: 相邻两个词指向同一花型时删去后者
pub fn collapse_duplicate_flower_type(text: &str, flower_types: &[DictionaryRule]) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut previous: Option<usize> = None;
    for token in text.split_whitespace() {
        let current = flower_rule_index(token, flower_types);
        if current.is_some() && current == previous {
            continue;
        }
        previous = current;
        kept.push(token);
    }
    kept.join(" ")
}

/// 阶段 6
pub fn collapse_punctuation(text: &str) -> String {
    let text = ELLIPSIS_RE.replace_all(text, ".");
    let text = EXCLAMATIONS_RE.replace_all(&text, "!");
    let text = DASHES_RE.replace_all(&text, "-");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

// ==========================================
// NameSanitizer - 组合流水线
// ==========================================
pub struct NameSanitizer<'a> {
    config: &'a NormalizationConfig,
}

impl<'a> NameSanitizer<'a> {
    pub fn new(config: &'a NormalizationConfig) -> Self {
        Self { config }
    }

    pub fn sanitize(&self, raw: &str) -> String {
        let c = self.config;
        let text = strip_invisible(raw);
        let text = strip_promo(&text, &c.promo_tokens);
        let text = strip_numbering(&text);
        let text = strip_parenthetical_noise(&text, &c.promo_tokens, &c.countries, &c.country_codes);
        let text = collapse_duplicate_flower_type(&text, &c.flower_types);
        collapse_punctuation(&text)
    }
}
