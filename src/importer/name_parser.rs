// ==========================================
// 价目表归一化管道 - 名称结构解析
// ==========================================
// 输入: 清洗后的名称
// 输出: ParsedName {花型, 亚型, 品种, 农场, 颜色, 拼单列表}
// 红线: 拼单行（≥N 个逗号分隔的大写开头片段）不产出单一品种
// ==========================================

use crate::config::{DictionaryRule, NormalizationConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

static PARENTHESIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()]*\)").unwrap());
static MEASURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s*(?:см|cm|шт|pcs)\.?").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedName {
    pub flower_type: Option<String>,
    pub subtype: Option<String>,
    pub variety: Option<String>,
    pub farm: Option<String>,
    pub colors: Vec<String>,
    pub is_bundle_list: bool,
    pub bundle_varieties: Vec<String>,
}

fn bare(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

fn is_capitalized(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_uppercase())
}

fn is_all_caps(token: &str) -> bool {
    let letters: Vec<char> = token.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 2 && letters.iter().all(|c| c.is_uppercase())
}

fn is_cyrillic(token: &str) -> bool {
    token.chars().any(|c| matches!(c, '\u{0400}'..='\u{04FF}'))
}

fn title_case(token: &str) -> String {
    // 混合大小写（"McLaren"）保持原样
    let inner_upper = token.chars().skip(1).any(|c| c.is_uppercase());
    if inner_upper && token.chars().any(|c| c.is_lowercase()) {
        return token.to_string();
    }
    let lower = token.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn rule_hit(token_lower: &str, rules: &[DictionaryRule]) -> bool {
    rules.iter().any(|r| r.needles().any(|n| n == token_lower))
}

pub struct NameParser<'a> {
    config: &'a NormalizationConfig,
    subtypes: Vec<(String, Regex)>,
}

impl<'a> NameParser<'a> {
    pub fn new(config: &'a NormalizationConfig) -> Self {
        let subtypes = config
            .subtypes
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(re) => Some((rule.value.clone(), re)),
                Err(e) => {
                    warn!(subtype = %rule.value, error = %e, "亚型正则无效，已跳过");
                    None
                }
            })
            .collect();
        Self { config, subtypes }
    }

    pub fn parse(&self, clean: &str) -> ParsedName {
        let mut parsed = ParsedName {
            flower_type: self.detect_flower_type(clean),
            subtype: self
                .subtypes
                .iter()
                .find(|(_, re)| re.is_match(clean))
                .map(|(value, _)| value.clone()),
            colors: self.detect_colors(clean),
            ..Default::default()
        };

        let spans: Vec<&str> = clean.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let capitalized_spans = spans.iter().filter(|s| is_capitalized(s)).count();
        if capitalized_spans >= self.config.limits.bundle_min_spans {
            parsed.is_bundle_list = true;
            parsed.bundle_varieties = spans
                .iter()
                .map(|span| {
                    let tokens = self.residual_tokens(span);
                    self.capitalized_run(&tokens)
                        .unwrap_or_else(|| span.to_string())
                })
                .collect();
            return parsed;
        }

        let segments: Vec<Vec<String>> = clean.split(',').map(|s| self.residual_tokens(s)).collect();
        let all_tokens: Vec<String> = segments.iter().flatten().cloned().collect();

        let farm_len = all_tokens.iter().rev().take_while(|t| is_all_caps(t)).count();
        let has_variety_before = all_tokens[..all_tokens.len() - farm_len]
            .iter()
            .any(|t| is_capitalized(t));
        if farm_len > 0 && has_variety_before {
            parsed.farm = Some(all_tokens[all_tokens.len() - farm_len..].join(" "));
        }

        let mut budget = all_tokens.len() - if parsed.farm.is_some() { farm_len } else { 0 };
        for segment in &segments {
            let usable = segment.len().min(budget);
            budget -= usable;
            if let Some(run) = self.capitalized_run(&segment[..usable]) {
                parsed.variety = Some(self.config.canonical_variety(&run));
                break;
            }
        }

        parsed
    }

    fn detect_flower_type(&self, text: &str) -> Option<String> {
        text.split(|c: char| c.is_whitespace() || c == ',')
            .map(|t| bare(t).to_lowercase())
            .find_map(|token| {
                self.config
                    .flower_types
                    .iter()
                    .find(|r| r.needles().any(|n| n == token))
                    .map(|r| r.value.clone())
            })
    }

    fn detect_colors(&self, text: &str) -> Vec<String> {
        let mut colors: Vec<String> = Vec::new();
        for token in text.split(|c: char| c.is_whitespace() || c == ',') {
            let lower = bare(token).to_lowercase();
            if lower.is_empty() {
                continue;
            }
            let hit = self
                .config
                .colors
                .iter()
                .find(|r| r.needles().any(|n| lower.starts_with(n.as_str())));
            if let Some(rule) = hit {
                if !colors.contains(&rule.value) {
                    colors.push(rule.value.clone());
                }
            }
        }
        colors
    }

    /// 去掉括号、亚型、长度/数量后剩余的候选词
    fn residual_tokens(&self, text: &str) -> Vec<String> {
        let c = self.config;
        let mut text = PARENTHESIZED_RE.replace_all(text, " ").into_owned();
        for (_, re) in &self.subtypes {
            text = re.replace_all(&text, " ").into_owned();
        }
        let text = MEASURE_RE.replace_all(&text, " ");

        text.split_whitespace()
            .map(|t| bare(t).to_string())
            .filter(|t| t.chars().any(|ch| ch.is_alphabetic()))
            .filter(|t| {
                let lower = t.to_lowercase();
                let is_colour = is_cyrillic(t)
                    && c.colors.iter().any(|r| r.needles().any(|n| lower.starts_with(n.as_str())));
                !(rule_hit(&lower, &c.flower_types)
                    || rule_hit(&lower, &c.countries)
                    || rule_hit(&lower, &c.country_codes)
                    || c.stopwords.iter().any(|s| *s == lower)
                    || c.promo_tokens.iter().any(|s| *s == lower)
                    || is_colour)
            })
            .collect()
    }

    /// 第一个连续的大写开头词段，逐词标题化
    fn capitalized_run(&self, tokens: &[String]) -> Option<String> {
        let start = tokens.iter().position(|t| is_capitalized(t))?;
        let run: Vec<String> = tokens[start..]
            .iter()
            .take_while(|t| is_capitalized(t))
            .map(|t| title_case(t))
            .collect();
        Some(run.join(" "))
    }
}
