// ==========================================
// 价目表归一化管道 - 匹配文本信号
// ==========================================
// 职责: 名称+分组 → 归一化 token；花型 / 亚型 / mix 关键词检测
// 红线: 纯函数，只读 NormalizationConfig
// ==========================================

use crate::config::NormalizationConfig;
use regex::Regex;

/// 归一化后的匹配文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub tokens: Vec<String>,
}

/// 小写、非字母数字转空格、去停用词
pub fn normalize_text(name: &str, group: Option<&str>, stopwords: &[String]) -> NormalizedText {
    let joined = match group {
        Some(g) if !g.trim().is_empty() => format!("{name} {g}"),
        _ => name.to_string(),
    };
    let cleaned: String = joined
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .filter(|t| !stopwords.iter().any(|s| s == t))
        .map(|t| t.to_string())
        .collect();
    NormalizedText {
        text: tokens.join(" "),
        tokens,
    }
}

/// 按整词匹配；多词同义词按 token 序列匹配
fn contains_phrase(text: &NormalizedText, needle: &str) -> bool {
    let words: Vec<&str> = needle.split_whitespace().collect();
    match words.as_slice() {
        [] => false,
        [word] => text.tokens.iter().any(|t| t == word),
        _ => text
            .tokens
            .windows(words.len())
            .any(|w| w.iter().zip(&words).all(|(t, n)| t == n)),
    }
}

/// 文本中出现的全部花型（按配置顺序，去重）
///
/// 多于一个即为花型冲突信号。
pub fn detect_product_types(text: &NormalizedText, config: &NormalizationConfig) -> Vec<String> {
    config
        .flower_types
        .iter()
        .filter(|rule| rule.needles().any(|n| contains_phrase(text, &n)))
        .map(|rule| rule.value.clone())
        .collect()
}

pub fn has_mix_keyword(text: &NormalizedText, config: &NormalizationConfig) -> bool {
    text.tokens
        .iter()
        .any(|t| config.mix_keywords.iter().any(|k| k == t))
}

/// 预编译的亚型规则（无效正则在构造时丢弃）
pub struct SubtypeRules {
    rules: Vec<(String, Regex)>,
}

impl SubtypeRules {
    pub fn new(config: &NormalizationConfig) -> Self {
        Self {
            rules: config
                .subtypes
                .iter()
                .filter_map(|r| Regex::new(&r.pattern).ok().map(|re| (r.value.clone(), re)))
                .collect(),
        }
    }

    /// 第一个命中的规则
    pub fn detect(&self, text: &str) -> Option<String> {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(value, _)| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_drops_stopwords_and_punctuation() {
        let config = NormalizationConfig::default();
        let text = normalize_text("Роза Explorer, 60 см (10 шт)", Some("Розы"), &config.stopwords);
        assert_eq!(text.tokens, vec!["роза", "explorer", "60", "10", "розы"]);
        assert_eq!(text.text, "роза explorer 60 10 розы");
    }

    #[test]
    fn test_detect_product_types_and_conflict() {
        let config = NormalizationConfig::default();
        let single = normalize_text("Роза Explorer", None, &config.stopwords);
        assert_eq!(detect_product_types(&single, &config), vec!["Роза"]);

        let conflict = normalize_text("Роза + хризантема композиция", None, &config.stopwords);
        assert_eq!(detect_product_types(&conflict, &config).len(), 2);
    }

    #[test]
    fn test_subtype_word_is_not_a_product_type() {
        let config = NormalizationConfig::default();
        let text = normalize_text("Роза пионовидная Juliet 50см", None, &config.stopwords);
        assert_eq!(detect_product_types(&text, &config), vec!["Роза"]);

        let peony = normalize_text("Пион Sarah Bernhardt", None, &config.stopwords);
        assert_eq!(detect_product_types(&peony, &config), vec!["Пион"]);
    }

    #[test]
    fn test_multi_word_synonym() {
        let mut config = NormalizationConfig::default();
        config.flower_types = vec![crate::config::DictionaryRule::new("Душистый горошек", &["sweet pea"])];
        let text = normalize_text("Sweet Pea Mix", None, &config.stopwords);
        assert_eq!(detect_product_types(&text, &config), vec!["Душистый горошек"]);
        let partial = normalize_text("Sweetness", None, &config.stopwords);
        assert!(detect_product_types(&partial, &config).is_empty());
    }

    #[test]
    fn test_mix_and_subtype() {
        let config = NormalizationConfig::default();
        let text = normalize_text("Роза кустовая микс", None, &config.stopwords);
        assert!(has_mix_keyword(&text, &config));
        assert_eq!(SubtypeRules::new(&config).detect(&text.text).as_deref(), Some("Кустовая"));
    }
}
