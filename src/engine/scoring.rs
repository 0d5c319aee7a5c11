// ==========================================
// 价目表归一化管道 - 匹配置信度
// ==========================================
// 千分点计分（权重见 ConfidenceWeights）:
//   base +100, 花型 +300, 品种 exact +450 / high +300 / low +100,
//   亚型 +50, 产地 +50, mix −250, token 过少 −100, 花型冲突 −200
// 结果截断到 [0, 1000]
// ==========================================

use crate::config::ConfidenceWeights;
use crate::domain::confidence::Confidence;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VarietyMatch {
    Exact,
    High,
    Low,
    #[default]
    None,
}

/// 计分输入（全部为布尔 / 分类量，计分是其纯函数）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub product_type_match: bool,
    pub variety_match: VarietyMatch,
    pub subtype_match: bool,
    pub country_match: bool,
    pub has_mix_keyword: bool,
    pub few_tokens: bool,
    pub conflicting_type: bool,
}

pub fn calculate_confidence(inputs: &ScoreInputs, weights: &ConfidenceWeights) -> Confidence {
    let mut points = weights.base;
    if inputs.product_type_match {
        points += weights.product_type_match;
    }
    points += match inputs.variety_match {
        VarietyMatch::Exact => weights.variety_exact,
        VarietyMatch::High => weights.variety_high,
        VarietyMatch::Low => weights.variety_low,
        VarietyMatch::None => 0,
    };
    if inputs.subtype_match {
        points += weights.subtype_match;
    }
    if inputs.country_match {
        points += weights.country_match;
    }
    if inputs.has_mix_keyword {
        points += weights.mix_penalty;
    }
    if inputs.few_tokens {
        points += weights.few_tokens_penalty;
    }
    if inputs.conflicting_type {
        points += weights.conflict_penalty;
    }
    Confidence::from_points(points)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// 品种相似度
///
/// - 忽略大小写相等 → Exact
/// - 互相包含，或 token 重叠率 ≥ high → High
/// - token 重叠率 ≥ low → Low
///
/// 重叠率 = 交集 / 较大集合
pub fn variety_similarity(item_variety: &str, sku_variety: &str, high: f64, low: f64) -> VarietyMatch {
    let a = item_variety.trim().to_lowercase();
    let b = sku_variety.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return VarietyMatch::None;
    }
    if a == b {
        return VarietyMatch::Exact;
    }
    if a.contains(b.as_str()) || b.contains(a.as_str()) {
        return VarietyMatch::High;
    }

    let (wa, wb) = (word_set(&a), word_set(&b));
    let larger = wa.len().max(wb.len());
    if larger == 0 {
        return VarietyMatch::None;
    }
    let overlap = wa.intersection(&wb).count() as f64 / larger as f64;
    if overlap >= high {
        VarietyMatch::High
    } else if overlap >= low {
        VarietyMatch::Low
    } else {
        VarietyMatch::None
    }
}
