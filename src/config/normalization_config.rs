// ==========================================
// 价目表归一化管道 - 归一化配置
// ==========================================
// 职责: 字典 / 阈值 / 权重的显式配置值
// 红线: 无进程级可变状态，构造时注入各组件
// ==========================================

use serde::{Deserialize, Serialize};

/// 字典规则：规范值 + 同义词（小写匹配）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryRule {
    pub value: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl DictionaryRule {
    pub fn new(value: &str, synonyms: &[&str]) -> Self {
        Self {
            value: value.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 规范值与同义词的小写形式
    pub fn needles(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.value.to_lowercase())
            .chain(self.synonyms.iter().map(|s| s.to_lowercase()))
    }
}

/// 亚型规则：按顺序匹配的正则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtypeRule {
    pub value: String,
    pub pattern: String,
}

/// 列映射关键词（包含匹配，小写）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnKeywords {
    pub name: Vec<String>,
    pub price: Vec<String>,
    pub pack_qty: Vec<String>,
    pub length: Vec<String>,
    pub country: Vec<String>,
    pub group: Vec<String>,
    pub color: Vec<String>,
}

/// 匹配置信度权重（千分点）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub base: i32,
    pub product_type_match: i32,
    pub variety_exact: i32,
    pub variety_high: i32,
    pub variety_low: i32,
    pub subtype_match: i32,
    pub country_match: i32,
    pub mix_penalty: i32,
    pub few_tokens_penalty: i32,
    pub conflict_penalty: i32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            base: 100,
            product_type_match: 300,
            variety_exact: 450,
            variety_high: 300,
            variety_low: 100,
            subtype_match: 50,
            country_match: 50,
            mix_penalty: -250,
            few_tokens_penalty: -100,
            conflict_penalty: -200,
        }
    }
}

/// 匹配与任务策略阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingThresholds {
    pub proposal_min_points: u16,   // 提议下限（严格大于）
    pub task_below_points: u16,     // 低于该值开任务
    pub ambiguity_gap_points: u16,  // 前两名差值小于该值视为歧义
    pub max_proposals: usize,
    pub max_type_candidates: usize,
    pub high_similarity: f64,       // token 重叠率
    pub low_similarity: f64,
    pub min_tokens: usize,
    pub task_priority_base: i32,
    pub task_priority_per_candidate: i32,
    pub task_priority_key_supplier: i32,
}

impl Default for MatchingThresholds {
    fn default() -> Self {
        Self {
            proposal_min_points: 100,
            task_below_points: 700,
            ambiguity_gap_points: 50,
            max_proposals: 5,
            max_type_candidates: 10,
            high_similarity: 0.70,
            low_similarity: 0.40,
            min_tokens: 3,
            task_priority_base: 100,
            task_priority_per_candidate: 2,
            task_priority_key_supplier: 50,
        }
    }
}

/// 提取器取值范围
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorLimits {
    pub length_min_cm: u32,
    pub length_max_cm: u32,
    pub pack_min: u32,
    pub pack_max: u32,
    pub header_scan_rows: usize,
    pub delimiter_sniff_bytes: usize,
    pub bundle_min_spans: usize,
}

impl Default for ExtractorLimits {
    fn default() -> Self {
        Self {
            length_min_cm: 30,
            length_max_cm: 150,
            pack_min: 5,
            pack_max: 50,
            header_scan_rows: 20,
            delimiter_sniff_bytes: 1024,
            bundle_min_spans: 4,
        }
    }
}

/// AI 辅助设置（置信度为千分点）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSettings {
    pub batch_max_rows: usize,
    pub supplier_daily_cap: u32,
    pub global_daily_cap: u32,
    pub auto_apply_points: u16,
    pub apply_mark_points: u16,
    pub column_mapping_min_points: u16,
    pub column_mapping_sample_rows: usize,
    pub timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            batch_max_rows: 50,
            supplier_daily_cap: 20,
            global_daily_cap: 200,
            auto_apply_points: 900,
            apply_mark_points: 700,
            column_mapping_min_points: 600,
            column_mapping_sample_rows: 5,
            timeout_secs: 60,
        }
    }
}

// ==========================================
// NormalizationConfig - 管道总配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub parser_version: String,
    pub header_keywords: Vec<String>,
    pub columns: ColumnKeywords,
    pub flower_types: Vec<DictionaryRule>,
    pub subtypes: Vec<SubtypeRule>,
    pub countries: Vec<DictionaryRule>,
    pub country_codes: Vec<DictionaryRule>, // 仅整词匹配的短代码
    pub colors: Vec<DictionaryRule>,
    pub variety_aliases: Vec<DictionaryRule>,
    pub stopwords: Vec<String>,
    pub promo_tokens: Vec<String>,
    pub mix_keywords: Vec<String>,
    pub weights: ConfidenceWeights,
    pub thresholds: MatchingThresholds,
    pub limits: ExtractorLimits,
    pub ai: AiSettings,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            parser_version: "price-ingest/1".to_string(),
            header_keywords: strings(&[
                "наименование", "название", "товар", "номенклатура", "name", "product",
                "цена", "стоимость", "price", "кол-во", "количество", "упаковка", "qty",
                "quantity", "pack", "длина", "ростовка", "length", "страна", "country",
                "группа", "group", "сорт", "variety", "цвет", "color",
            ]),
            columns: ColumnKeywords {
                name: strings(&["наименование", "название", "товар", "номенклатура", "name", "product", "description", "сорт"]),
                price: strings(&["цена", "стоимость", "price", "cost", "руб"]),
                pack_qty: strings(&["упаковк", "в упак", "кол-во", "количество", "кратность", "pack", "qty", "quantity"]),
                length: strings(&["длина", "ростовка", "length", "height"]),
                country: strings(&["страна", "происхожд", "country", "origin"]),
                group: strings(&["группа", "категория", "раздел", "group", "category"]),
                color: strings(&["цвет", "color", "colour"]),
            },
            flower_types: vec![
                DictionaryRule::new("Роза", &["роза", "розы", "rose", "roses"]),
                DictionaryRule::new("Хризантема", &["хризантема", "хризантемы", "chrysanthemum"]),
                DictionaryRule::new("Гвоздика", &["гвоздика", "гвоздики", "carnation", "dianthus"]),
                DictionaryRule::new("Тюльпан", &["тюльпан", "тюльпаны", "tulip", "tulips"]),
                DictionaryRule::new("Лилия", &["лилия", "лилии", "lily", "lilium"]),
                DictionaryRule::new("Гортензия", &["гортензия", "гортензии", "hydrangea"]),
                DictionaryRule::new("Альстромерия", &["альстромерия", "alstroemeria"]),
                DictionaryRule::new("Эустома", &["эустома", "лизиантус", "eustoma", "lisianthus"]),
                DictionaryRule::new("Гербера", &["гербера", "герберы", "gerbera"]),
                DictionaryRule::new("Пион", &["пион", "пионы", "peony", "paeonia"]),
                DictionaryRule::new("Магнолия", &["магнолия", "magnolia"]),
                DictionaryRule::new("Гипсофила", &["гипсофила", "gypsophila"]),
            ],
            subtypes: vec![
                SubtypeRule {
                    value: "Кустовая".to_string(),
                    pattern: r"(?i)\b(кустов\w*|spray)\b".to_string(),
                },
                SubtypeRule {
                    value: "Пионовидная".to_string(),
                    pattern: r"(?i)\b(пионовидн\w*|garden)\b".to_string(),
                },
                SubtypeRule {
                    value: "Одноголовая".to_string(),
                    pattern: r"(?i)\b(одноголов\w*|standard)\b".to_string(),
                },
            ],
            countries: vec![
                DictionaryRule::new("Эквадор", &["эквадор", "ecuador"]),
                DictionaryRule::new("Колумбия", &["колумбия", "colombia"]),
                DictionaryRule::new("Кения", &["кения", "kenya"]),
                DictionaryRule::new("Нидерланды", &["нидерланды", "голландия", "holland", "netherlands"]),
                DictionaryRule::new("Израиль", &["израиль", "israel"]),
                DictionaryRule::new("Эфиопия", &["эфиопия", "ethiopia"]),
                DictionaryRule::new("Италия", &["италия", "italy"]),
                DictionaryRule::new("Россия", &["россия", "russia"]),
            ],
            country_codes: vec![
                DictionaryRule::new("Эквадор", &["ec", "ecu"]),
                DictionaryRule::new("Колумбия", &["col", "co"]),
                DictionaryRule::new("Кения", &["ke", "ken"]),
                DictionaryRule::new("Нидерланды", &["nl", "hol"]),
                DictionaryRule::new("Израиль", &["il", "isr"]),
                DictionaryRule::new("Россия", &["рф", "ru"]),
            ],
            colors: vec![
                DictionaryRule::new("красный", &["красн", "red"]),
                DictionaryRule::new("белый", &["бел", "white"]),
                DictionaryRule::new("розовый", &["розов", "pink"]),
                DictionaryRule::new("жёлтый", &["желт", "жёлт", "yellow"]),
                DictionaryRule::new("оранжевый", &["оранж", "orange"]),
                DictionaryRule::new("фиолетовый", &["фиолет", "purple", "violet"]),
                DictionaryRule::new("кремовый", &["кремов", "cream"]),
                DictionaryRule::new("бордовый", &["бордов", "burgundy"]),
            ],
            variety_aliases: vec![
                DictionaryRule::new("Freedom", &["фридом"]),
                DictionaryRule::new("Explorer", &["эксплорер"]),
                DictionaryRule::new("Mondial", &["мондиаль"]),
            ],
            stopwords: strings(&[
                "шт", "см", "cm", "pcs", "и", "в", "с", "для", "на", "по", "the", "of", "and",
            ]),
            promo_tokens: strings(&[
                "new", "новинка", "хит", "hit", "sale", "акция", "скидка", "распродажа",
            ]),
            mix_keywords: strings(&["микс", "mix", "ассорти", "assorted"]),
            weights: ConfidenceWeights::default(),
            thresholds: MatchingThresholds::default(),
            limits: ExtractorLimits::default(),
            ai: AiSettings::default(),
        }
    }
}

impl NormalizationConfig {
    /// 从 JSON 加载（缺失字段不允许，完整配置）
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// 按规范值查找花型
    pub fn flower_type(&self, value: &str) -> Option<&DictionaryRule> {
        let value = value.to_lowercase();
        self.flower_types
            .iter()
            .find(|r| r.value.to_lowercase() == value)
    }

    /// 品种别名 → 规范品种；未登记时原样返回
    pub fn canonical_variety(&self, variety: &str) -> String {
        let lowered = variety.trim().to_lowercase();
        self.variety_aliases
            .iter()
            .find(|r| r.needles().any(|n| n == lowered))
            .map(|r| r.value.clone())
            .unwrap_or_else(|| variety.trim().to_string())
    }

    /// 插入或替换同名规则（用于字典表覆写）
    pub fn upsert_rule(rules: &mut Vec<DictionaryRule>, rule: DictionaryRule) {
        match rules
            .iter_mut()
            .find(|r| r.value.to_lowercase() == rule.value.to_lowercase())
        {
            Some(existing) => {
                for s in rule.synonyms {
                    if !existing.synonyms.iter().any(|e| e.eq_ignore_ascii_case(&s)) {
                        existing.synonyms.push(s);
                    }
                }
            }
            None => rules.push(rule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrips_through_json() {
        let config = NormalizationConfig::default();
        let raw = serde_json::to_string(&config).unwrap();
        let back = NormalizationConfig::from_json(&raw).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_upsert_rule_merges_synonyms() {
        let mut rules = vec![DictionaryRule::new("Роза", &["роза"])];
        NormalizationConfig::upsert_rule(&mut rules, DictionaryRule::new("роза", &["rosa", "роза"]));
        NormalizationConfig::upsert_rule(&mut rules, DictionaryRule::new("Астра", &[]));

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].synonyms, vec!["роза".to_string(), "rosa".to_string()]);
    }
}
