// ==========================================
// 价目表归一化管道 - 配置层
// ==========================================
// 职责: 归一化配置（字典/阈值/权重），支持数据库覆写
// 存储: config_kv 表 + dictionary_entry 表
// ==========================================

pub mod config_manager;
pub mod normalization_config;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use normalization_config::{
    AiSettings, ColumnKeywords, ConfidenceWeights, DictionaryRule, ExtractorLimits,
    MatchingThresholds, NormalizationConfig, SubtypeRule,
};
