// ==========================================
// 价目表归一化管道 - 引擎层
// ==========================================
// 职责: 条目 → SKU 匹配、人工决策、发布对账
// 红线: Engine 不拼 SQL, 所有任务必须输出 reason
// ==========================================

pub mod matching;
pub mod publish;
pub mod scoring;
pub mod text_signals;

// 重导出核心引擎
pub use matching::{ConfirmReport, MatchingEngine, MatchingItemError, ProposeReport, ScoredCandidate};
pub use publish::{display_title, PublishError, PublishReconciler, PublishReport, PublishResult};
pub use scoring::{calculate_confidence, variety_similarity, ScoreInputs, VarietyMatch};
pub use text_signals::{detect_product_types, has_mix_keyword, normalize_text, NormalizedText, SubtypeRules};
