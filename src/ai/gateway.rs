// ==========================================
// 价目表归一化管道 - AI 调用网关
// ==========================================
// 职责: 限流检查 → 记录 ai_run → 带超时调用供应方 → 结束 ai_run
// 限流: 供应商 / 全局每日上限，统计当日 00:00 UTC 起的非 failed 运行
// 说明: 先查后写存在竞态，超出少量调用可接受
// ==========================================

use crate::ai::provider::{AiProvider, AiProviderError};
use crate::config::AiSettings;
use crate::domain::ai::AiRun;
use crate::domain::types::{AiRunKind, AiRunStatus};
use crate::repository::{AiRunRepository, RepositoryError};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Supplier,
    Global,
}

#[derive(Error, Debug)]
pub enum AiCallError {
    #[error("AI 每日调用上限已满: {0:?}")]
    RateLimited(RateLimitScope),

    #[error("AI 运行 {run_id} 失败: {source}")]
    Provider {
        run_id: String,
        #[source]
        source: AiProviderError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// 成功调用的结果
#[derive(Debug, Clone)]
pub struct AiCall {
    pub run_id: String,
    pub json: Value,
}

/// 有序输入的 sha256（顺序敏感）
pub fn input_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join("\n");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

pub struct AiGateway {
    provider: Arc<dyn AiProvider>,
    runs: Arc<dyn AiRunRepository>,
    settings: AiSettings,
}

impl AiGateway {
    pub fn new(provider: Arc<dyn AiProvider>, runs: Arc<dyn AiRunRepository>, settings: AiSettings) -> Self {
        Self {
            provider,
            runs,
            settings,
        }
    }

    pub fn runs(&self) -> &dyn AiRunRepository {
        self.runs.as_ref()
    }

    pub fn settings(&self) -> &AiSettings {
        &self.settings
    }

    /// 返回命中的限流范围；None 表示可以调用
    pub fn check_rate_limit(
        &self,
        supplier_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitScope>, RepositoryError> {
        let since = start_of_day(now);
        let supplier_runs = self.runs.count_runs_since(Some(supplier_id), since)?;
        if supplier_runs >= self.settings.supplier_daily_cap {
            return Ok(Some(RateLimitScope::Supplier));
        }
        let global_runs = self.runs.count_runs_since(None, since)?;
        if global_runs >= self.settings.global_daily_cap {
            return Ok(Some(RateLimitScope::Global));
        }
        Ok(None)
    }

    /// 限流 → 建 run → 调用 → 结束 run
    pub async fn invoke(
        &self,
        kind: AiRunKind,
        supplier_id: &str,
        input_hash: &str,
        system: &str,
        user: &str,
    ) -> Result<AiCall, AiCallError> {
        let now = Utc::now();
        if let Some(scope) = self.check_rate_limit(supplier_id, now)? {
            warn!(supplier_id, kind = kind.to_db_str(), ?scope, "AI 调用被限流");
            return Err(AiCallError::RateLimited(scope));
        }

        let run = AiRun {
            run_id: Uuid::new_v4().to_string(),
            supplier_id: supplier_id.to_string(),
            kind,
            input_hash: input_hash.to_string(),
            status: AiRunStatus::Running,
            input_tokens: 0,
            output_tokens: 0,
            error: None,
            created_at: now,
        };
        self.runs.create_run(&run)?;

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let result = match tokio::time::timeout(timeout, self.provider.complete_json(system, user)).await {
            Ok(result) => result,
            Err(_) => Err(AiProviderError::Timeout(self.settings.timeout_secs)),
        };

        match result {
            Ok(response) => {
                self.runs.finish_run(
                    &run.run_id,
                    AiRunStatus::Succeeded,
                    response.input_tokens,
                    response.output_tokens,
                    None,
                )?;
                info!(
                    run_id = %run.run_id,
                    kind = kind.to_db_str(),
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    "AI 运行完成"
                );
                Ok(AiCall {
                    run_id: run.run_id,
                    json: response.json,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.runs
                    .finish_run(&run.run_id, AiRunStatus::Failed, 0, 0, Some(&message))?;
                warn!(run_id = %run.run_id, kind = kind.to_db_str(), error = %message, "AI 运行失败");
                Err(AiCallError::Provider {
                    run_id: run.run_id,
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_hash_is_order_sensitive() {
        let a = input_hash(&["Роза Explorer", "Гвоздика Baltico"]);
        let b = input_hash(&["Гвоздика Baltico", "Роза Explorer"]);
        assert_ne!(a, b);
        assert_eq!(a, input_hash(&["Роза Explorer".to_string(), "Гвоздика Baltico".to_string()]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_start_of_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 8, 17, 45, 12).unwrap();
        assert_eq!(start_of_day(now), Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap());
    }
}
