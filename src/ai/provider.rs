// ==========================================
// 价目表归一化管道 - AI 供应方
// ==========================================
// 契约: system + user 提示 → JSON 对象 + token 计数
// 红线: 供应方失败只以 AiProviderError 返回，调用方负责降级
// ==========================================

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

pub const ENV_API_KEY: &str = "AI_API_KEY";
pub const ENV_API_BASE: &str = "AI_API_BASE";
pub const ENV_MODEL: &str = "AI_MODEL";

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Error, Debug)]
pub enum AiProviderError {
    #[error("AI 请求失败: {0}")]
    Http(String),

    #[error("AI 返回 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI 响应无法解析: {0}")]
    InvalidResponse(String),

    #[error("AI 调用超时（{0} 秒）")]
    Timeout(u64),
}

impl From<reqwest::Error> for AiProviderError {
    fn from(err: reqwest::Error) -> Self {
        AiProviderError::Http(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiResponse {
    pub json: Value,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete_json(&self, system: &str, user: &str) -> Result<AiResponse, AiProviderError>;
}

/// 宽松解析模型输出：容忍 ```json 代码块包裹
pub fn parse_llm_json(response: &str) -> Result<Value, AiProviderError> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    serde_json::from_str(json_str).map_err(|e| {
        AiProviderError::InvalidResponse(format!(
            "{e}: {}",
            json_str.chars().take(200).collect::<String>()
        ))
    })
}

// ==========================================
// OpenAiCompatibleProvider - chat completions
// ==========================================
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// 从环境变量构造；未设置 AI_API_KEY 时返回 None（视为未配置供应方）
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(ENV_API_KEY).ok().filter(|k| !k.trim().is_empty())?;
        let api_base = std::env::var(ENV_API_BASE).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let model = std::env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self::new(&api_base, &api_key, &model))
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    async fn complete_json(&self, system: &str, user: &str) -> Result<AiResponse, AiProviderError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AiProviderError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AiProviderError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiProviderError::InvalidResponse("响应缺少 content".to_string()))?;
        let usage = parsed.usage.unwrap_or(ChatUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        debug!(
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "AI 响应已接收"
        );

        Ok(AiResponse {
            json: parse_llm_json(&content)?,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}
