use rand::Rng;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AiConfig;

const MAX_JITTER_MS: u64 = 2000;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("尚未设置 AI API key（config.toml 的 [ai] api_key 或环境变量 JUNIOR_VOCAB_API_KEY）")]
    MissingApiKey,
    #[error("API key 无效，请检查设置")]
    InvalidApiKey,
    #[error("AI 使用额度已用完，请稍后再试")]
    QuotaExceeded,
    #[error("AI 回应无法解析: {0}")]
    ParseFailed(String),
    #[error("API请求失败 (状态码: {status}): {body}")]
    Http { status: u16, body: String },
    #[error("网络请求失败: {0}")]
    Network(#[from] reqwest::Error),
    #[error("AI 回应为空")]
    EmptyResponse,
}

// OpenRouter API 响应结构
#[derive(Debug, Deserialize)]
pub struct OpenRouterResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OpenRouterRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct RequestMessage {
    pub role: String,
    pub content: MessageContent,
}

impl RequestMessage {
    pub fn user(text: impl Into<String>) -> Self {
        RequestMessage {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// 文字加一张内嵌图片（data URL）
    pub fn user_with_image(text: impl Into<String>, data_url: String) -> Self {
        RequestMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug)]
enum Verdict {
    Retry(AiError),
    Fail(AiError),
}

// 按状态码和错误文字判断：key / 额度问题直接失败，过载才重试
fn classify_failure(status: u16, body: &str) -> Verdict {
    let lower = body.to_lowercase();
    if (status == 400 || status == 401) && lower.contains("api key") {
        return Verdict::Fail(AiError::InvalidApiKey);
    }
    if lower.contains("quota")
        || lower.contains("resource_exhausted")
        || (status == 429 && !lower.contains("rate limit"))
    {
        return Verdict::Fail(AiError::QuotaExceeded);
    }
    let error = AiError::Http {
        status,
        body: body.to_string(),
    };
    if status == 429 || status == 503 || lower.contains("overloaded") {
        Verdict::Retry(error)
    } else {
        Verdict::Fail(error)
    }
}

/// 第 n 次重试（从 1 起）的等待时间：base * 2^(n-1) + jitter
fn backoff_delay(base_delay_ms: u64, retry: u32, jitter_ms: u64) -> Duration {
    let factor = 1u64 << retry.saturating_sub(1).min(16);
    Duration::from_millis(base_delay_ms.saturating_mul(factor) + jitter_ms)
}

pub struct ApiClient {
    client: Client,
    config: AiConfig,
}

impl ApiClient {
    pub fn new(config: &AiConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(ApiClient {
            client,
            config: config.clone(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, AiError> {
        self.config.api_key.as_deref().ok_or(AiError::MissingApiKey)
    }

    // 带重试机制的API请求函数
    pub async fn make_request_with_retry(&self, request: &OpenRouterRequest) -> Result<OpenRouterResponse, AiError> {
        let api_key = self.api_key()?;
        let max_retries = self.config.max_retries;
        let mut retry = 0;

        loop {
            let failure = match self
                .client
                .post(&self.config.endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await?;
                    if status.is_success() {
                        if retry > 0 {
                            tracing::info!(retry, "重试成功");
                        }
                        return serde_json::from_str::<OpenRouterResponse>(&body)
                            .map_err(|e| AiError::ParseFailed(format!("JSON解析失败: {}", e)));
                    }
                    classify_failure(status.as_u16(), &body)
                }
                Err(e) => Verdict::Retry(AiError::Network(e)),
            };

            let error = match failure {
                Verdict::Fail(error) => return Err(error),
                Verdict::Retry(error) if retry >= max_retries => return Err(error),
                Verdict::Retry(error) => error,
            };

            retry += 1;
            let jitter = rand::rng().random_range(0..MAX_JITTER_MS);
            let delay = backoff_delay(self.config.base_delay_ms, retry, jitter);
            tracing::warn!(retry, max_retries, ?delay, error = %error, "AI 服务繁忙，稍后重试");
            sleep(delay).await;
        }
    }

    /// 发出一次对话请求并取回第一条回应的文字
    pub async fn complete(&self, messages: Vec<RequestMessage>, temperature: f32) -> Result<String, AiError> {
        let request = OpenRouterRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: 4000,
            temperature,
        };
        let response = self.make_request_with_retry(&request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}
