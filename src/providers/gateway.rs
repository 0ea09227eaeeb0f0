use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::{GatewayConfig, Limits};
use crate::domains::chat::Message;
use crate::error::{ChatErrorKind, Result, WaBotError};
use crate::models::ModelEntry;
use crate::providers::ChatProvider;

/// Client for the unified chat-completion gateway. Messages pass through
/// in the generic shape; only auth and model naming are gateway-specific.
#[derive(Clone)]
pub struct GatewayProvider {
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl GatewayProvider {
    pub fn new(config: &GatewayConfig, limits: &Limits) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: limits.max_tokens,
            client,
        }
    }

    fn extract_text(body: &Value) -> Result<String> {
        body.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                WaBotError::chat(
                    ChatErrorKind::InvalidResponseShape,
                    "gateway response has no message content",
                )
            })
    }
}

#[async_trait]
impl ChatProvider for GatewayProvider {
    async fn chat(&self, messages: &[Message], entry: &ModelEntry) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            WaBotError::Config("gateway api key not configured".to_string())
        })?;
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = json!({
            "model": entry.wire_model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": 0.7
        });

        let mut response = None;
        for attempt in 0..2u32 {
            match self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(ok) => {
                    response = Some(ok);
                    break;
                }
                Err(err) if attempt == 0 => {
                    warn!(error = %err, "gateway transport error, retrying");
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                Err(err) => {
                    return Err(WaBotError::chat(
                        ChatErrorKind::Upstream,
                        format!("gateway transport failed: {err}"),
                    ));
                }
            }
        }
        let response = response.ok_or_else(|| {
            WaBotError::chat(ChatErrorKind::Upstream, "gateway transport failed")
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            WaBotError::chat(ChatErrorKind::Upstream, format!("gateway read failed: {e}"))
        })?;

        if !status.is_success() {
            let kind = if status.as_u16() == 429 {
                ChatErrorKind::RateLimited
            } else {
                ChatErrorKind::Upstream
            };
            return Err(WaBotError::chat(kind, format!("gateway {status}: {body}")));
        }

        let body: Value = serde_json::from_str(&body).map_err(|e| {
            WaBotError::chat(
                ChatErrorKind::InvalidResponseShape,
                format!("gateway decode failed: {e}"),
            )
        })?;
        Self::extract_text(&body)
    }
}
