use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{GeminiConfig, Limits};
use crate::domains::chat::{Content, Message, Part, Role};
use crate::error::{ChatErrorKind, Result, WaBotError};
use crate::models::ModelEntry;
use crate::providers::kv::KvStore;
use crate::providers::ChatProvider;

static DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:([^;]+);base64,(.+)$").expect("valid data-url pattern"));

/// Client for the direct generative-language API. Generic messages are
/// rewritten into the vendor schema; errors come back classified.
#[derive(Clone)]
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
    kv: Arc<KvStore>,
}

impl GeminiProvider {
    pub fn new(config: &GeminiConfig, limits: &Limits, kv: Arc<KvStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: limits.max_tokens,
            client,
            kv,
        }
    }

    /// System messages have no native slot in this schema; they become a
    /// leading user message tagged as instructions. Assistant turns map to
    /// the `model` role, inline images to `inline_data` blocks.
    fn to_wire_contents(messages: &[Message]) -> Vec<Value> {
        let mut contents = Vec::with_capacity(messages.len());
        for message in messages {
            match (&message.role, &message.content) {
                (Role::System, content) => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{"text": format!("[INSTRUCCIONES] {}", content.log_text())}]
                    }));
                }
                (Role::Assistant, content) => {
                    contents.push(json!({
                        "role": "model",
                        "parts": [{"text": content.log_text()}]
                    }));
                }
                (Role::User, Content::Text(text)) => {
                    contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
                (Role::User, Content::Parts(parts)) => {
                    let wire_parts: Vec<Value> = parts
                        .iter()
                        .filter_map(|part| match part {
                            Part::Text { text } => Some(json!({"text": text})),
                            Part::ImageUrl { image_url } => {
                                let captures = DATA_URL.captures(&image_url.url)?;
                                Some(json!({
                                    "inline_data": {
                                        "mime_type": &captures[1],
                                        "data": &captures[2]
                                    }
                                }))
                            }
                        })
                        .collect();
                    contents.push(json!({"role": "user", "parts": wire_parts}));
                }
            }
        }
        contents
    }

    fn classify_http_error(status: reqwest::StatusCode, body: &str) -> WaBotError {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.to_string());

        let kind = match status.as_u16() {
            404 => ChatErrorKind::ModelNotFound,
            429 => ChatErrorKind::RateLimited,
            400 => {
                let lower = message.to_ascii_lowercase();
                if lower.contains("safety") || lower.contains("blocked") {
                    ChatErrorKind::SafetyBlocked
                } else {
                    ChatErrorKind::MalformedRequest
                }
            }
            _ => ChatErrorKind::Upstream,
        };
        WaBotError::chat(kind, format!("gemini {status}: {message}"))
    }

    fn extract_text(body: &Value) -> Result<String> {
        if let Some(reason) = body
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
        {
            return Err(WaBotError::chat(
                ChatErrorKind::SafetyBlocked,
                format!("prompt blocked: {reason}"),
            ));
        }

        let candidate = body
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| {
                WaBotError::chat(ChatErrorKind::InvalidResponseShape, "no candidates in response")
            })?;

        match candidate.get("finishReason").and_then(|r| r.as_str()) {
            Some("SAFETY") => {
                let categories = candidate
                    .get("safetyRatings")
                    .and_then(|r| r.as_array())
                    .map(|ratings| {
                        ratings
                            .iter()
                            .filter(|rating| {
                                rating.get("probability").and_then(|p| p.as_str()) == Some("HIGH")
                                    || rating.get("blocked").and_then(|b| b.as_bool())
                                        == Some(true)
                            })
                            .filter_map(|rating| rating.get("category").and_then(|c| c.as_str()))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                return Err(WaBotError::chat(
                    ChatErrorKind::SafetyBlocked,
                    format!("response blocked by safety filters: {categories}"),
                ));
            }
            Some("RECITATION") | Some("OTHER") => {
                return Err(WaBotError::chat(
                    ChatErrorKind::Upstream,
                    "generation interrupted before completion",
                ));
            }
            _ => {}
        }

        candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                WaBotError::chat(ChatErrorKind::InvalidResponseShape, "candidate has no text part")
            })
    }

    async fn track_usage(&self) {
        let key = format!("gemini:usage:{}", Utc::now().format("%Y-%m-%d"));
        if let Err(err) = self.kv.incr(&key).await {
            debug!(error = %err, "gemini usage tracking skipped");
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn chat(&self, messages: &[Message], entry: &ModelEntry) -> Result<String> {
        let url = format!(
            "{}/{}/models/{}:generateContent?key={}",
            self.base_url, entry.api_version, entry.wire_model, self.api_key
        );
        let request = json!({
            "contents": Self::to_wire_contents(messages),
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": self.max_tokens,
                "topP": 0.95,
                "topK": 40
            },
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_ONLY_HIGH"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_ONLY_HIGH"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_ONLY_HIGH"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"}
            ]
        });

        // One retry for transport-level failures only; classified HTTP
        // errors surface immediately.
        let mut response = None;
        for attempt in 0..2u32 {
            match self.client.post(&url).json(&request).send().await {
                Ok(ok) => {
                    response = Some(ok);
                    break;
                }
                Err(err) if attempt == 0 => {
                    warn!(error = %err, "gemini transport error, retrying");
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                Err(err) => {
                    return Err(WaBotError::chat(
                        ChatErrorKind::Upstream,
                        format!("gemini transport failed: {err}"),
                    ));
                }
            }
        }
        let response = response.ok_or_else(|| {
            WaBotError::chat(ChatErrorKind::Upstream, "gemini transport failed")
        })?;

        self.track_usage().await;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            WaBotError::chat(ChatErrorKind::Upstream, format!("gemini read failed: {e}"))
        })?;

        if !status.is_success() {
            return Err(Self::classify_http_error(status, &body));
        }

        let body: Value = serde_json::from_str(&body).map_err(|e| {
            WaBotError::chat(
                ChatErrorKind::InvalidResponseShape,
                format!("gemini decode failed: {e}"),
            )
        })?;
        Self::extract_text(&body)
    }
}
