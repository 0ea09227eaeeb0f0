use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::config::TwilioConfig;
use crate::error::{ChatErrorKind, Result, WaBotError};

/// WhatsApp caps messages at 1600 chars; leave a margin for the part
/// indicator prefix.
const MAX_MESSAGE_LEN: usize = 1500;
const PART_DELAY: Duration = Duration::from_millis(500);

static BOLD_STARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid bold pattern"));
static BOLD_UNDERSCORES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__([^_]+)__").expect("valid bold pattern"));
static STRIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"~~([^~]+)~~").expect("valid strike pattern"));

/// Standard markdown → WhatsApp formatting: single asterisks for bold,
/// single tildes for strikethrough.
pub fn format_for_whatsapp(text: &str) -> String {
    let text = BOLD_STARS.replace_all(text, "*$1*");
    let text = BOLD_UNDERSCORES.replace_all(&text, "*$1*");
    STRIKE.replace_all(&text, "~$1~").into_owned()
}

/// Finds the last occurrence of `pattern` in `window` that leaves at least
/// `min_chars` characters in the head, returning the byte index just past
/// the pattern's first byte (so `. ` keeps the period with the head).
fn find_break(window: &str, pattern: &str, min_chars: usize) -> Option<usize> {
    window
        .rfind(pattern)
        .filter(|&idx| window[..idx].chars().count() >= min_chars)
        .map(|idx| idx + 1)
}

/// Splits at paragraph, line, sentence, then word boundaries, hard-cutting
/// only when a chunk has no break point at all.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text.trim().to_string();

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining);
            break;
        }

        let window_end = remaining
            .char_indices()
            .nth(max_len)
            .map(|(idx, _)| idx)
            .unwrap_or(remaining.len());
        let window = &remaining[..window_end];
        let min_chars = max_len / 2;

        let cut = find_break(window, "\n\n", min_chars)
            .or_else(|| find_break(window, "\n", min_chars))
            .or_else(|| find_break(window, ". ", min_chars))
            .or_else(|| find_break(window, " ", min_chars))
            .unwrap_or(window_end);

        chunks.push(remaining[..cut].trim().to_string());
        remaining = remaining[cut..].trim().to_string();
    }

    chunks.retain(|chunk| !chunk.is_empty());
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportBalance {
    pub balance: f64,
    pub currency: String,
}

/// Twilio WhatsApp client: outbound sends with automatic splitting,
/// authenticated media downloads, and account balance for the dashboard.
#[derive(Clone)]
pub struct TwilioClient {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
}

impl TwilioClient {
    pub fn new(config: &TwilioConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.whatsapp_number.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn send_single(&self, to: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from_number.as_str()), ("To", to), ("Body", body)])
            .send()
            .await
            .map_err(|e| WaBotError::Http(format!("twilio transport failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WaBotError::Http(format!("twilio send failed ({status}): {body}")));
        }
        Ok(())
    }

    /// Sends `body` to `to`, converting markdown and splitting long text
    /// into `(i/N)`-prefixed parts with a small delay to preserve order.
    pub async fn send(&self, to: &str, body: &str) -> Result<()> {
        let formatted = format_for_whatsapp(body);
        let chunks = split_message(&formatted, MAX_MESSAGE_LEN);
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let message = if total > 1 {
                format!("({}/{})\n{}", index + 1, total, chunk)
            } else {
                chunk
            };
            self.send_single(to, &message).await?;
            if index + 1 < total {
                tokio::time::sleep(PART_DELAY).await;
            }
        }
        Ok(())
    }

    /// Authenticated media fetch; returns the payload as base64 plus the
    /// reported MIME type. Failure is user-visible and aborts the turn.
    pub async fn download_media(&self, media_url: &str) -> Result<(String, String)> {
        let response = self
            .client
            .get(media_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| {
                WaBotError::chat(
                    ChatErrorKind::MediaDownloadFailed,
                    format!("media transport failed: {e}"),
                )
            })?;
        if !response.status().is_success() {
            return Err(WaBotError::chat(
                ChatErrorKind::MediaDownloadFailed,
                format!("media download failed: {}", response.status()),
            ));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await.map_err(|e| {
            WaBotError::chat(
                ChatErrorKind::MediaDownloadFailed,
                format!("media read failed: {e}"),
            )
        })?;
        Ok((general_purpose::STANDARD.encode(&bytes), mime_type))
    }

    /// Dashboard telemetry; degrades to a zero balance on error.
    pub async fn balance(&self) -> TransportBalance {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Balance.json",
            self.base_url, self.account_sid
        );
        let fallback = TransportBalance {
            balance: 0.0,
            currency: "USD".to_string(),
        };
        let response = match self
            .client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "twilio balance fetch failed");
                return fallback;
            }
        };
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "twilio balance decode failed");
                return fallback;
            }
        };
        let balance = body
            .get("balance")
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse::<f64>().ok())
            .map(f64::abs)
            .unwrap_or(0.0);
        let currency = body
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or("USD")
            .to_string();
        TransportBalance { balance, currency }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_stay_whole() {
        assert_eq!(split_message("hola", 1500), vec!["hola".to_string()]);
    }

    #[test]
    fn unbreakable_text_hard_cuts_to_ceil_parts() {
        let text = "a".repeat(3200);
        let chunks = split_message(&text, 1500);
        assert_eq!(chunks.len(), 3); // ceil(3200 / 1500)
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 1500));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let first = "x".repeat(1000);
        let second = "y".repeat(1000);
        let text = format!("{first}\n\n{second}");
        let chunks = split_message(&text, 1500);
        assert_eq!(chunks, vec![first, second]);
    }

    #[test]
    fn sentence_breaks_keep_the_period() {
        let first = format!("{}.", "x".repeat(999));
        let second = "y".repeat(600);
        let text = format!("{first} {second}");
        let chunks = split_message(&text, 1500);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('.'));
        assert_eq!(chunks[1], second);
    }

    #[test]
    fn split_is_utf8_safe() {
        let text = "ñá ".repeat(1200);
        let chunks = split_message(&text, 1500);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 1500));
    }

    #[test]
    fn markdown_converts_to_whatsapp_style() {
        assert_eq!(format_for_whatsapp("**negrita**"), "*negrita*");
        assert_eq!(format_for_whatsapp("__negrita__"), "*negrita*");
        assert_eq!(format_for_whatsapp("~~tachado~~"), "~tachado~");
        assert_eq!(format_for_whatsapp("_cursiva_ normal"), "_cursiva_ normal");
        assert_eq!(format_for_whatsapp("```código```"), "```código```");
    }
}
