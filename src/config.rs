use serde::{Deserialize, Serialize};

use crate::error::{Result, WaBotError};

pub const DEFAULT_SYSTEM_PROMPT: &str = "Eres un asistente útil, conciso y amigable en español. \
Puedes ver y analizar imágenes cuando te las envíen. \
Responde de manera clara y directa. Si no sabes algo, admítelo.";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender id in `whatsapp:+NN...` form.
    pub whatsapp_number: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KvConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemorySettings {
    /// Raw storage cap for the per-user turn list (FIFO trimmed).
    pub max_turns: usize,
    /// Tail of stored turns replayed verbatim into each prompt.
    pub recent_limit: usize,
    /// Summary regenerates when the turn count hits a multiple of this.
    pub summary_threshold: usize,
    /// Turns older than this are dropped at read time.
    pub retention_months: u32,
    /// EX applied to every per-user key write.
    pub ttl_seconds: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_turns: 100,
            recent_limit: 10,
            summary_threshold: 30,
            retention_months: 12,
            ttl_seconds: 365 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Limits {
    pub max_tokens: u32,
    pub gemini_daily: u64,
    pub upstash_daily: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            gemini_daily: 1500,
            upstash_daily: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub twilio: TwilioConfig,
    pub kv: KvConfig,
    pub gemini: GeminiConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub limits: Limits,
    /// Bearer token for the admin API. Empty fails closed.
    pub admin_token: Option<String>,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| WaBotError::Config(format!("missing required env var {name}")))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            twilio: TwilioConfig {
                account_sid: required("TWILIO_ACCOUNT_SID")?,
                auth_token: required("TWILIO_AUTH_TOKEN")?,
                whatsapp_number: required("TWILIO_WHATSAPP_NUMBER")?,
                base_url: optional("TWILIO_BASE_URL")
                    .unwrap_or_else(|| "https://api.twilio.com".to_string()),
            },
            kv: KvConfig {
                url: required("UPSTASH_REDIS_REST_URL")?,
                token: required("UPSTASH_REDIS_REST_TOKEN")?,
            },
            gemini: GeminiConfig {
                api_key: required("GEMINI_API_KEY")?,
                base_url: optional("GEMINI_BASE_URL")
                    .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            },
            gateway: GatewayConfig {
                api_key: optional("AI_GATEWAY_API_KEY"),
                base_url: optional("AI_GATEWAY_BASE_URL")
                    .unwrap_or_else(|| "https://ai-gateway.vercel.sh".to_string()),
            },
            memory: MemorySettings::default(),
            limits: Limits::default(),
            admin_token: optional("WA_ADMIN_TOKEN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_defaults_match_storage_contract() {
        let memory = MemorySettings::default();
        assert_eq!(memory.max_turns, 100);
        assert_eq!(memory.recent_limit, 10);
        assert_eq!(memory.summary_threshold, 30);
        assert_eq!(memory.ttl_seconds, 31_536_000);
    }

    #[test]
    fn default_system_prompt_is_non_empty() {
        assert!(!DEFAULT_SYSTEM_PROMPT.trim().is_empty());
    }
}
