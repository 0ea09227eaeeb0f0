use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Which wire protocol a model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Vendor API called directly with its own request/response schema.
    GoogleDirect,
    /// Unified chat-completion gateway proxying several vendors.
    Gateway,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: Provider,
    pub wire_model: &'static str,
    pub api_version: &'static str,
    pub vision: bool,
    pub free: bool,
}

pub const DEFAULT_MODEL: &str = "gemini";

static MODELS: &[ModelEntry] = &[
    ModelEntry {
        id: "gemini",
        name: "Gemini 3 Flash",
        provider: Provider::GoogleDirect,
        wire_model: "gemini-3-flash-preview",
        api_version: "v1beta",
        vision: true,
        free: true,
    },
    ModelEntry {
        id: "opus",
        name: "Claude Opus 4.5",
        provider: Provider::Gateway,
        wire_model: "anthropic/claude-opus-4-5",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "sonnet",
        name: "Claude Sonnet 4.5",
        provider: Provider::Gateway,
        wire_model: "anthropic/claude-sonnet-4.5",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "haiku",
        name: "Claude Haiku 3.5",
        provider: Provider::Gateway,
        wire_model: "anthropic/claude-3.5-haiku",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "gpt",
        name: "GPT-5.2",
        provider: Provider::Gateway,
        wire_model: "openai/gpt-5.2",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "grok",
        name: "Grok 4.1",
        provider: Provider::Gateway,
        wire_model: "xai/grok-4.1-fast-reasoning",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "deepseek",
        name: "DeepSeek V3.2",
        provider: Provider::Gateway,
        wire_model: "deepseek/deepseek-v3.2-exp-thinking",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "mistral",
        name: "Mistral Large",
        provider: Provider::Gateway,
        wire_model: "mistral/mistral-large-2411",
        api_version: "",
        vision: false,
        free: false,
    },
    ModelEntry {
        id: "llama",
        name: "Llama 3.3 70B",
        provider: Provider::Gateway,
        wire_model: "meta-llama/llama-3.3-70b-instruct",
        api_version: "",
        vision: false,
        free: false,
    },
];

static BY_ID: Lazy<HashMap<&'static str, &'static ModelEntry>> =
    Lazy::new(|| MODELS.iter().map(|entry| (entry.id, entry)).collect());

pub fn lookup(id: &str) -> Option<&'static ModelEntry> {
    BY_ID.get(id).copied()
}

/// Total lookup: unknown or stale ids fall back to the default entry so a
/// persisted preference can never break a conversation.
pub fn resolve(id: &str) -> &'static ModelEntry {
    lookup(id).unwrap_or_else(|| {
        BY_ID
            .get(DEFAULT_MODEL)
            .copied()
            .expect("default model must exist in the registry")
    })
}

pub fn all() -> impl Iterator<Item = &'static ModelEntry> {
    MODELS.iter()
}

pub fn ids() -> Vec<&'static str> {
    MODELS.iter().map(|entry| entry.id).collect()
}
