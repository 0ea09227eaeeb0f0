pub mod gateway;
pub mod gemini;
pub mod kv;

use async_trait::async_trait;

use crate::domains::chat::Message;
use crate::error::Result;
use crate::models::{self, ModelEntry, Provider};

/// Seam over the two wire protocols. One implementation per protocol;
/// dispatch is decided by the model registry entry.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[Message], entry: &ModelEntry) -> Result<String>;
}

/// Registry-driven dispatch between the direct Gemini API and the gateway.
pub struct ProviderClient {
    gemini: gemini::GeminiProvider,
    gateway: gateway::GatewayProvider,
}

impl ProviderClient {
    pub fn new(gemini: gemini::GeminiProvider, gateway: gateway::GatewayProvider) -> Self {
        Self { gemini, gateway }
    }

    /// Sends the message list to whichever provider backs `model_id`.
    /// Unknown ids silently resolve to the default model.
    pub async fn chat(&self, messages: &[Message], model_id: &str) -> Result<String> {
        let entry = models::resolve(model_id);
        match entry.provider {
            Provider::GoogleDirect => self.gemini.chat(messages, entry).await,
            Provider::Gateway => self.gateway.chat(messages, entry).await,
        }
    }
}
