use std::sync::Arc;

use chrono::{Months, Utc};
use tracing::{debug, warn};

use crate::config::{MemorySettings, DEFAULT_SYSTEM_PROMPT};
use crate::domains::chat::{Content, Message, Turn};
use crate::error::Result;
use crate::models::DEFAULT_MODEL;
use crate::providers::kv::KvStore;
use crate::providers::ProviderClient;

fn memory_key(user_id: &str) -> String {
    format!("memory:{user_id}")
}

fn summary_key(user_id: &str) -> String {
    format!("summary:{user_id}")
}

fn model_key(user_id: &str) -> String {
    format!("model:{user_id}")
}

fn count_key(user_id: &str) -> String {
    format!("count:{user_id}")
}

const SYSTEM_PROMPT_KEY: &str = "system:prompt";

/// FIFO trim: oldest turns are evicted first once the cap is exceeded.
fn enforce_cap(turns: &mut Vec<Turn>, max_turns: usize) {
    if turns.len() > max_turns {
        let excess = turns.len() - max_turns;
        turns.drain(..excess);
    }
}

/// Per-user conversation memory: a capped rolling turn list plus a
/// periodically regenerated long-term summary. The KV store is the only
/// authoritative copy; every read refetches.
pub struct MemoryService {
    kv: Arc<KvStore>,
    providers: Arc<ProviderClient>,
    settings: MemorySettings,
}

impl MemoryService {
    pub fn new(kv: Arc<KvStore>, providers: Arc<ProviderClient>, settings: MemorySettings) -> Self {
        Self {
            kv,
            providers,
            settings,
        }
    }

    pub async fn user_model(&self, user_id: &str) -> String {
        match self.kv.get(&model_key(user_id)).await {
            Ok(Some(model)) => model,
            Ok(None) => DEFAULT_MODEL.to_string(),
            Err(err) => {
                warn!(error = %err, "model preference fetch failed, using default");
                DEFAULT_MODEL.to_string()
            }
        }
    }

    pub async fn set_user_model(&self, user_id: &str, model_id: &str) -> Result<()> {
        self.kv
            .set(&model_key(user_id), model_id, Some(self.settings.ttl_seconds))
            .await
    }

    /// The system prompt is mutable through the admin API at any time, so
    /// it is fetched fresh on every call rather than cached.
    pub async fn system_prompt(&self) -> String {
        match self.kv.get(SYSTEM_PROMPT_KEY).await {
            Ok(Some(prompt)) if !prompt.trim().is_empty() => prompt,
            Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
            Err(err) => {
                warn!(error = %err, "system prompt fetch failed, using default");
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }

    /// Stored turns, oldest first, with turns past the retention window
    /// dropped at read time. Fetch or parse failures degrade to an empty
    /// history: a conversation must always be startable.
    pub async fn turns(&self, user_id: &str) -> Vec<Turn> {
        let raw = match self.kv.get(&memory_key(user_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "memory fetch failed, treating as empty");
                return Vec::new();
            }
        };
        let turns: Vec<Turn> = match serde_json::from_str(&raw) {
            Ok(turns) => turns,
            Err(err) => {
                warn!(error = %err, "memory payload malformed, treating as empty");
                return Vec::new();
            }
        };
        let cutoff = Utc::now()
            .checked_sub_months(Months::new(self.settings.retention_months))
            .unwrap_or_else(Utc::now);
        turns
            .into_iter()
            .filter(|turn| turn.timestamp >= cutoff)
            .collect()
    }

    /// Appends a turn, trims the stored list to the cap from the front,
    /// and persists with the retention TTL. The summary cadence is keyed
    /// to a monotonic per-user message counter: every multiple of the
    /// threshold regenerates the long-term summary, best-effort.
    pub async fn add_turn(&self, user_id: &str, user: Content, assistant: &str, model_id: &str) -> Result<()> {
        let mut turns = self.turns(user_id).await;
        turns.push(Turn {
            timestamp: Utc::now(),
            user,
            assistant: assistant.to_string(),
        });
        enforce_cap(&mut turns, self.settings.max_turns);
        let payload = serde_json::to_string(&turns)
            .map_err(|e| crate::error::WaBotError::Serialization(e.to_string()))?;
        self.kv
            .set(&memory_key(user_id), &payload, Some(self.settings.ttl_seconds))
            .await?;

        // The stored list pins at the cap, so the cadence cannot ride on
        // its length; the counter keeps growing past it.
        let count = match self.kv.incr(&count_key(user_id)).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "message counter bump failed, using list length");
                turns.len() as i64
            }
        };
        if self.settings.summary_threshold > 0
            && count % self.settings.summary_threshold as i64 == 0
        {
            self.regenerate_summary(user_id, &turns, model_id).await;
        }
        Ok(())
    }

    async fn cached_summary(&self, user_id: &str) -> Option<String> {
        match self.kv.get(&summary_key(user_id)).await {
            Ok(summary) => summary.filter(|s| !s.trim().is_empty()),
            Err(err) => {
                debug!(error = %err, "summary fetch failed, proceeding without one");
                None
            }
        }
    }

    fn render_history(turns: &[Turn]) -> String {
        turns
            .iter()
            .map(|turn| {
                format!(
                    "Usuario: {}\nAsistente: {}",
                    turn.user.log_text(),
                    turn.assistant
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Best-effort: a failed summarization call leaves the previous
    /// summary (or its absence) in place.
    async fn regenerate_summary(&self, user_id: &str, turns: &[Turn], model_id: &str) {
        let prompt = format!(
            "Resume esta conversación en máximo 200 palabras, destacando temas importantes y preferencias del usuario:\n\n{}",
            Self::render_history(turns)
        );
        let messages = [Message::user(Content::text(prompt))];
        match self.providers.chat(&messages, model_id).await {
            Ok(summary) => {
                if let Err(err) = self
                    .kv
                    .set(&summary_key(user_id), &summary, Some(self.settings.ttl_seconds))
                    .await
                {
                    warn!(error = %err, "summary persist failed");
                }
            }
            Err(err) => warn!(error = %err, "summary generation failed"),
        }
    }

    /// Retrieves the summary once the history is past the threshold,
    /// generating it on the first crossing.
    async fn summary(&self, user_id: &str, turns: &[Turn], model_id: &str) -> Option<String> {
        if turns.len() < self.settings.summary_threshold {
            return None;
        }
        if let Some(summary) = self.cached_summary(user_id).await {
            return Some(summary);
        }
        self.regenerate_summary(user_id, turns, model_id).await;
        self.cached_summary(user_id).await
    }

    /// Composes the prompt message list: global system prompt (with the
    /// knowledge context appended when present), summary as a second
    /// system message, the recent-window tail of stored turns, then the
    /// current user content.
    pub async fn build_messages(
        &self,
        user_id: &str,
        content: Content,
        model_id: &str,
        knowledge_context: Option<&str>,
    ) -> Vec<Message> {
        let mut system = self.system_prompt().await;
        if let Some(context) = knowledge_context.filter(|c| !c.trim().is_empty()) {
            system.push_str("\n\n");
            system.push_str(context);
        }

        let turns = self.turns(user_id).await;
        let mut messages = vec![Message::system(system)];

        if let Some(summary) = self.summary(user_id, &turns, model_id).await {
            messages.push(Message::system(format!(
                "Contexto de conversaciones anteriores: {summary}"
            )));
        }

        let recent_start = turns.len().saturating_sub(self.settings.recent_limit);
        for turn in &turns[recent_start..] {
            messages.push(Message::user(turn.user.clone()));
            messages.push(Message::assistant(turn.assistant.clone()));
        }

        messages.push(Message::user(content));
        messages
    }

    /// Independent best-effort deletes; a partial reset is tolerated.
    pub async fn reset(&self, user_id: &str) {
        for key in [
            memory_key(user_id),
            summary_key(user_id),
            model_key(user_id),
            count_key(user_id),
        ] {
            if let Err(err) = self.kv.del(&key).await {
                warn!(key = %key, error = %err, "reset delete failed");
            }
        }
    }
}
