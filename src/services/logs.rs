use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::domains::chat::LogEntry;
use crate::error::Result;
use crate::providers::kv::KvStore;

const LOGS_KEY: &str = "logs:messages";
const MAX_LOGS: i64 = 100;
const MAX_RESPONSE_LEN: usize = 500;
const ACTIVE_USERS_TTL_SECONDS: u64 = 86_400;

/// Bounded, newest-first conversation log for the dashboard, plus a couple
/// of running counters. All writes are best-effort telemetry.
pub struct LogService {
    kv: Arc<KvStore>,
}

impl LogService {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn entry_id(user_id: &str) -> String {
        let suffix: String = user_id
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}-{suffix}", Utc::now().timestamp_millis())
    }

    /// Appends an entry and trims the list. A failed log write is never
    /// user-visible and never blocks the reply path.
    pub async fn record(&self, user_id: &str, message: &str, model: &str, response: &str, status: &str) {
        let entry = LogEntry {
            id: Self::entry_id(user_id),
            timestamp: Utc::now(),
            from: user_id.to_string(),
            message: message.to_string(),
            model: model.to_string(),
            response: response.chars().take(MAX_RESPONSE_LEN).collect(),
            status: status.to_string(),
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "log entry serialization failed");
                return;
            }
        };

        if let Err(err) = self.kv.lpush(LOGS_KEY, &payload).await {
            warn!(error = %err, "log write failed");
            return;
        }
        if let Err(err) = self.kv.ltrim(LOGS_KEY, 0, MAX_LOGS - 1).await {
            warn!(error = %err, "log trim failed");
        }
        if let Err(err) = self.kv.incr("stats:total_messages").await {
            warn!(error = %err, "stats counter failed");
        }
        let active_key = format!("stats:active_users:{}", Utc::now().format("%Y-%m-%d"));
        if let Err(err) = self.kv.sadd(&active_key, user_id).await {
            warn!(error = %err, "active user tracking failed");
        } else if let Err(err) = self.kv.expire(&active_key, ACTIVE_USERS_TTL_SECONDS).await {
            warn!(error = %err, "active user ttl failed");
        }
    }

    /// Newest first; malformed entries are skipped rather than fatal.
    pub async fn list(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let raw = self.kv.lrange(LOGS_KEY, 0, limit as i64 - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect())
    }

    pub async fn clear(&self) -> Result<()> {
        self.kv.del(LOGS_KEY).await
    }
}
