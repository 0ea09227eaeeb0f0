use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::KvConfig;
use crate::error::{Result, WaBotError};

/// Adapter over an Upstash-style Redis REST endpoint. Every command is a
/// single POST; there are no connections to pool and no transactions.
#[derive(Clone)]
pub struct KvStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl KvStore {
    pub fn new(config: &KvConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        }
    }

    async fn execute(&self, command: &[&str]) -> Result<Value> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&json!(command))
            .send()
            .await
            .map_err(|e| WaBotError::Http(format!("kv transport failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| WaBotError::Serialization(format!("kv decode failed: {e}")))?;

        if !status.is_success() {
            return Err(WaBotError::Http(format!("kv command failed ({status}): {body}")));
        }
        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            return Err(WaBotError::Http(format!("kv command rejected: {error}")));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Runs the command and bumps the daily command counter. The counter
    /// write is fire-and-forget telemetry and never fails the caller.
    async fn command(&self, parts: &[&str]) -> Result<Value> {
        let result = self.execute(parts).await;
        let key = format!("upstash:commands:{}", Utc::now().format("%Y-%m-%d"));
        if let Err(err) = self.execute(&["INCR", &key]).await {
            debug!(error = %err, "kv usage tracking skipped");
        }
        result
    }

    fn as_string(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(Self::as_string(self.command(&["GET", key]).await?))
    }

    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        match ttl_seconds {
            Some(ttl) => {
                let ttl = ttl.to_string();
                self.command(&["SETEX", key, &ttl, value]).await?;
            }
            None => {
                self.command(&["SET", key, value]).await?;
            }
        }
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let value = self.command(&["INCR", key]).await?;
        value
            .as_i64()
            .ok_or_else(|| WaBotError::Serialization("INCR returned a non-integer".to_string()))
    }

    pub async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.command(&["LPUSH", key, value]).await?;
        Ok(())
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let start = start.to_string();
        let stop = stop.to_string();
        self.command(&["LTRIM", key, &start, &stop]).await?;
        Ok(())
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let start = start.to_string();
        let stop = stop.to_string();
        let value = self.command(&["LRANGE", key, &start, &stop]).await?;
        let items = value
            .as_array()
            .ok_or_else(|| WaBotError::Serialization("LRANGE returned a non-array".to_string()))?;
        Ok(items
            .iter()
            .cloned()
            .filter_map(Self::as_string)
            .collect())
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.command(&["HSET", key, field, value]).await?;
        Ok(())
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(Self::as_string(self.command(&["HGET", key, field]).await?))
    }

    /// HGETALL over REST comes back as a flat `[field, value, ...]` array.
    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let value = self.command(&["HGETALL", key]).await?;
        let items = value
            .as_array()
            .ok_or_else(|| WaBotError::Serialization("HGETALL returned a non-array".to_string()))?;
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.iter().cloned();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            if let (Some(field), Some(value)) = (Self::as_string(field), Self::as_string(value)) {
                pairs.push((field, value));
            }
        }
        Ok(pairs)
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let removed = self.command(&["HDEL", key, field]).await?;
        Ok(removed.as_i64().unwrap_or(0) > 0)
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.command(&["SADD", key, member]).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let ttl = ttl_seconds.to_string();
        self.command(&["EXPIRE", key, &ttl]).await?;
        Ok(())
    }
}
