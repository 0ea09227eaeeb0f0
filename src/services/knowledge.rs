use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WaBotError};
use crate::providers::kv::KvStore;

const DOCS_KEY: &str = "wa:knowledge:docs";
const MIN_EXTRACTED_LEN: usize = 10;

fn content_key(id: &str) -> String {
    format!("wa:knowledge:content:{id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub filename: String,
    pub category: String,
    pub file_type: String,
    pub word_count: usize,
    pub char_count: usize,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub score: usize,
    pub filename: String,
    pub category: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeContext {
    pub text: String,
    pub document_count: usize,
}

/// Admin-uploaded reference documents, stored as raw text and injected
/// wholesale into the system prompt; relevance is left to the model.
pub struct KnowledgeService {
    kv: Arc<KvStore>,
}

impl KnowledgeService {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn extract_text(bytes: &[u8], filename: &str) -> Result<(String, String)> {
        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let raw = match extension.as_str() {
            "txt" | "md" => String::from_utf8_lossy(bytes).into_owned(),
            "csv" => String::from_utf8_lossy(bytes)
                .lines()
                .map(|line| line.replace(',', " | "))
                .collect::<Vec<_>>()
                .join("\n"),
            other => {
                return Err(WaBotError::Runtime(format!(
                    "unsupported file type: {other}"
                )))
            }
        };

        let mut text = raw.replace("\r\n", "\n");
        while text.contains("\n\n\n") {
            text = text.replace("\n\n\n", "\n\n");
        }
        let text = text.trim().to_string();
        if text.len() < MIN_EXTRACTED_LEN {
            return Err(WaBotError::Runtime(
                "document appears to be empty or too short".to_string(),
            ));
        }
        Ok((text, extension))
    }

    fn document_id(filename: &str) -> String {
        let stem = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(filename);
        let slug: String = stem
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
            .collect();
        format!("{slug}-{}", Utc::now().timestamp_millis())
    }

    pub async fn upload(
        &self,
        filename: &str,
        content_base64: &str,
        category: &str,
    ) -> Result<DocumentMeta> {
        let bytes = general_purpose::STANDARD
            .decode(content_base64)
            .map_err(|e| WaBotError::Runtime(format!("invalid base64 content: {e}")))?;
        let (text, file_type) = Self::extract_text(&bytes, filename)?;

        let meta = DocumentMeta {
            id: Self::document_id(filename),
            filename: filename.to_string(),
            category: category.to_string(),
            file_type,
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
            uploaded_at: Utc::now(),
        };

        self.kv.set(&content_key(&meta.id), &text, None).await?;
        let payload = serde_json::to_string(&meta)
            .map_err(|e| WaBotError::Serialization(e.to_string()))?;
        self.kv.hset(DOCS_KEY, &meta.id, &payload).await?;
        Ok(meta)
    }

    /// Newest first. Malformed metadata entries are skipped, not fatal.
    pub async fn list(&self) -> Result<Vec<DocumentMeta>> {
        let mut documents: Vec<DocumentMeta> = self
            .kv
            .hgetall(DOCS_KEY)
            .await?
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(meta) => Some(meta),
                Err(err) => {
                    warn!(document = %id, error = %err, "skipping malformed document metadata");
                    None
                }
            })
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    /// Removes metadata and content together. Returns the filename, or
    /// None when the id is unknown.
    pub async fn delete(&self, document_id: &str) -> Result<Option<String>> {
        let Some(payload) = self.kv.hget(DOCS_KEY, document_id).await? else {
            return Ok(None);
        };
        let filename = serde_json::from_str::<DocumentMeta>(&payload)
            .map(|meta| meta.filename)
            .unwrap_or_else(|_| document_id.to_string());

        self.kv.del(&content_key(document_id)).await?;
        self.kv.hdel(DOCS_KEY, document_id).await?;
        Ok(Some(filename))
    }

    /// Keyword-overlap ranking over the stored raw text. There is no
    /// vector index; documents are few and injected wholesale anyway.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        for meta in self.list().await? {
            let Some(text) = self.kv.get(&content_key(&meta.id)).await? else {
                continue;
            };
            let haystack = text.to_lowercase();
            let score: usize = terms
                .iter()
                .map(|term| haystack.matches(term.as_str()).count())
                .sum();
            if score == 0 {
                continue;
            }
            let first_hit = terms
                .iter()
                .filter_map(|term| haystack.find(term.as_str()))
                .min()
                .unwrap_or(0);
            let snippet: String = text
                .char_indices()
                .skip_while(|(idx, _)| *idx < first_hit)
                .map(|(_, ch)| ch)
                .take(200)
                .collect();
            scored.push((score, meta, snippet));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(idx, (score, meta, snippet))| SearchHit {
                rank: idx + 1,
                score,
                filename: meta.filename,
                category: meta.category,
                snippet,
            })
            .collect())
    }

    /// Concatenates every stored document into one delimited block for the
    /// system prompt. Failures degrade to an empty context so the
    /// conversation proceeds without grounding.
    pub async fn context(&self) -> KnowledgeContext {
        let documents = match self.list().await {
            Ok(documents) => documents,
            Err(err) => {
                warn!(error = %err, "knowledge listing failed, skipping context");
                return KnowledgeContext::default();
            }
        };
        if documents.is_empty() {
            return KnowledgeContext::default();
        }

        let mut text = String::from("=== KNOWLEDGE BASE ===\n");
        let mut included = 0;
        for meta in &documents {
            match self.kv.get(&content_key(&meta.id)).await {
                Ok(Some(content)) => {
                    text.push_str(&format!("\n[DOCUMENTO: {}]\n{}\n", meta.filename, content));
                    included += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(document = %meta.id, error = %err, "knowledge content fetch failed");
                }
            }
        }
        if included == 0 {
            return KnowledgeContext::default();
        }
        text.push_str("\n=== END ===");
        KnowledgeContext {
            text,
            document_count: included,
        }
    }
}
