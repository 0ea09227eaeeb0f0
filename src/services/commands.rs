use std::sync::Arc;

use crate::error::Result;
use crate::models::{self, ModelEntry};
use crate::services::knowledge::KnowledgeService;
use crate::services::memory::MemoryService;

/// Slash-command router. A closed dispatch table over the first token;
/// anything unrecognized falls through to normal message processing.
pub struct CommandService {
    memory: Arc<MemoryService>,
    knowledge: Arc<KnowledgeService>,
}

fn model_confirmation(entry: &ModelEntry) -> String {
    let cost = if entry.free { "💰 GRATIS" } else { "💳 Premium" };
    let vision = if entry.vision {
        "📷 Analiza imágenes"
    } else {
        "📝 Solo texto"
    };
    format!("✅ Modelo cambiado a *{}*\n{cost} | {vision}", entry.name)
}

fn invalid_model_reply() -> String {
    format!(
        "❌ Modelo inválido\nDisponibles: {}",
        models::ids().join(", ")
    )
}

fn help_text(current: &ModelEntry) -> String {
    let cost = if current.free { "💰 GRATIS" } else { "💳 Premium" };
    let vision = if current.vision {
        "📷 Analiza imágenes"
    } else {
        "📝 Solo texto"
    };

    let mut free_lines = Vec::new();
    let mut premium_lines = Vec::new();
    for entry in models::all() {
        let line = format!("• /{} - {}{}", entry.id, entry.name, if entry.vision { " 📷" } else { "" });
        if entry.free {
            free_lines.push(line);
        } else {
            premium_lines.push(line);
        }
    }

    format!(
        "📱 *Bot Multi-IA*\n\n🎯 *Modelo actual:* {}\n{cost} | {vision}\n\n*Modelos Disponibles:*\n\n💰 *GRATIS (con visión):*\n{}\n\n💳 *PREMIUM (sin visión):*\n{}\n\n*Comandos:*\n• /ayuda - Esta ayuda\n• /reset - Borrar memoria\n• /docs - Ver documentos\n• /modelo [nombre] - Cambiar modelo\n\n⚠️ *IMPORTANTE:* Solo los modelos con 📷 pueden analizar imágenes.",
        current.name,
        free_lines.join("\n"),
        premium_lines.join("\n"),
    )
}

impl CommandService {
    pub fn new(memory: Arc<MemoryService>, knowledge: Arc<KnowledgeService>) -> Self {
        Self { memory, knowledge }
    }

    async fn switch_model(&self, user_id: &str, model_id: &str) -> Result<String> {
        match models::lookup(model_id) {
            Some(entry) => {
                self.memory.set_user_model(user_id, entry.id).await?;
                Ok(model_confirmation(entry))
            }
            None => Ok(invalid_model_reply()),
        }
    }

    async fn list_documents(&self) -> String {
        match self.knowledge.list().await {
            Ok(documents) if documents.is_empty() => {
                "📂 No hay documentos en la base de conocimiento".to_string()
            }
            Ok(documents) => {
                let lines: Vec<String> = documents
                    .iter()
                    .map(|doc| format!("• {} ({})", doc.filename, doc.category))
                    .collect();
                format!("📂 *Documentos:*\n{}", lines.join("\n"))
            }
            Err(_) => "❌ No pude consultar los documentos. Intenta de nuevo".to_string(),
        }
    }

    /// Returns the reply for a recognized command, or None when the text
    /// is not a command and should flow through normal processing.
    pub async fn dispatch(&self, user_id: &str, text: &str) -> Result<Option<String>> {
        let Some(rest) = text.trim().strip_prefix('/') else {
            return Ok(None);
        };
        let mut tokens = rest.split_whitespace();
        let command = tokens.next().unwrap_or_default().to_lowercase();
        let argument = tokens.next().map(|arg| arg.to_lowercase());

        let reply = match command.as_str() {
            "modelo" | "model" => match argument {
                Some(model_id) => self.switch_model(user_id, &model_id).await?,
                None => invalid_model_reply(),
            },
            "help" | "ayuda" => {
                let current = models::resolve(&self.memory.user_model(user_id).await);
                help_text(current)
            }
            "reset" => {
                self.memory.reset(user_id).await;
                "🔄 Memoria reiniciada".to_string()
            }
            "docs" => self.list_documents().await,
            // `/gemini`, `/opus`, ... switch directly, as the help text
            // advertises.
            other if models::lookup(other).is_some() => {
                self.switch_model(user_id, other).await?
            }
            _ => return Ok(None),
        };
        Ok(Some(reply))
    }
}
