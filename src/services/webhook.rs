use std::sync::Arc;

use tracing::{info, warn};

use crate::domains::chat::{Content, ImageUrl, Part};
use crate::error::ChatErrorKind;
use crate::models;
use crate::providers::ProviderClient;
use crate::services::commands::CommandService;
use crate::services::knowledge::KnowledgeService;
use crate::services::logs::LogService;
use crate::services::memory::MemoryService;
use crate::services::transport::TwilioClient;

const DEFAULT_IMAGE_PROMPT: &str = "¿Qué ves en esta imagen?";

/// Inbound webhook payload after transport parsing.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: String,
    pub body: Option<String>,
    pub num_media: u32,
    pub media_url: Option<String>,
}

/// The pipeline entry point: command short-circuit, media handling,
/// prompt assembly, provider call, reply, and persistence. Reply-sending
/// and log-writing are independent best-effort terminal steps.
pub struct Orchestrator {
    memory: Arc<MemoryService>,
    knowledge: Arc<KnowledgeService>,
    commands: Arc<CommandService>,
    providers: Arc<ProviderClient>,
    transport: Arc<TwilioClient>,
    logs: Arc<LogService>,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemoryService>,
        knowledge: Arc<KnowledgeService>,
        commands: Arc<CommandService>,
        providers: Arc<ProviderClient>,
        transport: Arc<TwilioClient>,
        logs: Arc<LogService>,
    ) -> Self {
        Self {
            memory,
            knowledge,
            commands,
            providers,
            transport,
            logs,
        }
    }

    async fn reply(&self, to: &str, body: &str) {
        if let Err(err) = self.transport.send(to, body).await {
            warn!(user = %to, error = %err, "outbound send failed");
        }
    }

    async fn fail_turn(&self, user_id: &str, message: &str, model_id: &str, kind: ChatErrorKind) {
        let text = kind.user_message();
        self.reply(user_id, &text).await;
        self.logs
            .record(user_id, message, model_id, &text, kind.status())
            .await;
    }

    pub async fn handle(&self, inbound: InboundMessage) {
        let user_id = inbound.from.clone();
        let text = inbound.body.as_deref().unwrap_or("").trim().to_string();
        let has_media = inbound.num_media > 0 && inbound.media_url.is_some();

        // The sole fully-silent terminal state: nothing to say, nothing
        // attached.
        if text.is_empty() && !has_media {
            return;
        }

        // Command turns short-circuit; memory is untouched.
        if text.starts_with('/') {
            match self.commands.dispatch(&user_id, &text).await {
                Ok(Some(reply)) => {
                    self.reply(&user_id, &reply).await;
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(user = %user_id, error = %err, "command dispatch failed");
                    self.reply(&user_id, &ChatErrorKind::Upstream.user_message())
                        .await;
                    return;
                }
            }
        }

        let model_id = self.memory.user_model(&user_id).await;
        let entry = models::resolve(&model_id);

        let content = if has_media {
            if !entry.vision {
                info!(user = %user_id, model = %entry.id, "media rejected: model has no vision");
                self.reply(&user_id, &ChatErrorKind::vision_unsupported(entry.name))
                    .await;
                self.logs
                    .record(
                        &user_id,
                        "[imagen]",
                        entry.id,
                        "",
                        ChatErrorKind::VisionUnsupported.status(),
                    )
                    .await;
                return;
            }

            let media_url = inbound.media_url.as_deref().unwrap_or_default();
            let (data, mime_type) = match self.transport.download_media(media_url).await {
                Ok(downloaded) => downloaded,
                Err(err) => {
                    warn!(user = %user_id, error = %err, "media download failed");
                    self.fail_turn(&user_id, "[imagen]", entry.id, ChatErrorKind::MediaDownloadFailed)
                        .await;
                    return;
                }
            };
            let caption = if text.is_empty() {
                DEFAULT_IMAGE_PROMPT.to_string()
            } else {
                text.clone()
            };
            Content::Parts(vec![
                Part::Text { text: caption },
                Part::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{mime_type};base64,{data}"),
                    },
                },
            ])
        } else {
            Content::text(text.clone())
        };

        let knowledge = self.knowledge.context().await;
        let knowledge_context = (knowledge.document_count > 0).then_some(knowledge.text.as_str());
        let messages = self
            .memory
            .build_messages(&user_id, content.clone(), entry.id, knowledge_context)
            .await;

        match self.providers.chat(&messages, entry.id).await {
            Ok(response) => {
                // Memory persists only on success; a failed persist is
                // degraded, not fatal, since the reply already exists.
                if let Err(err) = self
                    .memory
                    .add_turn(&user_id, content.clone(), &response, entry.id)
                    .await
                {
                    warn!(user = %user_id, error = %err, "memory persist failed");
                }
                self.reply(&user_id, &response).await;
                self.logs
                    .record(&user_id, &content.log_text(), entry.id, &response, "success")
                    .await;
            }
            Err(err) => {
                let kind = err.chat_kind();
                warn!(user = %user_id, model = %entry.id, error = %err, status = kind.status(), "model call failed");
                self.fail_turn(&user_id, &content.log_text(), entry.id, kind)
                    .await;
            }
        }
    }
}
