use thiserror::Error;

pub use crate::Result;

/// Classified outcome of a provider call, or of a precondition that fails
/// before any call is made. The orchestrator maps each kind to a fixed
/// user-facing message and a log status; raw upstream text never reaches
/// the chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    RateLimited,
    ModelNotFound,
    SafetyBlocked,
    MalformedRequest,
    InvalidResponseShape,
    Upstream,
    MediaDownloadFailed,
    VisionUnsupported,
}

impl ChatErrorKind {
    pub fn status(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ModelNotFound => "model_not_found",
            Self::SafetyBlocked => "safety_blocked",
            Self::MalformedRequest => "malformed_request",
            Self::InvalidResponseShape => "invalid_response",
            Self::Upstream => "upstream_error",
            Self::MediaDownloadFailed => "media_download_failed",
            Self::VisionUnsupported => "vision_unsupported",
        }
    }

    /// The vision rejection names the model the user must switch away
    /// from; `user_message` falls back to a generic subject.
    pub fn vision_unsupported(model_name: &str) -> String {
        format!("❌ {model_name} no soporta imágenes. Cambia con /modelo gemini")
    }

    pub fn user_message(&self) -> String {
        let fixed = match self {
            Self::RateLimited => {
                "⏳ Demasiadas peticiones por ahora. Espera un momento o cambia de modelo con /modelo"
            }
            Self::ModelNotFound => {
                "❌ El modelo seleccionado ya no está disponible. Usa /modelo para elegir otro"
            }
            Self::SafetyBlocked => {
                "🚫 El contenido fue bloqueado por los filtros de seguridad. Intenta reformular tu mensaje"
            }
            Self::MalformedRequest => "❌ No pude procesar tu mensaje. Intenta de nuevo",
            Self::InvalidResponseShape => {
                "❌ El modelo no generó una respuesta válida. Intenta de nuevo"
            }
            Self::Upstream => {
                "❌ Hubo un error procesando tu mensaje. Intenta de nuevo o escribe /ayuda"
            }
            Self::MediaDownloadFailed => "❌ No pude descargar la imagen. Intenta enviarla de nuevo",
            Self::VisionUnsupported => return Self::vision_unsupported("El modelo actual"),
        };
        fixed.to_string()
    }
}

#[derive(Debug, Error)]
pub enum WaBotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("chat error [{}]: {message}", kind.status())]
    Chat {
        kind: ChatErrorKind,
        message: String,
    },
}

impl WaBotError {
    pub fn chat(kind: ChatErrorKind, message: impl Into<String>) -> Self {
        Self::Chat {
            kind,
            message: message.into(),
        }
    }

    /// Kind used for reply selection and log status. Unclassified errors
    /// reaching the orchestrator count as upstream failures.
    pub fn chat_kind(&self) -> ChatErrorKind {
        match self {
            Self::Chat { kind, .. } => *kind,
            _ => ChatErrorKind::Upstream,
        }
    }
}
