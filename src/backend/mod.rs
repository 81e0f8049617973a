pub mod chat_completions;
pub mod generate_content;
pub mod registry;

use std::{fmt, str::FromStr};

use serde_json::Value;
use thiserror::Error;

use crate::{config::BackendSettings, stream::StreamRecord};

/// Wire protocol spoken by an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// OpenAI-compatible `/chat/completions`.
    ChatCompletions,
    /// Google generative-language `:generateContent`.
    GenerateContent,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::ChatCompletions => "chat-completions",
            ProtocolKind::GenerateContent => "generate-content",
        }
    }

    /// Sentinel line that ends a stream without carrying a record.
    pub fn is_stream_sentinel(&self, line: &str) -> bool {
        match self {
            ProtocolKind::ChatCompletions => line == chat_completions::DONE_SENTINEL,
            ProtocolKind::GenerateContent => false,
        }
    }

    /// Parses one complete stream line. `Err` means the line is noise.
    pub fn parse_stream_line(&self, line: &str) -> Result<Option<StreamRecord>, serde_json::Error> {
        match self {
            ProtocolKind::ChatCompletions => chat_completions::parse_stream_line(line),
            ProtocolKind::GenerateContent => generate_content::parse_stream_line(line),
        }
    }

    /// Block reason carried by a fully buffered response body, if any.
    pub fn buffered_block_reason(&self, body: &Value) -> Option<String> {
        match self {
            ProtocolKind::ChatCompletions => chat_completions::buffered_block_reason(body),
            ProtocolKind::GenerateContent => generate_content::buffered_block_reason(body),
        }
    }

    /// Per-category safety verdicts the backend attached to a blocked body.
    pub fn buffered_safety_ratings(&self, body: &Value) -> Option<Value> {
        match self {
            ProtocolKind::ChatCompletions => None,
            ProtocolKind::GenerateContent => generate_content::buffered_safety_ratings(body),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat-completions" | "chat_completions" | "openai" => Ok(ProtocolKind::ChatCompletions),
            "generate-content" | "generate_content" | "gemini" => Ok(ProtocolKind::GenerateContent),
            other => Err(BackendError::Configuration(format!(
                "unrecognized protocol kind `{other}`"
            ))),
        }
    }
}

/// Immutable connection and protocol description of one upstream.
#[derive(Clone)]
pub struct BackendDescriptor {
    id: String,
    protocol: ProtocolKind,
    base_url: String,
    model: String,
    streamable: bool,
    requires_credential: bool,
    credential: Option<String>,
}

impl BackendDescriptor {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            id: settings.id,
            protocol: settings.protocol,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            model: settings.model,
            streamable: settings.streamable,
            requires_credential: settings.requires_credential,
            credential: settings.credential.filter(|value| !value.is_empty()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn streamable(&self) -> bool {
        self.streamable
    }

    pub fn requires_credential(&self) -> bool {
        self.requires_credential
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Credential to send upstream. Fails when one is required but was never configured.
    pub fn credential(&self) -> Result<Option<&str>, BackendError> {
        match (&self.credential, self.requires_credential) {
            (Some(credential), _) => Ok(Some(credential.as_str())),
            (None, true) => Err(BackendError::CredentialMissing {
                backend: self.id.clone(),
            }),
            (None, false) => Ok(None),
        }
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("streamable", &self.streamable)
            .field("requires_credential", &self.requires_credential)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("credential for backend `{backend}` is not configured on the server")]
    CredentialMissing { backend: String },
    #[error("backend configuration error: {0}")]
    Configuration(String),
    #[error("backend `{backend}` unavailable: {message}")]
    Unavailable { backend: String, message: String },
    #[error("backend `{backend}` returned status {status}")]
    Upstream {
        backend: String,
        status: u16,
        detail: Value,
    },
    #[error("content generation blocked by backend `{backend}`: {reason}")]
    ContentBlocked {
        backend: String,
        reason: String,
        safety_ratings: Option<Value>,
    },
    #[error("backend `{backend}` stream failed: {message}")]
    Stream { backend: String, message: String },
}

impl BackendError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::CredentialMissing { .. } => "credential_missing",
            BackendError::Configuration(_) => "configuration",
            BackendError::Unavailable { .. } => "unavailable",
            BackendError::Upstream { .. } => "upstream_status",
            BackendError::ContentBlocked { .. } => "content_blocked",
            BackendError::Stream { .. } => "stream",
        }
    }
}
