use std::fmt;

use reqwest::{header::HeaderMap, Url};
use serde_json::Value;

use crate::{
    backend::{chat_completions, generate_content, BackendDescriptor, BackendError, ProtocolKind},
    models::AbstractRequest,
};

/// Sampling temperature sent to every backend; structuring wants near-deterministic output.
pub const TEMPERATURE: f64 = 0.1;

const OUTPUT_FORMAT_RULE: &str = "Return ONLY the raw Markdown syntax of the result. \
     Do NOT wrap it in code fences (```) or format it as a code block.";

/// A concrete outbound call, built fresh for each request.
pub struct UpstreamRequest {
    pub backend: String,
    pub protocol: ProtocolKind,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Value,
    pub streaming: bool,
}

impl UpstreamRequest {
    /// URL without its query string, which may carry a credential.
    pub fn redacted_url(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.to_string()
    }
}

impl fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamRequest")
            .field("backend", &self.backend)
            .field("protocol", &self.protocol)
            .field("url", &self.redacted_url())
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

/// Builds the protocol-specific upstream request for `request`.
///
/// Fails before building anything when a required credential is missing.
pub fn translate(
    descriptor: &BackendDescriptor,
    request: &AbstractRequest,
) -> Result<UpstreamRequest, BackendError> {
    let credential = descriptor.credential()?;
    match descriptor.protocol() {
        ProtocolKind::ChatCompletions => chat_completions::build_request(descriptor, request, credential),
        ProtocolKind::GenerateContent => generate_content::build_request(descriptor, request, credential),
    }
}

/// Instruction and document joined into the single user-facing prompt.
pub fn compose_prompt(request: &AbstractRequest) -> String {
    format!(
        "{}\n\nHere is the text to structure:\n---\n{}\n---\n{OUTPUT_FORMAT_RULE}",
        request.instruction, request.payload
    )
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, BackendError> {
    Url::parse(raw).map_err(|error| BackendError::Configuration(format!("invalid backend url `{raw}`: {error}")))
}

#[cfg(test)]
mod tests {
    use reqwest::header::AUTHORIZATION;

    use super::*;
    use crate::config::BackendSettings;

    fn descriptor(protocol: ProtocolKind, streamable: bool, credential: Option<&str>) -> BackendDescriptor {
        BackendDescriptor::new(BackendSettings {
            id: "test".to_owned(),
            protocol,
            base_url: "https://llm.example.test/v1/".to_owned(),
            model: "model-x".to_owned(),
            streamable,
            requires_credential: protocol == ProtocolKind::GenerateContent,
            credential: credential.map(ToOwned::to_owned),
        })
    }

    fn request() -> AbstractRequest {
        AbstractRequest {
            instruction: "Make a table".to_owned(),
            payload: "Q1. What is 2+2?".to_owned(),
            backend: "test".to_owned(),
        }
    }

    #[test]
    fn chat_completions_body_has_system_and_user_messages() {
        let upstream = translate(&descriptor(ProtocolKind::ChatCompletions, true, None), &request())
            .expect("translation should succeed");

        assert_eq!(upstream.url.as_str(), "https://llm.example.test/v1/chat/completions");
        assert!(upstream.streaming);
        assert!(upstream.headers.get(AUTHORIZATION).is_none());
        assert_eq!(upstream.body["model"], "model-x");
        assert_eq!(upstream.body["stream"], true);
        assert_eq!(upstream.body["temperature"], TEMPERATURE);
        assert_eq!(upstream.body["messages"][0]["role"], "system");
        assert_eq!(upstream.body["messages"][0]["content"], "Make a table");
        assert_eq!(upstream.body["messages"][1]["role"], "user");
        assert_eq!(upstream.body["messages"][1]["content"], compose_prompt(&request()));
    }

    #[test]
    fn chat_completions_credential_travels_in_authorization_header() {
        let upstream = translate(
            &descriptor(ProtocolKind::ChatCompletions, false, Some("sk-local")),
            &request(),
        )
        .expect("translation should succeed");

        assert_eq!(
            upstream.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
            Some("Bearer sk-local")
        );
        assert_eq!(upstream.body["stream"], false);
        assert_eq!(upstream.url.query(), None);
    }

    #[test]
    fn generate_content_credential_travels_in_query() {
        let upstream = translate(
            &descriptor(ProtocolKind::GenerateContent, false, Some("g-key")),
            &request(),
        )
        .expect("translation should succeed");

        assert_eq!(
            upstream.url.as_str(),
            "https://llm.example.test/v1/models/model-x:generateContent?key=g-key"
        );
        assert!(upstream.headers.get(AUTHORIZATION).is_none());
        assert_eq!(upstream.body["contents"][0]["parts"][0]["text"], compose_prompt(&request()));
        assert_eq!(upstream.body["generationConfig"]["temperature"], TEMPERATURE);
        assert!(upstream.body.get("model").is_none());
    }

    #[test]
    fn generate_content_streaming_uses_stream_endpoint() {
        let upstream = translate(
            &descriptor(ProtocolKind::GenerateContent, true, Some("g-key")),
            &request(),
        )
        .expect("translation should succeed");

        assert_eq!(upstream.url.path(), "/v1/models/model-x:streamGenerateContent");
        assert_eq!(upstream.url.query(), Some("alt=sse&key=g-key"));
        assert!(!upstream.redacted_url().contains("g-key"));
        assert!(!format!("{upstream:?}").contains("g-key"));
    }

    #[test]
    fn prompt_places_format_rule_after_the_document() {
        let prompt = compose_prompt(&request());
        let document_end = prompt.rfind("---").expect("closing separator");
        let rule = prompt.find("code fences").expect("format rule present");
        assert!(prompt.starts_with("Make a table\n\n"));
        assert!(prompt.contains("---\nQ1. What is 2+2?\n---"));
        assert!(rule > document_end);
    }

    #[test]
    fn missing_required_credential_fails_translation() {
        let error = translate(&descriptor(ProtocolKind::GenerateContent, true, None), &request())
            .expect_err("credential is required");
        assert!(matches!(error, BackendError::CredentialMissing { .. }));
    }

    #[test]
    fn malformed_base_url_is_a_configuration_error() {
        let descriptor = BackendDescriptor::new(BackendSettings {
            id: "broken".to_owned(),
            protocol: ProtocolKind::ChatCompletions,
            base_url: "not a url".to_owned(),
            model: "m".to_owned(),
            streamable: false,
            requires_credential: false,
            credential: None,
        });
        let error = translate(&descriptor, &request()).expect_err("url should be rejected");
        assert!(matches!(error, BackendError::Configuration(_)));
    }
}
