//! OpenAI-compatible chat completions, as served by local model runners.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    backend::{BackendDescriptor, BackendError, ProtocolKind},
    models::AbstractRequest,
    stream::StreamRecord,
    translate::{compose_prompt, parse_url, UpstreamRequest, TEMPERATURE},
};

pub(crate) const DONE_SENTINEL: &str = "[DONE]";
const CONTENT_FILTER: &str = "content_filter";

pub(crate) fn build_request(
    descriptor: &BackendDescriptor,
    request: &AbstractRequest,
    credential: Option<&str>,
) -> Result<UpstreamRequest, BackendError> {
    let url = parse_url(&format!("{}/chat/completions", descriptor.base_url()))?;

    let mut headers = HeaderMap::new();
    if let Some(credential) = credential {
        let value = HeaderValue::from_str(&format!("Bearer {credential}")).map_err(|_| {
            BackendError::Configuration(format!(
                "credential for backend `{}` is not a valid header value",
                descriptor.id()
            ))
        })?;
        headers.insert(AUTHORIZATION, value);
    }
    if descriptor.streamable() {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }

    let body = json!({
        "model": descriptor.model(),
        "messages": [
            {"role": "system", "content": request.instruction},
            {"role": "user", "content": compose_prompt(request)}
        ],
        "stream": descriptor.streamable(),
        "temperature": TEMPERATURE
    });

    Ok(UpstreamRequest {
        backend: descriptor.id().to_owned(),
        protocol: ProtocolKind::ChatCompletions,
        url,
        headers,
        body,
        streaming: descriptor.streamable(),
    })
}

pub(crate) fn parse_stream_line(line: &str) -> Result<Option<StreamRecord>, serde_json::Error> {
    let chunk: ChatStreamChunk = serde_json::from_str(line)?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    if choice.finish_reason.as_deref() == Some(CONTENT_FILTER) {
        return Ok(Some(StreamRecord::Blocked(CONTENT_FILTER.to_owned())));
    }

    Ok(choice
        .delta
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty())
        .map(StreamRecord::Text))
}

pub(crate) fn buffered_block_reason(body: &Value) -> Option<String> {
    let filtered = body
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        == Some(CONTENT_FILTER);
    let has_content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .is_some_and(|content| !content.is_empty());

    (filtered && !has_content).then(|| CONTENT_FILTER.to_owned())
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: Option<ChatDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}
