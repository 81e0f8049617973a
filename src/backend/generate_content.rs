//! Google generative-language `generateContent` / `streamGenerateContent`.

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    backend::{BackendDescriptor, BackendError, ProtocolKind},
    models::AbstractRequest,
    stream::StreamRecord,
    translate::{compose_prompt, parse_url, UpstreamRequest, TEMPERATURE},
};

const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

pub(crate) fn build_request(
    descriptor: &BackendDescriptor,
    request: &AbstractRequest,
    credential: Option<&str>,
) -> Result<UpstreamRequest, BackendError> {
    let method = if descriptor.streamable() {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let mut url = parse_url(&format!(
        "{}/models/{}:{method}",
        descriptor.base_url(),
        descriptor.model()
    ))?;

    // an empty query_pairs_mut() would still leave a trailing `?`
    if descriptor.streamable() || credential.is_some() {
        let mut query = url.query_pairs_mut();
        if descriptor.streamable() {
            query.append_pair("alt", "sse");
        }
        if let Some(credential) = credential {
            query.append_pair("key", credential);
        }
    }

    let body = json!({
        "contents": [
            {"parts": [{"text": compose_prompt(request)}]}
        ],
        "generationConfig": {
            "temperature": TEMPERATURE
        }
    });

    Ok(UpstreamRequest {
        backend: descriptor.id().to_owned(),
        protocol: ProtocolKind::GenerateContent,
        url,
        headers: HeaderMap::new(),
        body,
        streaming: descriptor.streamable(),
    })
}

pub(crate) fn parse_stream_line(line: &str) -> Result<Option<StreamRecord>, serde_json::Error> {
    let chunk: GenerateChunk = serde_json::from_str(line)?;

    if let Some(reason) = chunk.prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Ok(Some(StreamRecord::Blocked(reason)));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text = candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .filter(|text| !text.is_empty());

    match (text, candidate.finish_reason) {
        (Some(text), _) => Ok(Some(StreamRecord::Text(text))),
        (None, Some(reason)) if is_blocking(&reason) => Ok(Some(StreamRecord::Blocked(reason))),
        (None, _) => Ok(None),
    }
}

pub(crate) fn buffered_block_reason(body: &Value) -> Option<String> {
    let has_text = body
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .is_some_and(|text| !text.is_empty());
    if has_text {
        return None;
    }

    body.pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
        .or_else(|| {
            body.pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .filter(|reason| is_blocking(reason))
        })
        .map(ToOwned::to_owned)
}

pub(crate) fn buffered_safety_ratings(body: &Value) -> Option<Value> {
    body.pointer("/promptFeedback/safetyRatings")
        .or_else(|| body.pointer("/candidates/0/safetyRatings"))
        .cloned()
}

fn is_blocking(reason: &str) -> bool {
    BLOCKING_FINISH_REASONS.contains(&reason)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_part_of_first_candidate() {
        let record = parse_stream_line(
            r#"{"candidates":[{"content":{"parts":[{"text":"| a |"},{"text":"ignored"}],"role":"model"}}]}"#,
        )
        .expect("valid json");
        assert_eq!(record, Some(StreamRecord::Text("| a |".to_owned())));
    }

    #[test]
    fn prompt_feedback_block_reason_is_a_block_signal() {
        let record = parse_stream_line(r#"{"promptFeedback":{"blockReason":"SAFETY","safetyRatings":[]}}"#)
            .expect("valid json");
        assert_eq!(record, Some(StreamRecord::Blocked("SAFETY".to_owned())));
    }

    #[test]
    fn safety_finish_without_text_is_a_block_signal() {
        let blocked = parse_stream_line(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).expect("valid json");
        let stopped = parse_stream_line(r#"{"candidates":[{"finishReason":"STOP"}]}"#).expect("valid json");
        assert_eq!(blocked, Some(StreamRecord::Blocked("SAFETY".to_owned())));
        assert_eq!(stopped, None);
    }

    #[test]
    fn buffered_block_reason_reads_prompt_feedback() {
        let blocked = json!({"promptFeedback": {"blockReason": "OTHER"}});
        let answered = json!({"candidates":[{"content":{"parts":[{"text":"X|Y"}]}}]});
        assert_eq!(buffered_block_reason(&blocked).as_deref(), Some("OTHER"));
        assert_eq!(buffered_block_reason(&answered), None);
    }

    #[test]
    fn safety_ratings_come_from_prompt_feedback() {
        let blocked = json!({"promptFeedback": {
            "blockReason": "SAFETY",
            "safetyRatings": [{"category": "HARM_CATEGORY_HARASSMENT", "probability": "HIGH"}]
        }});
        assert_eq!(
            buffered_safety_ratings(&blocked),
            Some(json!([{"category": "HARM_CATEGORY_HARASSMENT", "probability": "HIGH"}]))
        );
        assert_eq!(buffered_safety_ratings(&json!({"promptFeedback": {"blockReason": "OTHER"}})), None);
    }
}
