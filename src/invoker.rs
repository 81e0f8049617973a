use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{backend::BackendError, translate::UpstreamRequest};

const MAX_ERROR_TEXT: usize = 2000;

pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Successful upstream response, either still streaming or fully read.
pub enum UpstreamOutcome {
    Streaming(ByteStream),
    Buffered(Bytes),
}

impl UpstreamOutcome {
    pub fn is_streaming(&self) -> bool {
        matches!(self, UpstreamOutcome::Streaming(_))
    }
}

/// Performs exactly one outbound call per request; failures are never retried.
#[derive(Clone)]
pub struct UpstreamInvoker {
    client: reqwest::Client,
}

impl UpstreamInvoker {
    pub fn new(connect_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|error| {
                BackendError::Configuration(format!("failed to build upstream HTTP client: {error}"))
            })?;

        Ok(Self { client })
    }

    pub async fn invoke(&self, request: UpstreamRequest) -> Result<UpstreamOutcome, BackendError> {
        let backend = request.backend.clone();
        debug!(
            backend = %backend,
            protocol = %request.protocol,
            url = %request.redacted_url(),
            streaming = request.streaming,
            "invoking upstream"
        );

        let response = self
            .client
            .post(request.url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await
            .map_err(|error| BackendError::Unavailable {
                backend: backend.clone(),
                message: describe_send_error(&error),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(backend = %backend, status = status.as_u16(), "upstream returned failure status");
            return Err(BackendError::Upstream {
                backend,
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        if request.streaming {
            let stream = response
                .bytes_stream()
                .map(move |next| {
                    next.map_err(|error| BackendError::Stream {
                        backend: backend.clone(),
                        message: error.to_string(),
                    })
                })
                .boxed();
            return Ok(UpstreamOutcome::Streaming(stream));
        }

        let body = response.bytes().await.map_err(|error| BackendError::Unavailable {
            backend,
            message: format!("failed to read response body: {error}"),
        })?;
        Ok(UpstreamOutcome::Buffered(body))
    }
}

fn describe_send_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}

/// Best-effort structured detail of an upstream error body.
pub(crate) fn error_detail(body: &str) -> Value {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut object)) => match object.remove("error") {
            Some(error) => error,
            None => Value::Object(object),
        },
        Ok(other) => other,
        Err(_) => Value::String(body.trim().chars().take(MAX_ERROR_TEXT).collect()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn error_detail_prefers_nested_error_member() {
        let detail = error_detail(r#"{"error":{"code":503,"message":"overloaded","status":"UNAVAILABLE"}}"#);
        assert_eq!(detail, json!({"code":503,"message":"overloaded","status":"UNAVAILABLE"}));
    }

    #[test]
    fn error_detail_keeps_whole_object_without_error_member() {
        assert_eq!(error_detail(r#"{"detail":"nope"}"#), json!({"detail":"nope"}));
    }

    #[test]
    fn error_detail_falls_back_to_raw_text() {
        assert_eq!(error_detail("  Service Unavailable\n"), json!("Service Unavailable"));
        let long = "x".repeat(MAX_ERROR_TEXT + 10);
        assert_eq!(
            error_detail(&long).as_str().map(str::len),
            Some(MAX_ERROR_TEXT)
        );
    }
}
