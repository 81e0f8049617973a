use std::sync::Arc;

use futures_util::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    backend::{BackendError, ProtocolKind},
    errors::AppError,
    invoker::{ByteStream, UpstreamOutcome},
    metrics::RelayMetrics,
    models::AbstractRequest,
    state::AppState,
    stream::{StreamDecoder, StreamRecord},
    translate::translate,
};

pub type EventStream = BoxStream<'static, OutwardEvent>;

/// Event delivered to the caller.
///
/// A sequence is zero or more `Chunk`s followed by exactly one terminal event.
/// `Payload` only appears on its own, for structured non-streaming bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutwardEvent {
    Chunk { chunk: String },
    Done { done: bool },
    Error { error: String },
    Payload { payload: Value },
}

impl OutwardEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        OutwardEvent::Chunk { chunk: text.into() }
    }

    pub fn done() -> Self {
        OutwardEvent::Done { done: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutwardEvent::Error {
            error: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutwardEvent::Chunk { .. })
    }
}

pub enum RelayResponse {
    Events(Vec<OutwardEvent>),
    Stream(EventStream),
}

/// Runs one validated request through translate, invoke and relay.
///
/// Every failure returned here happens before any event reached the caller.
pub async fn run(state: &AppState, request: AbstractRequest, request_id: &str) -> Result<RelayResponse, AppError> {
    let descriptor = state
        .registry
        .resolve(&request.backend)
        .ok_or_else(|| AppError::UnknownBackend(request.backend.clone()))?;

    let outcome = async {
        let upstream = translate(&descriptor, &request)?;
        state.invoker.invoke(upstream).await
    }
    .await
    .inspect_err(|error| {
        state.metrics.observe_upstream_error(descriptor.id(), error.kind());
        warn!(request_id, backend = descriptor.id(), error = %error, "upstream call failed");
    })?;

    info!(
        request_id,
        backend = descriptor.id(),
        streaming = outcome.is_streaming(),
        "upstream accepted request"
    );

    match outcome {
        UpstreamOutcome::Streaming(upstream) => Ok(RelayResponse::Stream(relay_stream(
            descriptor.id().to_owned(),
            descriptor.protocol(),
            upstream,
            state.metrics.clone(),
            request_id.to_owned(),
        ))),
        UpstreamOutcome::Buffered(body) => {
            let events = relay_buffered(descriptor.id(), descriptor.protocol(), &body).inspect_err(|error| {
                state.metrics.observe_upstream_error(descriptor.id(), error.kind());
                warn!(request_id, backend = descriptor.id(), error = %error, "upstream response rejected");
            })?;
            info!(request_id, backend = descriptor.id(), bytes = body.len(), "buffered response relayed");
            Ok(RelayResponse::Events(events))
        }
    }
}

/// Turns a fully buffered upstream body into its event sequence.
pub fn relay_buffered(backend: &str, protocol: ProtocolKind, body: &[u8]) -> Result<Vec<OutwardEvent>, BackendError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(payload) => {
            if let Some(reason) = protocol.buffered_block_reason(&payload) {
                return Err(BackendError::ContentBlocked {
                    backend: backend.to_owned(),
                    reason,
                    safety_ratings: protocol.buffered_safety_ratings(&payload),
                });
            }
            Ok(vec![OutwardEvent::Payload { payload }])
        }
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_owned();
            Ok(vec![OutwardEvent::chunk(text), OutwardEvent::done()])
        }
    }
}

/// Relays a streaming upstream as chunk events followed by one terminal event.
///
/// Dropping the returned stream drops the upstream body, which releases the
/// outbound connection; this is how a disconnecting caller cancels the pipeline.
pub fn relay_stream(
    backend: String,
    protocol: ProtocolKind,
    mut upstream: ByteStream,
    metrics: Arc<RelayMetrics>,
    request_id: String,
) -> EventStream {
    let stream = async_stream::stream! {
        let mut decoder = StreamDecoder::new(protocol);
        let mut accounting = StreamAccounting::new(backend, request_id, metrics);
        let mut terminal = None;
        let mut finished = false;

        loop {
            let records = match upstream.next().await {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(error)) => {
                    warn!(
                        request_id = %accounting.request_id,
                        backend = %accounting.backend,
                        error = %error,
                        "upstream stream failed"
                    );
                    accounting.metrics.observe_upstream_error(&accounting.backend, error.kind());
                    terminal = Some(OutwardEvent::error(error.to_string()));
                    break;
                }
                None => {
                    finished = true;
                    decoder.finish()
                }
            };
            accounting.dropped_lines = decoder.dropped_lines();

            for record in records {
                match record {
                    StreamRecord::Text(text) => {
                        accounting.chunks += 1;
                        yield OutwardEvent::chunk(text);
                    }
                    StreamRecord::Blocked(reason) => {
                        let error = BackendError::ContentBlocked {
                            backend: accounting.backend.clone(),
                            reason,
                            safety_ratings: None,
                        };
                        warn!(
                            request_id = %accounting.request_id,
                            backend = %accounting.backend,
                            error = %error,
                            "stream blocked by backend"
                        );
                        accounting.metrics.observe_upstream_error(&accounting.backend, error.kind());
                        terminal = Some(OutwardEvent::error(error.to_string()));
                        break;
                    }
                }
            }

            if finished || terminal.is_some() {
                break;
            }
        }

        drop(upstream);
        accounting.completed = true;
        yield terminal.unwrap_or_else(OutwardEvent::done);
    };

    stream.boxed()
}

/// Per-stream counters, recorded when the relay generator is dropped.
///
/// The generator owns it, so a caller that disconnects mid-stream still has
/// its chunks and dropped lines accounted for.
struct StreamAccounting {
    backend: String,
    request_id: String,
    metrics: Arc<RelayMetrics>,
    chunks: u64,
    dropped_lines: u64,
    completed: bool,
}

impl StreamAccounting {
    fn new(backend: String, request_id: String, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            backend,
            request_id,
            metrics,
            chunks: 0,
            dropped_lines: 0,
            completed: false,
        }
    }
}

impl Drop for StreamAccounting {
    fn drop(&mut self) {
        self.metrics
            .observe_stream(&self.backend, self.chunks, self.dropped_lines);
        if self.completed {
            info!(
                request_id = %self.request_id,
                backend = %self.backend,
                chunks = self.chunks,
                dropped_lines = self.dropped_lines,
                "stream relayed"
            );
        } else {
            info!(
                request_id = %self.request_id,
                backend = %self.backend,
                chunks = self.chunks,
                dropped_lines = self.dropped_lines,
                "stream cancelled before terminal event"
            );
        }
    }
}
