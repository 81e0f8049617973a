use std::{
    convert::Infallible,
    time::{Duration, Instant},
};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use tracing::info;
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::StructureRequest,
    relay::{self, OutwardEvent, RelayResponse},
    state::AppState,
};

pub const STRUCTURE_PATH: &str = "/api/llm-structure";

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub async fn index() -> &'static str {
    "LLM structuring relay is running"
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn llm_structure(
    State(state): State<AppState>,
    request: Result<Json<StructureRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();
    let request_id = format!("req_{}", Uuid::new_v4());

    let (mut response, stream) = match process_structure(&state, request, &request_id).await {
        Ok(outcome) => outcome,
        Err(error) => (error.into_response(), false),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    state.metrics.observe_request(
        STRUCTURE_PATH,
        "POST",
        stream,
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

async fn process_structure(
    state: &AppState,
    request: Result<Json<StructureRequest>, JsonRejection>,
    request_id: &str,
) -> Result<(Response, bool), AppError> {
    let Json(request) = request.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let request = request.into_abstract().map_err(AppError::Validation)?;

    info!(
        request_id,
        backend = %request.backend,
        instruction_chars = request.instruction.chars().count(),
        payload_chars = request.payload.chars().count(),
        "structure request accepted"
    );

    match relay::run(state, request, request_id).await? {
        RelayResponse::Events(events) => Ok((Json(events).into_response(), false)),
        RelayResponse::Stream(events) => {
            let outbound = events.map(|event| Ok::<Event, Infallible>(json_event(&event)));
            let response = Sse::new(outbound)
                .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
                .into_response();
            Ok((response, true))
        }
    }
}

fn json_event(event: &OutwardEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(serialized) => Event::default().data(serialized),
        Err(error) => {
            let fallback = OutwardEvent::error(format!("serialization error: {error}"));
            let serialized = serde_json::to_string(&fallback)
                .unwrap_or_else(|_| r#"{"error":"serialization error"}"#.to_owned());
            Event::default().data(serialized)
        }
    }
}
