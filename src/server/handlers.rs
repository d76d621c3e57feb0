use super::types::{ChatRequest, ChatResponse, ErrorResponse};
use crate::{Error, chat::ChatService};
use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const NO_INPUT_MESSAGE: &str = "No input provided";

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
}

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn error_reply(status: StatusCode, error: impl Into<String>) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Returns the trimmed-non-empty message, or the validation failure.
pub fn validate(request: ChatRequest) -> Result<String, Error> {
    match request.message {
        Some(message) if !message.trim().is_empty() => Ok(message),
        _ => Err(Error::validation(NO_INPUT_MESSAGE)),
    }
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ErrorReply> {
    let request_id = Uuid::new_v4();

    // Unreadable bodies are internal failures, not validation failures.
    let Json(request) = payload.map_err(|rejection| {
        warn!(%request_id, "Rejected chat request body: {}", rejection.body_text());
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, rejection.body_text())
    })?;

    let message = validate(request).map_err(|e| {
        info!(%request_id, "Rejected chat request: {}", e);
        error_reply(StatusCode::BAD_REQUEST, NO_INPUT_MESSAGE)
    })?;

    info!(%request_id, chars = message.chars().count(), "Received chat request");

    match state.chat.respond(message).await {
        Ok(response) => {
            info!(%request_id, "Successfully generated reply");
            Ok(Json(ChatResponse { response }))
        }
        Err(e) => {
            error!(%request_id, "Failed to generate reply: {}", e);
            Err(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
