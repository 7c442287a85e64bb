use crate::error::ServerResult;
use crate::state::ServerState;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Form;
use serde::Deserialize;
use std::sync::Arc;
use studio_import::{parse_payload, validate, Rejection};

/// Form body posted by the build service
#[derive(Debug, Deserialize)]
pub struct WebhookForm {
    /// JSON-encoded notification
    #[serde(default)]
    pub payload: Option<String>,
}

/// Receive a build notification and schedule its import.
///
/// Answers as soon as the import task is spawned; the import's own success
/// or failure only shows up in the logs.
///
/// | Outcome | Status | Body |
/// |---------|--------|------|
/// | import scheduled | 200 | empty |
/// | event or image type not handled | 200 | `<message>` |
/// | missing or malformed field | 400 | `Error: <message>` |
pub async fn receive_notification(
    State(state): State<Arc<ServerState>>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> ServerResult<StatusCode> {
    let Form(form) = form.map_err(|rejection| {
        tracing::error!(error = %rejection, "Bad request (400): unreadable form body");
        Rejection::InvalidPayload(rejection.body_text())
    })?;

    tracing::info!(payload = ?form.payload, "Processing request");

    let Some(payload) = form.payload else {
        let rejection = Rejection::MissingField("[payload]");
        tracing::error!(error = %rejection, "Bad request (400)");
        return Err(rejection.into());
    };

    let raw = parse_payload(&payload)?;
    let notification = validate(&raw)?;
    let strategy = notification.strategy();
    let scheduled = state.supervisor.schedule(notification, strategy);

    tracing::debug!(
        task_id = %scheduled.task_id,
        tracked = scheduled.tracked,
        "Import handed to background task"
    );
    Ok(StatusCode::OK)
}
