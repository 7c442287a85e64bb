use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use studio_import::Rejection;

pub type ServerResult<T> = Result<T, ServerError>;

/// Anything that ends a webhook request early.
///
/// Responses are plain text, one line: `Error: <message>` for real errors and
/// the bare message for ignored notifications, which still answer 200.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("Not found")]
    NotFound,
}

impl ServerError {
    /// Get HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Rejected(r) if r.is_ignored() => StatusCode::OK,
            ServerError::Rejected(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn body(&self) -> String {
        match self {
            ServerError::Rejected(r) if r.is_ignored() => format!("{self}\n"),
            _ => format!("Error: {self}\n"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status_code(), self.body()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_bad_request() {
        let err = ServerError::from(Rejection::MissingField("[payload][event]"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), "Error: Missing '[payload][event]'\n");
    }

    #[test]
    fn ignored_is_ok_without_error_prefix() {
        let err = ServerError::from(Rejection::Ignored("unsupported image type: oem".into()));
        assert_eq!(err.status_code(), StatusCode::OK);
        assert_eq!(err.body(), "unsupported image type: oem\n");
    }

    #[test]
    fn not_found_uses_error_prefix() {
        assert_eq!(ServerError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServerError::NotFound.body(), "Error: Not found\n");
    }
}
