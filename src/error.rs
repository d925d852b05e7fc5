use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Booking failures callers can act on, plus the storage catch-all.
///
/// `Conflict` and `WindowClosed` are terminal for the attempt: the caller
/// must re-query availability or contact the shop, never blind-retry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Invalid(String),

    #[error("That time is no longer available. Please pick another slot.")]
    Conflict,

    #[error("The reschedule window has closed. Please contact the shop directly.")]
    WindowClosed,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Not found.")]
    NotFound,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Invalid(_) | EngineError::WindowClosed => StatusCode::BAD_REQUEST,
            EngineError::Conflict | EngineError::InvalidTransition(_) => StatusCode::CONFLICT,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::Config(_) | EngineError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            EngineError::Storage(err) => {
                log::error!("Storage error: {err}");
                "Something went wrong. Please try again.".to_string()
            }
            EngineError::Config(err) => {
                log::error!("Configuration error: {err}");
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}
