use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::engine::RenderError;

#[derive(Debug)]
pub enum HttpError {
    Misconfigured,
    Unauthorized,
    MissingHtml,
    InvalidBody(String),
    RenderFailed(RenderError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::Misconfigured | HttpError::RenderFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            HttpError::Unauthorized => StatusCode::FORBIDDEN,
            HttpError::MissingHtml | HttpError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(self) -> ErrorBody {
        match self {
            HttpError::Misconfigured => ErrorBody {
                error: "Server misconfigured: missing API_KEY",
                details: None,
            },
            HttpError::Unauthorized => ErrorBody {
                error: "Unauthorized",
                details: None,
            },
            HttpError::MissingHtml => ErrorBody {
                error: "Missing HTML content",
                details: None,
            },
            HttpError::InvalidBody(details) => ErrorBody {
                error: "Invalid JSON body",
                details: Some(details),
            },
            HttpError::RenderFailed(err) => ErrorBody {
                error: "PDF generation failed",
                details: Some(err.to_string()),
            },
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let HttpError::RenderFailed(err) = &self {
            tracing::error!("PDF generation failed: {}", err);
        }

        (status, Json(self.body())).into_response()
    }
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Misconfigured => HttpError::Misconfigured,
            AuthError::Unauthorized => HttpError::Unauthorized,
        }
    }
}

// Lets handlers use `?` on renderer calls.
impl From<RenderError> for HttpError {
    fn from(err: RenderError) -> Self {
        HttpError::RenderFailed(err)
    }
}
