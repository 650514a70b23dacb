use axum::{
    extract::{Request, State},
    middleware,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::AppState;
use crate::error::HttpError;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Server misconfigured: missing API_KEY")]
    Misconfigured,

    #[error("Unauthorized")]
    Unauthorized,
}

/// Shared-secret check for the `x-api-key` header.
#[derive(Clone)]
pub struct ApiKeyGate {
    expected: Option<[u8; 32]>,
}

impl std::fmt::Debug for ApiKeyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyGate")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl ApiKeyGate {
    /// An empty or missing secret leaves the gate closed for everyone.
    pub fn new(api_key: Option<&str>) -> Self {
        let expected = api_key
            .filter(|key| !key.is_empty())
            .map(|key| Sha256::digest(key.as_bytes()).into());
        Self { expected }
    }

    pub fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    pub fn verify(&self, presented: Option<&[u8]>) -> Result<(), AuthError> {
        let expected = self.expected.as_ref().ok_or(AuthError::Misconfigured)?;
        let presented = presented.ok_or(AuthError::Unauthorized)?;

        // Compare fixed-size digests so timing depends on neither the
        // position of the first mismatch nor the secret's length.
        let digest: [u8; 32] = Sha256::digest(presented).into();
        let diff = expected
            .iter()
            .zip(digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if diff == 0 {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }
}

pub async fn auth_middleware(
    State(app_state): State<AppState>,
    request: Request,
    next: middleware::Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|value| value.as_bytes());

    match app_state.gate.verify(presented) {
        Ok(()) => next.run(request).await,
        Err(AuthError::Misconfigured) => {
            tracing::error!("API_KEY is not configured, refusing request");
            HttpError::from(AuthError::Misconfigured).into_response()
        }
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), "rejected request: {}", e);
            HttpError::from(e).into_response()
        }
    }
}
