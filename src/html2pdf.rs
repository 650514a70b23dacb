use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{AppState, error::HttpError};

pub const DEFAULT_FILENAME: &str = "resume.pdf";

#[derive(Debug, Default, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl RenderRequest {
    /// An empty body is read as `{}` so it fails on the missing HTML instead.
    pub fn from_body(body: &[u8]) -> Result<Self, HttpError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| HttpError::InvalidBody(e.to_string()))
    }
}

pub async fn generate_pdf(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<Response, HttpError> {
    let request = RenderRequest::from_body(&body)?;

    let html = match request.html {
        Some(html) if !html.is_empty() => html,
        _ => return Err(HttpError::MissingHtml),
    };
    let filename = request.filename.as_deref().unwrap_or(DEFAULT_FILENAME);

    tracing::info!(html_bytes = html.len(), "generating pdf");
    let pdf_bytes = app_state.browser_pool.print_to_pdf(&html).await?;
    tracing::info!(pdf_bytes = pdf_bytes.len(), "pdf generated");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(filename)),
        ],
        pdf_bytes,
    )
        .into_response())
}

/// `attachment` disposition for a client-chosen name.
///
/// The name is only ever a header value. Characters that could break out of
/// the quoted string or the header line are replaced, and non-ASCII names
/// get an RFC 5987 `filename*` parameter next to an ASCII fallback.
pub fn content_disposition(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = if cleaned.trim().is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned
    };

    if cleaned.is_ascii() {
        return format!("attachment; filename=\"{}\"", cleaned);
    }

    let fallback: String = cleaned
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(&cleaned)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_filename_is_kept() {
        assert_eq!(
            content_disposition("cv.pdf"),
            "attachment; filename=\"cv.pdf\""
        );
    }

    #[test]
    fn test_header_injection_is_neutralised() {
        let value = content_disposition("a.pdf\"\r\nSet-Cookie: x=1");

        assert!(!value.contains('\r'));
        assert!(!value.contains('\n'));
        assert_eq!(value, "attachment; filename=\"a.pdf___Set-Cookie: x=1\"");
    }

    #[test]
    fn test_path_is_opaque_text() {
        assert_eq!(
            content_disposition("../../etc/passwd"),
            "attachment; filename=\"../../etc/passwd\""
        );
    }

    #[test]
    fn test_blank_filename_falls_back_to_default() {
        assert_eq!(
            content_disposition("  "),
            "attachment; filename=\"resume.pdf\""
        );
        assert_eq!(
            content_disposition("\n"),
            "attachment; filename=\"_\""
        );
    }

    #[test]
    fn test_unicode_filename_gets_extended_parameter() {
        let value = content_disposition("résumé.pdf");

        assert_eq!(
            value,
            "attachment; filename=\"r_sum_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
        assert!(axum::http::HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn test_request_parsing() {
        let request =
            RenderRequest::from_body(br#"{"html":"<p>x</p>","filename":"a.pdf"}"#).unwrap();
        assert_eq!(request.html.as_deref(), Some("<p>x</p>"));
        assert_eq!(request.filename.as_deref(), Some("a.pdf"));

        let empty = RenderRequest::from_body(b"").unwrap();
        assert!(empty.html.is_none());

        let null_name = RenderRequest::from_body(br#"{"html":"x","filename":null}"#).unwrap();
        assert!(null_name.filename.is_none());
    }

    #[test]
    fn test_wrong_types_are_invalid_body() {
        assert!(matches!(
            RenderRequest::from_body(br#"{"html":42}"#),
            Err(HttpError::InvalidBody(_))
        ));
        assert!(matches!(
            RenderRequest::from_body(b"<html></html>"),
            Err(HttpError::InvalidBody(_))
        ));
    }
}
