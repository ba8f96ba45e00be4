//! Request-layer error taxonomy and RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// The API reports failures in this envelope; the client reads `detail` (or
/// `title`) to build a user-facing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Failure of a user-initiated mutation, as classified by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("authentication expired: {0}")]
    AuthExpired(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl RequestError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = try_problem_detail(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });
        match status {
            401 | 403 => RequestError::AuthExpired(message),
            404 | 410 => RequestError::NotFound(message),
            400 | 409 | 422 => RequestError::Validation(message),
            _ => RequestError::Server { status, message },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, RequestError::AuthExpired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_detail_preferred_over_title() {
        let body = r#"{"type":"about:blank","title":"Unauthorized","status":401,"detail":"token expired"}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("token expired"));
    }

    #[test]
    fn test_problem_title_when_detail_blank() {
        let body = r#"{"type":"about:blank","title":"Not Found","status":404,"detail":"  "}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Not Found"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            RequestError::from_status(401, ""),
            RequestError::AuthExpired("HTTP 401".to_string())
        );
        assert!(matches!(RequestError::from_status(404, "gone"), RequestError::NotFound(m) if m == "gone"));
        assert!(matches!(RequestError::from_status(422, ""), RequestError::Validation(_)));
        assert!(matches!(
            RequestError::from_status(503, ""),
            RequestError::Server { status: 503, .. }
        ));
    }
}
