use std::fmt;

use reqwest::StatusCode;
use serde_json::{Error as JsonError, Value};

#[derive(Debug)]
pub enum AgentApiError {
    InvalidBaseUrl(String),
    /// Credential contains bytes that cannot travel in an HTTP header.
    InvalidCredential,
    /// The agent endpoint could not be reached at all.
    Unreachable(reqwest::Error),
    Status(StatusCode, String),
    /// HTTP 401 or an authentication fault: the send must be suspended until
    /// the user re-credentials.
    AuthRequired,
    /// HTTP 402 or the reserved payment fault code, carrying the
    /// session-start hint when the server attached one.
    PaymentRequired {
        data: Option<Value>,
    },
    /// Generic protocol-level fault object.
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    MalformedResponse(String),
    Serde(JsonError),
    Cancelled,
}

impl fmt::Display for AgentApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidCredential => {
                write!(f, "credential contains non-printable or non-ASCII bytes")
            }
            Self::Unreachable(error) => write!(f, "agent unreachable: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::AuthRequired => write!(f, "authentication required"),
            Self::PaymentRequired { .. } => write!(f, "payment required"),
            Self::Rpc { code, message, .. } => write!(f, "agent fault {code}: {message}"),
            Self::MalformedResponse(message) => write!(f, "malformed agent response: {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for AgentApiError {}

impl From<reqwest::Error> for AgentApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Unreachable(error)
    }
}

impl From<JsonError> for AgentApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

impl AgentApiError {
    /// Maps a non-2xx HTTP status to the matching typed error.
    ///
    /// 401 is treated identically to an authentication fault; 402 branches
    /// into the payment interrupt rather than surfacing a terminal error.
    pub(crate) fn from_http_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::AuthRequired,
            StatusCode::PAYMENT_REQUIRED => Self::PaymentRequired {
                data: serde_json::from_str(body).ok(),
            },
            _ => Self::Status(status, parse_error_message(status, body)),
        }
    }
}

/// Extracts a human-readable message from an HTTP error body, falling back to
/// the raw body or the canonical status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return text.to_owned();
                }
            }
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{parse_error_message, AgentApiError};

    #[test]
    fn http_401_maps_to_auth_required() {
        let error = AgentApiError::from_http_status(StatusCode::UNAUTHORIZED, "");
        assert!(matches!(error, AgentApiError::AuthRequired));
    }

    #[test]
    fn http_402_maps_to_payment_required_with_hint() {
        let error = AgentApiError::from_http_status(
            StatusCode::PAYMENT_REQUIRED,
            r#"{"amount":"0.10","currency":"USD"}"#,
        );
        match error {
            AgentApiError::PaymentRequired { data } => {
                let data = data.expect("session-start hint retained");
                assert_eq!(data["currency"], "USD");
            }
            other => panic!("expected PaymentRequired, got {other:?}"),
        }
    }

    #[test]
    fn other_statuses_keep_extracted_message() {
        let error = AgentApiError::from_http_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"message":"boom"}"#,
        );
        match error {
            AgentApiError::Status(status, message) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn error_message_falls_back_to_canonical_reason() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, ""),
            "Bad Gateway"
        );
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "upstream exploded"),
            "upstream exploded"
        );
    }
}
