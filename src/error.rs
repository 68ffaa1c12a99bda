use thiserror::Error;

/// Generic message used when an upstream failure carries no usable body.
pub const GENERIC_FAILURE: &str = "Unknown error";

/// Rejected form input. Raised before any network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must be non-empty")]
    Empty(&'static str),
    #[error("{field} is not a valid date-time: {value}")]
    BadDateTime { field: &'static str, value: String },
    #[error("start time must be before end time")]
    StartNotBeforeEnd,
    #[error("{0}")]
    Invalid(&'static str),
    #[error("password {0}")]
    WeakPassword(&'static str),
    #[error("payload does not match the {kind} schema: {reason}")]
    Schema { kind: &'static str, reason: String },
}

/// Missing or unusable credentials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("please sign in")]
    NotSignedIn,
    #[error("session expired, please sign in again")]
    RefreshFailed,
}

/// Failure talking to an external service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Refused or failed booking status change.
#[derive(Debug, Error)]
pub enum BookingUpdateError {
    #[error("booking cannot move from {from} to {to}")]
    NotAllowed { from: &'static str, to: &'static str },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ClientError {
    /// Message suitable for showing to the user verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Upstream { status, .. } => Some(*status),
            ClientError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Pull a human-readable message out of a failed response body.
///
/// Order: JSON `error`, JSON `detail`, raw body text, generic fallback.
pub fn extract_error_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for field in ["error", "detail"] {
            match map.get(field) {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => return s.clone(),
                Some(serde_json::Value::Null) | None => {}
                Some(serde_json::Value::String(_)) => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    if trimmed.is_empty() {
        GENERIC_FAILURE.to_string()
    } else {
        trimmed.to_string()
    }
}
