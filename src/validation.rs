//! Local form validation. Nothing here touches the network.

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{BookingDraft, DraftKind, EventDraft};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9\s]").expect("valid symbol regex"));

pub const MIN_PASSWORD_LEN: usize = 8;

fn parse_date_time(field: &'static str, value: &str) -> Result<DateTime<FixedOffset>, ValidationError> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|_| ValidationError::BadDateTime {
        field,
        value: value.to_string(),
    })
}

pub fn validate_event(draft: &EventDraft) -> Result<(), ValidationError> {
    if draft.title.trim().is_empty() {
        return Err(ValidationError::Empty("title"));
    }
    if draft.start_date_time.trim().is_empty() {
        return Err(ValidationError::Empty("startDateTime"));
    }
    let start = parse_date_time("startDateTime", &draft.start_date_time)?;
    if let Some(end) = draft.end_date_time.as_deref().filter(|s| !s.trim().is_empty()) {
        let end = parse_date_time("endDateTime", end)?;
        if start >= end {
            return Err(ValidationError::StartNotBeforeEnd);
        }
    }
    if draft.venue.name.trim().is_empty() {
        return Err(ValidationError::Empty("venue.name"));
    }
    if !draft.price.is_finite() || draft.price < 0.0 {
        return Err(ValidationError::Invalid("price must be a non-negative amount"));
    }
    if draft.capacity == Some(0) {
        return Err(ValidationError::Invalid("capacity must be greater than zero"));
    }
    Ok(())
}

pub fn validate_booking(draft: &BookingDraft) -> Result<(), ValidationError> {
    if draft.event_id.trim().is_empty() {
        return Err(ValidationError::Empty("event_id"));
    }
    if draft.user_id.trim().is_empty() {
        return Err(ValidationError::Empty("user_id"));
    }
    if draft.ticket_quantity == 0 {
        return Err(ValidationError::Invalid("ticket_quantity must be at least 1"));
    }
    if !EMAIL_RE.is_match(draft.email.trim()) {
        return Err(ValidationError::Invalid("email is not a valid address"));
    }
    Ok(())
}

/// Password rules enforced at sign-up.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::WeakPassword("must be at least 8 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::WeakPassword("must contain an uppercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ValidationError::WeakPassword("must contain a lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::WeakPassword("must contain a digit"));
    }
    if !SYMBOL_RE.is_match(password) {
        return Err(ValidationError::WeakPassword("must contain a symbol"));
    }
    Ok(())
}

/// Check a raw payload against the typed schema of `kind` and its rules.
pub fn validate_payload(kind: DraftKind, payload: &Value) -> Result<(), ValidationError> {
    match kind {
        DraftKind::Event => {
            let draft: EventDraft =
                serde_json::from_value(payload.clone()).map_err(|e| ValidationError::Schema {
                    kind: "event",
                    reason: e.to_string(),
                })?;
            validate_event(&draft)
        }
        DraftKind::Booking => {
            let draft: BookingDraft =
                serde_json::from_value(payload.clone()).map_err(|e| ValidationError::Schema {
                    kind: "booking",
                    reason: e.to_string(),
                })?;
            validate_booking(&draft)
        }
    }
}
