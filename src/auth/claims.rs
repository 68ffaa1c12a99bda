//! Unverified reads of identity-token claims.
//!
//! The token was just issued to us over TLS by the provider, so only the
//! payload segment is decoded; signatures are checked by the backend services.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

const GROUPS_CLAIM: &str = "cognito:groups";
const USER_ID_CLAIM: &str = "custom:id";

/// Decode the JSON payload of a compact JWT.
pub fn decode_payload(jwt: &str) -> Option<Value> {
    let segment = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// First entry of the group claim, or `""`.
///
/// Users with several groups only keep the first one.
pub fn primary_role(id_token: &str) -> String {
    decode_payload(id_token)
        .as_ref()
        .and_then(|claims| claims.get(GROUPS_CLAIM))
        .and_then(|groups| match groups {
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Application user id carried in the identity token, if any.
pub fn user_id(id_token: &str) -> Option<String> {
    decode_payload(id_token)?
        .get(USER_ID_CLAIM)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) fn fake_jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_group_becomes_role() {
        let jwt = fake_jwt(&json!({ "cognito:groups": ["organiser", "attendee"] }));
        assert_eq!(primary_role(&jwt), "organiser");
    }

    #[test]
    fn missing_or_empty_groups_yield_empty_role() {
        assert_eq!(primary_role(&fake_jwt(&json!({ "sub": "x" }))), "");
        assert_eq!(primary_role(&fake_jwt(&json!({ "cognito:groups": [] }))), "");
        assert_eq!(primary_role("not-a-jwt"), "");
    }

    #[test]
    fn user_id_claim() {
        let jwt = fake_jwt(&json!({ "custom:id": "user-42" }));
        assert_eq!(user_id(&jwt).as_deref(), Some("user-42"));
        assert_eq!(user_id(&fake_jwt(&json!({}))), None);
    }

    #[test]
    fn padded_segment_is_accepted() {
        let body = base64::engine::general_purpose::URL_SAFE.encode(r#"{"cognito:groups":["a"]}"#);
        let jwt = format!("h.{}.s", body);
        assert_eq!(primary_role(&jwt), "a");
    }
}
