use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hosted-checkout session request for one draft.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    /// Draft reference echoed back through the success URL and checkout metadata.
    pub reference_id: String,
    /// Minor units (cents).
    pub amount: i64,
    pub description: Option<String>,
    pub success_url: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct CheckoutUrlResp {
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct UploadResp {
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PaymentVerification {
    #[serde(alias = "success")]
    pub verified: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    Duplicate,
    Fraudulent,
    RequestedByCustomer,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefundRequest {
    pub payment_intent_id: String,
    /// Partial refund in cents; `None` refunds the full amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub reason: RefundReason,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Refund {
    #[serde(alias = "id")]
    pub refund_id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
}

/// Best-effort identifier of a freshly created resource.
pub fn resource_id_of(created: &Value) -> Option<String> {
    ["id", "event_id", "eventId", "booking_id", "bookingId"]
        .iter()
        .filter_map(|k| created.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
