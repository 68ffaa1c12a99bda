use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a ticket booking as reported by the booking service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
    Refunded,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Canceled => "CANCELED",
            BookingStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELED" => Some(BookingStatus::Canceled),
            "REFUNDED" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }
}

/// Which kind of paid resource a draft will become.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DraftKind {
    Event,
    Booking,
}

impl DraftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftKind::Event => "event",
            DraftKind::Booking => "booking",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(DraftKind::Event),
            "booking" => Some(DraftKind::Booking),
            _ => None,
        }
    }

    /// Durable storage key holding the pending draft of this kind.
    pub fn storage_key(&self) -> &'static str {
        match self {
            DraftKind::Event => crate::db::KEY_PENDING_EVENT,
            DraftKind::Booking => crate::db::KEY_PENDING_BOOKING,
        }
    }
}

/// A resource payload that has been filled in but not yet paid for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingDraft {
    pub id: Uuid,
    pub kind: DraftKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub checkout_session_id: Option<String>,
}

impl PendingDraft {
    pub fn new(kind: DraftKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            created_at: Utc::now(),
            checkout_session_id: None,
        }
    }
}

/// Status of a hosted checkout session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Open,
    Complete,
    Expired,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Open => "open",
            CheckoutStatus::Complete => "complete",
            CheckoutStatus::Expired => "expired",
        }
    }
}

/// Read-only view of a checkout session owned by the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSessionRef {
    pub id: String,
    /// `None` when the provider did not report a status.
    #[serde(default)]
    pub status: Option<CheckoutStatus>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Set at checkout creation; carries `event_id` or `booking_id`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionRef {
    /// Draft id the session was opened for, if the provider echoed it back.
    pub fn reference_id(&self) -> Option<&str> {
        ["event_id", "booking_id"]
            .iter()
            .filter_map(|k| self.metadata.get(*k))
            .chain(self.client_reference_id.as_ref())
            .map(String::as_str)
            .find(|s| !s.is_empty())
    }

    pub fn belongs_to(&self, draft_id: &Uuid) -> bool {
        self.reference_id() == Some(draft_id.to_string().as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.status == Some(CheckoutStatus::Complete)
    }

    pub fn status_label(&self) -> &'static str {
        self.status.map(|s| s.as_str()).unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_details: Option<String>,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organizer {
    pub id: String,
    pub username: String,
}

/// Payload accepted by the create-event service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<String>,
    pub venue: Venue,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub price: f64,
    pub organizer: Organizer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

/// Payload accepted by the booking service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingDraft {
    pub event_id: String,
    pub user_id: String,
    pub ticket_quantity: u32,
    pub email: String,
}

/// Booking as returned by the ticket management service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub event_id: String,
    pub user_id: String,
    pub status: BookingStatus,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
    #[serde(default)]
    pub total_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub booking_id: String,
    pub status: String,
}
