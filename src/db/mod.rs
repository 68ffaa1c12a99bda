//! Durable client storage.
//!
//! This module is split into two submodules:
//! - `model`: row shapes returned by repositories.
//! - `repo`: SQL-only functions over the `client_storage` and
//!   `pending_drafts` tables.
//!
//! It stands in for the browser's durable storage: values survive process
//! restarts the way `localStorage` survives a full page navigation.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::DraftRow;

/// Storage key of the pending event draft.
pub const KEY_PENDING_EVENT: &str = "pending_event_data";
/// Storage key of the pending booking draft.
pub const KEY_PENDING_BOOKING: &str = "pending_booking_data";
/// Booking id awaiting payment confirmation.
pub const KEY_PENDING_BOOKING_ID: &str = "pendingBookingId";
/// Checkout session id of the payment in flight.
pub const KEY_PENDING_SESSION_ID: &str = "pendingSessionId";
/// Serialized session token shared between CLI runs.
pub const KEY_SESSION_TOKEN: &str = "session_token";
/// Prefix of the per-user interest prompt dismissal flag.
pub const KEY_INTEREST_PROMPT_PREFIX: &str = "interest_prompt_dismissed:";
/// Prefix of the marker for a checkout session that already paid for a resource.
pub const KEY_USED_SESSION_PREFIX: &str = "used_checkout_session:";
