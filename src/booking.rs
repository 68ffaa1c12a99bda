//! Booking lifecycle transitions.
//!
//! The booking service is authoritative; this table only decides which
//! actions are offered to the user.

use crate::model::BookingStatus;

/// Statuses reachable from `current` in one step.
pub fn allowed_transitions(current: BookingStatus) -> &'static [BookingStatus] {
    match current {
        BookingStatus::Pending => &[BookingStatus::Confirmed, BookingStatus::Canceled],
        BookingStatus::Confirmed => &[BookingStatus::Refunded],
        BookingStatus::Canceled | BookingStatus::Refunded => &[],
    }
}

pub fn can_transition_to(current: BookingStatus, desired: BookingStatus) -> bool {
    allowed_transitions(current).contains(&desired)
}

pub fn is_terminal(status: BookingStatus) -> bool {
    allowed_transitions(status).is_empty()
}

/// User-facing action on an existing booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Confirm,
    Cancel,
    Refund,
}

impl BookingAction {
    pub fn target_status(&self) -> BookingStatus {
        match self {
            BookingAction::Confirm => BookingStatus::Confirmed,
            BookingAction::Cancel => BookingStatus::Canceled,
            BookingAction::Refund => BookingStatus::Refunded,
        }
    }

    /// Path segment of the booking-service endpoint for this action.
    pub fn endpoint(&self) -> &'static str {
        match self {
            BookingAction::Confirm => "confirm",
            BookingAction::Cancel => "cancel",
            BookingAction::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirm" | "complete" => Some(BookingAction::Confirm),
            "cancel" => Some(BookingAction::Cancel),
            "refund" => Some(BookingAction::Refund),
            _ => None,
        }
    }
}

/// Actions worth offering for a booking currently in `status`.
pub fn offered_actions(status: BookingStatus) -> Vec<BookingAction> {
    [BookingAction::Confirm, BookingAction::Cancel, BookingAction::Refund]
        .into_iter()
        .filter(|a| can_transition_to(status, a.target_status()))
        .collect()
}
