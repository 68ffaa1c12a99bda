//! Payment-gated creation of events and bookings.
//!
//! A draft is stored before the user leaves for hosted checkout and is only
//! submitted once the returned checkout session reports `complete` and
//! names that draft as its reference. A session that already paid for a
//! created resource is refused. The draft is cleared on success and kept on
//! every failure so the user can retry or contact support.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, KEY_PENDING_BOOKING_ID, KEY_PENDING_SESSION_ID};
use crate::drafts::{DraftSource, DraftStore};
use crate::error::{AuthError, ClientError, ValidationError};
use crate::model::{DraftKind, PendingDraft};
use crate::services::{resource_id_of, BillingService, CheckoutRequest, ResourceService};
use crate::session::Session;
use crate::validation;

pub const CHECKOUT_SESSION_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

pub const SUPPORT_GUIDANCE: &str = "Your payment was successful but we could not finish creating \
it. Please contact support with your payment reference; do not pay again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaState {
    Idle,
    AwaitingPayment,
    VerifyingPayment,
    CreatingResource,
    Created,
    Failed,
}

impl SagaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Idle => "idle",
            SagaState::AwaitingPayment => "awaiting_payment",
            SagaState::VerifyingPayment => "verifying_payment",
            SagaState::CreatingResource => "creating_resource",
            SagaState::Created => "created",
            SagaState::Failed => "failed",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Neither storage tier holds a draft of this kind.
    MissingDraft,
    /// The checkout session could not be retrieved.
    Verification { message: String },
    /// The checkout session exists but is not `complete`.
    PaymentIncomplete { status: String },
    /// The session was paid for a different draft, or carries no reference.
    SessionMismatch { session_id: String },
    /// The session already paid for a created resource.
    SessionAlreadyUsed { session_id: String },
    Unauthenticated(AuthError),
    /// Payment went through but the backend refused the resource.
    CreationAfterPayment { message: String },
}

impl FailureReason {
    pub fn message(&self) -> String {
        match self {
            FailureReason::MissingDraft => {
                "No pending data found. Please start again.".to_string()
            }
            FailureReason::Verification { message } => {
                format!("Could not verify payment: {}", message)
            }
            FailureReason::PaymentIncomplete { status } => {
                format!("Payment not completed (status: {})", status)
            }
            FailureReason::SessionMismatch { session_id } => format!(
                "Checkout session {} was not paid for this draft. Please complete payment again.",
                session_id
            ),
            FailureReason::SessionAlreadyUsed { session_id } => format!(
                "Checkout session {} has already been used. Please start a new payment.",
                session_id
            ),
            FailureReason::Unauthenticated(err) => err.to_string(),
            FailureReason::CreationAfterPayment { message } => message.clone(),
        }
    }

    /// Extra guidance shown alongside the message, if any.
    pub fn support_guidance(&self) -> Option<&'static str> {
        match self {
            FailureReason::CreationAfterPayment { .. } => Some(SUPPORT_GUIDANCE),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SagaOutcome {
    /// A completion for this saga started within the cooldown window.
    AlreadyProcessing,
    Created { resource_id: String, resource: Value },
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct SagaReport {
    pub kind: DraftKind,
    pub draft_id: Option<Uuid>,
    pub transitions: Vec<(SagaState, SagaState)>,
    pub outcome: SagaOutcome,
}

impl SagaReport {
    fn new(kind: DraftKind) -> Self {
        Self {
            kind,
            draft_id: None,
            transitions: Vec::new(),
            outcome: SagaOutcome::AlreadyProcessing,
        }
    }

    pub fn final_state(&self) -> Option<SagaState> {
        self.transitions.last().map(|(_, to)| *to)
    }

    fn step(&mut self, from: SagaState, to: SagaState) {
        info!(kind = self.kind.as_str(), draft_id = ?self.draft_id, %from, %to, "saga transition");
        self.transitions.push((from, to));
    }

    fn fail(mut self, from: SagaState, reason: FailureReason) -> Self {
        self.step(from, SagaState::Failed);
        self.outcome = SagaOutcome::Failed(reason);
        self
    }
}

/// Result of starting checkout.
#[derive(Debug, Clone)]
pub struct CheckoutStarted {
    pub draft_id: Uuid,
    pub redirect_url: String,
    pub transitions: Vec<(SagaState, SagaState)>,
}

#[derive(Debug, Error)]
pub enum BeginError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to start checkout: {0}")]
    Checkout(#[from] ClientError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Default)]
struct GuardState {
    in_flight: bool,
    last_started: Option<Instant>,
}

/// In-process duplicate-completion guard.
///
/// Refuses while a completion is running and for `cooldown` after one
/// started. Not shared across processes.
#[derive(Debug)]
pub struct ProcessingGuard {
    cooldown: Duration,
    state: Mutex<GuardState>,
}

/// Held for the duration of one completion.
#[derive(Debug)]
pub struct GuardTicket<'a> {
    guard: &'a ProcessingGuard,
}

impl Drop for GuardTicket<'_> {
    fn drop(&mut self) {
        self.guard
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .in_flight = false;
    }
}

impl ProcessingGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn try_acquire(&self) -> Option<GuardTicket<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.in_flight {
            return None;
        }
        if let Some(started) = state.last_started {
            if started.elapsed() < self.cooldown {
                return None;
            }
        }
        state.in_flight = true;
        state.last_started = Some(Instant::now());
        Some(GuardTicket { guard: self })
    }
}

pub struct PaymentSaga {
    drafts: Arc<DraftStore>,
    billing: Arc<dyn BillingService>,
    resources: Arc<dyn ResourceService>,
    session: Arc<Session>,
    origin: String,
    guard: ProcessingGuard,
}

impl fmt::Debug for PaymentSaga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentSaga")
            .field("origin", &self.origin)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

/// Return URL for hosted checkout; the provider fills in the session id.
pub fn success_url(origin: &str, kind: DraftKind, draft_id: &Uuid) -> String {
    let path = match kind {
        DraftKind::Event => "create/success",
        DraftKind::Booking => "bookings/success",
    };
    format!(
        "{}/{}?session_id={}&draft={}",
        origin.trim_end_matches('/'),
        path,
        CHECKOUT_SESSION_PLACEHOLDER,
        draft_id
    )
}

impl PaymentSaga {
    pub fn new(
        drafts: Arc<DraftStore>,
        billing: Arc<dyn BillingService>,
        resources: Arc<dyn ResourceService>,
        session: Arc<Session>,
        origin: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            drafts,
            billing,
            resources,
            session,
            origin: origin.into(),
            guard: ProcessingGuard::new(cooldown),
        }
    }

    /// Validate and store a draft, then open a hosted-checkout session for it.
    #[instrument(skip_all, fields(kind = kind.as_str(), amount_cents = amount_cents))]
    pub async fn begin(
        &self,
        kind: DraftKind,
        mut payload: Value,
        amount_cents: i64,
        description: Option<String>,
    ) -> Result<CheckoutStarted, BeginError> {
        validation::validate_payload(kind, &payload)?;
        if amount_cents <= 0 {
            return Err(ValidationError::Invalid("amount must be greater than zero").into());
        }

        let draft_id = Uuid::new_v4();
        if kind == DraftKind::Event {
            if let Some(obj) = payload.as_object_mut() {
                let has_id = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map_or(false, |s| !s.is_empty());
                if !has_id {
                    obj.insert("id".into(), Value::String(draft_id.to_string()));
                }
            }
        }
        let draft = PendingDraft {
            id: draft_id,
            ..PendingDraft::new(kind, payload)
        };
        self.drafts.save(&draft).await?;
        if kind == DraftKind::Booking {
            db::storage_set(self.drafts.pool(), KEY_PENDING_BOOKING_ID, &draft_id.to_string())
                .await?;
        }

        let request = CheckoutRequest {
            reference_id: draft_id.to_string(),
            amount: amount_cents,
            description,
            success_url: success_url(&self.origin, kind, &draft_id),
        };
        let redirect_url = match self.billing.create_checkout_session(kind, &request).await {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, %draft_id, "checkout session creation failed; draft kept");
                return Err(err.into());
            }
        };
        info!(%draft_id, amount_cents, "redirecting to hosted checkout");
        Ok(CheckoutStarted {
            draft_id,
            redirect_url,
            transitions: vec![(SagaState::Idle, SagaState::AwaitingPayment)],
        })
    }

    /// Handle the return from hosted checkout carrying `session_id`.
    #[instrument(skip_all, fields(kind = kind.as_str(), session_id = %session_id))]
    pub async fn complete(&self, kind: DraftKind, session_id: &str) -> Result<SagaReport> {
        let mut report = SagaReport::new(kind);
        let Some(_ticket) = self.guard.try_acquire() else {
            info!(session_id, "completion already in progress; ignoring");
            return Ok(report);
        };

        report.step(SagaState::AwaitingPayment, SagaState::VerifyingPayment);
        let Some((draft, source)) = self.drafts.load(kind).await? else {
            warn!("no pending draft in memory or storage");
            return Ok(report.fail(SagaState::VerifyingPayment, FailureReason::MissingDraft));
        };
        report.draft_id = Some(draft.id);
        if source == DraftSource::Storage {
            info!(draft_id = %draft.id, "draft recovered from durable storage");
        }

        let used = db::checkout_session_used(self.drafts.pool(), session_id).await?;
        if let Some(resource_id) = used {
            warn!(session_id, %resource_id, "checkout session already paid for a created resource");
            let reason = FailureReason::SessionAlreadyUsed {
                session_id: session_id.to_string(),
            };
            return Ok(report.fail(SagaState::VerifyingPayment, reason));
        }

        let checkout = match self.billing.retrieve_checkout_session(session_id).await {
            Ok(c) => c,
            Err(err) => {
                warn!(
                    error = %err,
                    status = ?err.status(),
                    session_id,
                    "checkout session lookup failed"
                );
                let reason = FailureReason::Verification {
                    message: err.user_message(),
                };
                return Ok(report.fail(SagaState::VerifyingPayment, reason));
            }
        };
        if !checkout.is_complete() {
            warn!(session_id, status = checkout.status_label(), "payment not complete");
            let reason = FailureReason::PaymentIncomplete {
                status: checkout.status_label().to_string(),
            };
            return Ok(report.fail(SagaState::VerifyingPayment, reason));
        }
        if !checkout.belongs_to(&draft.id) {
            warn!(
                session_id,
                draft_id = %draft.id,
                reference = ?checkout.reference_id(),
                "checkout session was opened for another draft"
            );
            let reason = FailureReason::SessionMismatch {
                session_id: session_id.to_string(),
            };
            return Ok(report.fail(SagaState::VerifyingPayment, reason));
        }

        self.drafts
            .attach_checkout_session(kind, session_id)
            .await
            .context("failed to record checkout session on draft")?;
        if kind == DraftKind::Booking {
            db::storage_set(self.drafts.pool(), KEY_PENDING_SESSION_ID, session_id).await?;
        }
        report.step(SagaState::VerifyingPayment, SagaState::CreatingResource);

        let creds = match self.session.credentials().await {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "no usable session for creation");
                return Ok(report.fail(
                    SagaState::CreatingResource,
                    FailureReason::Unauthenticated(err),
                ));
            }
        };

        match self
            .resources
            .create_resource(kind, &draft.payload, &creds)
            .await
        {
            Ok(created) => {
                let resource_id = resource_id_of(&created).unwrap_or_else(|| draft.id.to_string());
                let pool = self.drafts.pool();
                if let Err(err) =
                    db::mark_checkout_session_used(pool, session_id, &resource_id).await
                {
                    error!(?err, session_id, %resource_id, "failed to record used checkout session");
                }
                if let Err(err) = self.clear_pending(kind).await {
                    error!(
                        ?err,
                        draft_id = %draft.id,
                        %resource_id,
                        "resource created but pending draft could not be cleared"
                    );
                }
                report.step(SagaState::CreatingResource, SagaState::Created);
                info!(%resource_id, "resource created");
                report.outcome = SagaOutcome::Created {
                    resource_id,
                    resource: created,
                };
                Ok(report)
            }
            Err(err) => {
                error!(
                    error = %err,
                    draft_id = %draft.id,
                    session_id,
                    "creation failed after successful payment"
                );
                let reason = FailureReason::CreationAfterPayment {
                    message: err.user_message(),
                };
                Ok(report.fail(SagaState::CreatingResource, reason))
            }
        }
    }

    async fn clear_pending(&self, kind: DraftKind) -> Result<bool> {
        let removed = self.drafts.clear(kind).await?;
        if kind == DraftKind::Booking {
            let pool = self.drafts.pool();
            db::storage_remove(pool, KEY_PENDING_BOOKING_ID).await?;
            db::storage_remove(pool, KEY_PENDING_SESSION_ID).await?;
        }
        Ok(removed)
    }

    /// Drop the pending draft of `kind` without creating anything.
    pub async fn abandon(&self, kind: DraftKind) -> Result<bool> {
        let removed = self.clear_pending(kind).await?;
        info!(kind = kind.as_str(), removed, "pending draft abandoned");
        Ok(removed)
    }
}
