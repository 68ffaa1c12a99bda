use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mulan_client::auth::{TokenEndpoint, TokenGrant};
use mulan_client::booking::BookingAction;
use mulan_client::db;
use mulan_client::drafts::DraftStore;
use mulan_client::error::{extract_error_message, AuthError, ClientError};
use mulan_client::model::{
    Booking, CheckoutSessionRef, CheckoutStatus, DraftKind, PendingDraft,
};
use mulan_client::saga::{BeginError, FailureReason, PaymentSaga, SagaOutcome, SagaState};
use mulan_client::services::{
    BillingService, CheckoutRequest, PaymentVerification, Refund, RefundRequest, ResourceService,
};
use mulan_client::session::{Credentials, Session};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

struct NoRefresh;

#[async_trait]
impl TokenEndpoint for NoRefresh {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, ClientError> {
        panic!("token refresh not expected in saga tests");
    }
}

async fn signed_in_session() -> Arc<Session> {
    let session = Session::new(Arc::new(NoRefresh));
    session
        .login(TokenGrant {
            access_token: "access-1".into(),
            refresh_token: Some("refresh-1".into()),
            id_token: None,
            expires_in: 3600,
            token_type: Some("Bearer".into()),
        })
        .await
        .unwrap();
    Arc::new(session)
}

fn checkout(status: Option<CheckoutStatus>) -> Result<CheckoutSessionRef, ClientError> {
    Ok(CheckoutSessionRef {
        id: "cs_test_1".into(),
        status,
        payment_status: Some("paid".into()),
        amount_total: Some(1000),
        client_reference_id: None,
        metadata: HashMap::new(),
    })
}

fn paid_session(session_id: &str, metadata: HashMap<String, String>) -> CheckoutSessionRef {
    CheckoutSessionRef {
        id: session_id.into(),
        status: Some(CheckoutStatus::Complete),
        payment_status: Some("paid".into()),
        amount_total: Some(1000),
        client_reference_id: None,
        metadata,
    }
}

fn reference_metadata(key: &str, draft_id: &str) -> HashMap<String, String> {
    HashMap::from([(key.to_string(), draft_id.to_string())])
}

#[derive(Clone, Default)]
struct RecordingBilling {
    sessions: Arc<Mutex<VecDeque<Result<CheckoutSessionRef, ClientError>>>>,
    checkout_urls: Arc<Mutex<VecDeque<Result<String, ClientError>>>>,
    checkout_calls: Arc<Mutex<Vec<(DraftKind, CheckoutRequest)>>>,
    retrieve_calls: Arc<Mutex<Vec<String>>>,
    // session id -> metadata the provider echoes back
    opened: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
}

impl RecordingBilling {
    fn with_sessions(sessions: Vec<Result<CheckoutSessionRef, ClientError>>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(VecDeque::from(sessions))),
            ..Default::default()
        }
    }

    fn with_checkout_urls(urls: Vec<Result<String, ClientError>>) -> Self {
        Self {
            checkout_urls: Arc::new(Mutex::new(VecDeque::from(urls))),
            ..Default::default()
        }
    }

    /// Record that `session_id` was opened for `draft_id`.
    async fn open_session(&self, session_id: &str, draft_id: &Uuid) {
        self.opened.lock().await.insert(
            session_id.to_string(),
            reference_metadata("event_id", &draft_id.to_string()),
        );
    }

    async fn retrieve_calls(&self) -> Vec<String> {
        self.retrieve_calls.lock().await.clone()
    }

    async fn checkout_calls(&self) -> Vec<(DraftKind, CheckoutRequest)> {
        self.checkout_calls.lock().await.clone()
    }
}

#[async_trait]
impl BillingService for RecordingBilling {
    async fn create_checkout_session(
        &self,
        kind: DraftKind,
        req: &CheckoutRequest,
    ) -> Result<String, ClientError> {
        let mut calls = self.checkout_calls.lock().await;
        calls.push((kind, req.clone()));
        let session_id = format!("cs_test_{}", calls.len());
        if let Some(res) = self.checkout_urls.lock().await.pop_front() {
            return res;
        }
        let key = match kind {
            DraftKind::Event => "event_id",
            DraftKind::Booking => "booking_id",
        };
        self.opened
            .lock()
            .await
            .insert(session_id.clone(), reference_metadata(key, &req.reference_id));
        Ok(format!("https://checkout.example/pay/{}", session_id))
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionRef, ClientError> {
        self.retrieve_calls.lock().await.push(session_id.to_string());
        if let Some(res) = self.sessions.lock().await.pop_front() {
            return res;
        }
        let metadata = self
            .opened
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        Ok(paid_session(session_id, metadata))
    }

    async fn verify_payment(&self, _id: &str) -> Result<PaymentVerification, ClientError> {
        unimplemented!("not used by the saga")
    }

    async fn process_refund(&self, _req: &RefundRequest) -> Result<Refund, ClientError> {
        panic!("the saga must never issue refunds");
    }

    async fn get_refund(&self, _id: &str) -> Result<Refund, ClientError> {
        unimplemented!("not used by the saga")
    }
}

#[derive(Debug, Clone)]
struct CreateCall {
    kind: DraftKind,
    payload: Value,
    bearer: String,
}

#[derive(Clone, Default)]
struct RecordingResources {
    responses: Arc<Mutex<VecDeque<Result<Value, ClientError>>>>,
    create_calls: Arc<Mutex<Vec<CreateCall>>>,
    // closed once the backend accepts the resource
    storage_lost_on_create: Arc<Mutex<Option<sqlx::SqlitePool>>>,
}

impl RecordingResources {
    fn with_responses(responses: Vec<Result<Value, ClientError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn create_calls(&self) -> Vec<CreateCall> {
        self.create_calls.lock().await.clone()
    }
}

#[async_trait]
impl ResourceService for RecordingResources {
    async fn create_resource(
        &self,
        kind: DraftKind,
        payload: &Value,
        creds: &Credentials,
    ) -> Result<Value, ClientError> {
        self.create_calls.lock().await.push(CreateCall {
            kind,
            payload: payload.clone(),
            bearer: creds.access_token.clone(),
        });
        if let Some(pool) = self.storage_lost_on_create.lock().await.take() {
            pool.close().await;
        }
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "id": "created-1" })))
    }

    async fn get_booking(&self, _id: &str, _creds: &Credentials) -> Result<Booking, ClientError> {
        unimplemented!("not used by the saga")
    }

    async fn update_booking_status(
        &self,
        _id: &str,
        _action: BookingAction,
        _creds: &Credentials,
    ) -> Result<Value, ClientError> {
        unimplemented!("not used by the saga")
    }
}

struct Harness {
    pool: sqlx::SqlitePool,
    drafts: Arc<DraftStore>,
    billing: RecordingBilling,
    resources: RecordingResources,
    saga: PaymentSaga,
}

async fn harness_with(
    billing: RecordingBilling,
    resources: RecordingResources,
    session: Arc<Session>,
    cooldown: Duration,
) -> Harness {
    let pool = setup_pool().await;
    let drafts = Arc::new(DraftStore::new(pool.clone()));
    let saga = PaymentSaga::new(
        drafts.clone(),
        Arc::new(billing.clone()),
        Arc::new(resources.clone()),
        session,
        "http://localhost:3000",
        cooldown,
    );
    Harness {
        pool,
        drafts,
        billing,
        resources,
        saga,
    }
}

async fn harness(billing: RecordingBilling, resources: RecordingResources) -> Harness {
    harness_with(
        billing,
        resources,
        signed_in_session().await,
        Duration::from_secs(5),
    )
    .await
}

fn scenario_payload() -> Value {
    json!({ "id": "abc", "title": "Test", "price": 10 })
}

async fn stored_event_draft(h: &Harness) -> PendingDraft {
    let draft = PendingDraft::new(DraftKind::Event, scenario_payload());
    h.drafts.save(&draft).await.unwrap();
    h.billing.open_session("cs_test_1", &draft.id).await;
    draft
}

fn valid_event() -> Value {
    json!({
        "title": "Rust Meetup",
        "description": "Talks and pizza",
        "startDateTime": "2025-05-01T18:00:00+08:00",
        "endDateTime": "2025-05-01T21:00:00+08:00",
        "venue": {
            "name": "Hall A",
            "address": "1 Main St",
            "city": "Singapore",
            "coordinates": { "lat": 1.29, "lng": 103.85 }
        },
        "categories": ["Technology"],
        "price": 10.0,
        "organizer": { "id": "u1", "username": "host" }
    })
}

#[tokio::test]
async fn complete_payment_creates_resource_once_and_clears_draft() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;
    stored_event_draft(&h).await;

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert_eq!(
        report.outcome,
        SagaOutcome::Created {
            resource_id: "created-1".into(),
            resource: json!({ "id": "created-1" }),
        }
    );
    assert_eq!(
        report.transitions,
        vec![
            (SagaState::AwaitingPayment, SagaState::VerifyingPayment),
            (SagaState::VerifyingPayment, SagaState::CreatingResource),
            (SagaState::CreatingResource, SagaState::Created),
        ]
    );

    let calls = h.resources.create_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, DraftKind::Event);
    assert_eq!(calls[0].payload, scenario_payload());
    assert_eq!(calls[0].bearer, "access-1");
    assert_eq!(h.billing.retrieve_calls().await, vec!["cs_test_1".to_string()]);

    h.drafts.drop_cache();
    assert!(h.drafts.load(DraftKind::Event).await.unwrap().is_none());
    assert!(db::fetch_draft(&h.pool, db::KEY_PENDING_EVENT)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn open_checkout_session_keeps_draft_and_skips_creation() {
    let billing = RecordingBilling::with_sessions(vec![checkout(Some(CheckoutStatus::Open))]);
    let h = harness(billing, RecordingResources::default()).await;
    let draft = stored_event_draft(&h).await;

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert_eq!(
        report.outcome,
        SagaOutcome::Failed(FailureReason::PaymentIncomplete {
            status: "open".into()
        })
    );
    assert_eq!(report.final_state(), Some(SagaState::Failed));
    assert!(h.resources.create_calls().await.is_empty());

    h.drafts.drop_cache();
    let (kept, _) = h.drafts.load(DraftKind::Event).await.unwrap().unwrap();
    assert_eq!(kept.id, draft.id);
    assert_eq!(kept.payload, scenario_payload());
}

#[tokio::test]
async fn non_complete_statuses_never_create() {
    for status in [Some(CheckoutStatus::Expired), None] {
        let billing = RecordingBilling::with_sessions(vec![checkout(status)]);
        let h = harness(billing, RecordingResources::default()).await;
        stored_event_draft(&h).await;

        let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();
        assert!(matches!(
            report.outcome,
            SagaOutcome::Failed(FailureReason::PaymentIncomplete { .. })
        ));
        assert!(h.resources.create_calls().await.is_empty());
        assert!(h.drafts.load(DraftKind::Event).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn creation_failure_surfaces_upstream_detail_and_keeps_draft() {
    let resources = RecordingResources::with_responses(vec![Err(ClientError::Upstream {
        status: 500,
        message: extract_error_message(r#"{"detail": "db error"}"#),
    })]);
    let h = harness(RecordingBilling::default(), resources).await;
    stored_event_draft(&h).await;

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    let SagaOutcome::Failed(reason) = &report.outcome else {
        panic!("expected failure, got {:?}", report.outcome);
    };
    assert_eq!(
        reason,
        &FailureReason::CreationAfterPayment {
            message: "db error".into()
        }
    );
    assert_eq!(reason.message(), "db error");
    assert!(reason.support_guidance().is_some());
    assert_eq!(
        report.transitions.last(),
        Some(&(SagaState::CreatingResource, SagaState::Failed))
    );

    h.drafts.drop_cache();
    let (kept, _) = h.drafts.load(DraftKind::Event).await.unwrap().unwrap();
    assert_eq!(kept.checkout_session_id.as_deref(), Some("cs_test_1"));
}

#[tokio::test]
async fn repeated_completion_within_cooldown_is_ignored() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;
    stored_event_draft(&h).await;

    let first = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();
    let second = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert!(matches!(first.outcome, SagaOutcome::Created { .. }));
    assert_eq!(second.outcome, SagaOutcome::AlreadyProcessing);
    assert!(second.transitions.is_empty());
    assert_eq!(h.resources.create_calls().await.len(), 1);
    assert_eq!(h.billing.retrieve_calls().await.len(), 1);
}

#[tokio::test]
async fn concurrent_completions_create_once() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;
    stored_event_draft(&h).await;

    let (a, b) = tokio::join!(
        h.saga.complete(DraftKind::Event, "cs_test_1"),
        h.saga.complete(DraftKind::Event, "cs_test_1"),
    );
    let outcomes = [a.unwrap().outcome, b.unwrap().outcome];

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, SagaOutcome::Created { .. }))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| **o == SagaOutcome::AlreadyProcessing)
        .count();
    assert_eq!((created, skipped), (1, 1));
    assert_eq!(h.resources.create_calls().await.len(), 1);
}

#[tokio::test]
async fn draft_is_recovered_from_storage_after_reload() {
    let pool = setup_pool().await;
    // Saved by an earlier process before the checkout redirect.
    let earlier = DraftStore::new(pool.clone());
    let draft = PendingDraft::new(DraftKind::Event, scenario_payload());
    earlier.save(&draft).await.unwrap();

    let billing = RecordingBilling::default();
    billing.open_session("cs_test_1", &draft.id).await;
    let resources = RecordingResources::default();
    let saga = PaymentSaga::new(
        Arc::new(DraftStore::new(pool.clone())),
        Arc::new(billing),
        Arc::new(resources.clone()),
        signed_in_session().await,
        "http://localhost:3000",
        Duration::from_secs(5),
    );

    let report = saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();
    assert_eq!(report.draft_id, Some(draft.id));
    assert!(matches!(report.outcome, SagaOutcome::Created { .. }));
    assert_eq!(resources.create_calls().await[0].payload, scenario_payload());
    assert!(db::fetch_draft(&pool, db::KEY_PENDING_EVENT)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_draft_fails_before_verification() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert_eq!(report.outcome, SagaOutcome::Failed(FailureReason::MissingDraft));
    assert!(h.billing.retrieve_calls().await.is_empty());
    assert!(h.resources.create_calls().await.is_empty());
}

#[tokio::test]
async fn verification_error_keeps_draft() {
    let billing = RecordingBilling::with_sessions(vec![Err(ClientError::Upstream {
        status: 404,
        message: "No such checkout.session".into(),
    })]);
    let h = harness(billing, RecordingResources::default()).await;
    stored_event_draft(&h).await;

    let report = h.saga.complete(DraftKind::Event, "cs_missing").await.unwrap();

    assert_eq!(
        report.outcome,
        SagaOutcome::Failed(FailureReason::Verification {
            message: "No such checkout.session".into()
        })
    );
    assert!(h.resources.create_calls().await.is_empty());
    assert!(h.drafts.load(DraftKind::Event).await.unwrap().is_some());
}

#[tokio::test]
async fn signed_out_user_cannot_create_after_payment() {
    let session = Arc::new(Session::new(Arc::new(NoRefresh)));
    let h = harness_with(
        RecordingBilling::default(),
        RecordingResources::default(),
        session,
        Duration::from_secs(5),
    )
    .await;
    stored_event_draft(&h).await;

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert_eq!(
        report.outcome,
        SagaOutcome::Failed(FailureReason::Unauthenticated(AuthError::NotSignedIn))
    );
    assert!(h.resources.create_calls().await.is_empty());
    assert!(h.drafts.load(DraftKind::Event).await.unwrap().is_some());
}

#[tokio::test]
async fn begin_stores_draft_and_requests_checkout() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;

    let started = h
        .saga
        .begin(DraftKind::Event, valid_event(), 1000, Some("Event Creation Fee".into()))
        .await
        .unwrap();

    assert_eq!(started.redirect_url, "https://checkout.example/pay/cs_test_1");
    assert_eq!(
        started.transitions,
        vec![(SagaState::Idle, SagaState::AwaitingPayment)]
    );

    let calls = h.billing.checkout_calls().await;
    assert_eq!(calls.len(), 1);
    let (kind, req) = &calls[0];
    assert_eq!(*kind, DraftKind::Event);
    assert_eq!(req.amount, 1000);
    assert_eq!(req.reference_id, started.draft_id.to_string());
    assert_eq!(
        req.success_url,
        format!(
            "http://localhost:3000/create/success?session_id={{CHECKOUT_SESSION_ID}}&draft={}",
            started.draft_id
        )
    );

    h.drafts.drop_cache();
    let (stored, _) = h.drafts.load(DraftKind::Event).await.unwrap().unwrap();
    assert_eq!(stored.id, started.draft_id);
    assert_eq!(stored.payload["id"], json!(started.draft_id.to_string()));
    assert_eq!(stored.payload["title"], "Rust Meetup");
}

#[tokio::test]
async fn invalid_draft_never_reaches_billing() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;
    let mut payload = valid_event();
    payload["endDateTime"] = json!("2025-05-01T17:00:00+08:00");

    let err = h
        .saga
        .begin(DraftKind::Event, payload, 1000, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BeginError::Validation(_)));
    assert!(h.billing.checkout_calls().await.is_empty());
    assert!(h.drafts.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_checkout_creation_keeps_draft_for_retry() {
    let billing = RecordingBilling::with_checkout_urls(vec![Err(ClientError::Upstream {
        status: 500,
        message: "Stripe is not initialized".into(),
    })]);
    let h = harness(billing, RecordingResources::default()).await;

    let err = h
        .saga
        .begin(DraftKind::Event, valid_event(), 1000, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BeginError::Checkout(_)));
    assert_eq!(h.drafts.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn booking_saga_tracks_and_clears_pending_keys() {
    let resources =
        RecordingResources::with_responses(vec![Ok(json!({ "booking_id": "bk-9", "status": "PENDING" }))]);
    let h = harness(RecordingBilling::default(), resources).await;
    let payload = json!({
        "event_id": "evt-1",
        "user_id": "user-1",
        "ticket_quantity": 2,
        "email": "fan@example.com"
    });

    let started = h
        .saga
        .begin(DraftKind::Booking, payload.clone(), 2000, None)
        .await
        .unwrap();
    assert_eq!(
        db::storage_get(&h.pool, db::KEY_PENDING_BOOKING_ID)
            .await
            .unwrap(),
        Some(started.draft_id.to_string())
    );
    let (_, req) = &h.billing.checkout_calls().await[0];
    assert!(req.success_url.contains("/bookings/success?session_id="));

    let report = h.saga.complete(DraftKind::Booking, "cs_test_1").await.unwrap();
    assert_eq!(
        report.outcome,
        SagaOutcome::Created {
            resource_id: "bk-9".into(),
            resource: json!({ "booking_id": "bk-9", "status": "PENDING" }),
        }
    );

    let calls = h.resources.create_calls().await;
    assert_eq!(calls[0].kind, DraftKind::Booking);
    assert_eq!(calls[0].payload, payload);
    for key in [db::KEY_PENDING_BOOKING_ID, db::KEY_PENDING_SESSION_ID] {
        assert!(db::storage_get(&h.pool, key).await.unwrap().is_none());
    }
    assert!(h.drafts.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn abandon_discards_pending_draft() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;
    stored_event_draft(&h).await;

    assert!(h.saga.abandon(DraftKind::Event).await.unwrap());
    assert!(!h.saga.abandon(DraftKind::Event).await.unwrap());

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();
    assert_eq!(report.outcome, SagaOutcome::Failed(FailureReason::MissingDraft));
}

#[tokio::test]
async fn paid_session_cannot_be_reused_for_a_new_draft() {
    let h = harness_with(
        RecordingBilling::default(),
        RecordingResources::default(),
        signed_in_session().await,
        Duration::ZERO,
    )
    .await;

    let first = h
        .saga
        .begin(DraftKind::Event, valid_event(), 1000, None)
        .await
        .unwrap();
    assert!(first.redirect_url.ends_with("/cs_test_1"));
    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();
    assert!(matches!(report.outcome, SagaOutcome::Created { .. }));

    // A second draft goes to checkout but the user comes back with the old session.
    let mut unpaid = valid_event();
    unpaid["title"] = json!("Unpaid Event");
    let second = h
        .saga
        .begin(DraftKind::Event, unpaid, 1000, None)
        .await
        .unwrap();
    let replay = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert_eq!(
        replay.outcome,
        SagaOutcome::Failed(FailureReason::SessionAlreadyUsed {
            session_id: "cs_test_1".into()
        })
    );
    let calls = h.resources.create_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["title"], "Rust Meetup");

    h.drafts.drop_cache();
    let (kept, _) = h.drafts.load(DraftKind::Event).await.unwrap().unwrap();
    assert_eq!(kept.id, second.draft_id);
}

#[tokio::test]
async fn session_opened_for_another_draft_is_rejected() {
    let other = Uuid::new_v4().to_string();
    let cases = [
        ("cs_other", reference_metadata("event_id", &other)),
        ("cs_bare", HashMap::new()),
    ];
    for (session_id, metadata) in cases {
        let billing = RecordingBilling::with_sessions(vec![Ok(paid_session(session_id, metadata))]);
        let h = harness(billing, RecordingResources::default()).await;
        let draft = stored_event_draft(&h).await;

        let report = h.saga.complete(DraftKind::Event, session_id).await.unwrap();

        assert_eq!(
            report.outcome,
            SagaOutcome::Failed(FailureReason::SessionMismatch {
                session_id: session_id.into()
            })
        );
        assert_eq!(report.final_state(), Some(SagaState::Failed));
        assert!(h.resources.create_calls().await.is_empty());

        h.drafts.drop_cache();
        let (kept, _) = h.drafts.load(DraftKind::Event).await.unwrap().unwrap();
        assert_eq!(kept.id, draft.id);
        assert_eq!(kept.checkout_session_id, None);
    }
}

#[tokio::test]
async fn created_resource_is_reported_when_cleanup_fails() {
    let h = harness(RecordingBilling::default(), RecordingResources::default()).await;
    stored_event_draft(&h).await;
    *h.resources.storage_lost_on_create.lock().await = Some(h.pool.clone());

    let report = h.saga.complete(DraftKind::Event, "cs_test_1").await.unwrap();

    assert_eq!(
        report.outcome,
        SagaOutcome::Created {
            resource_id: "created-1".into(),
            resource: json!({ "id": "created-1" }),
        }
    );
    assert_eq!(report.final_state(), Some(SagaState::Created));
    assert_eq!(h.resources.create_calls().await.len(), 1);
}
