//! HTTP clients for the billing, resource, and upload endpoints.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::booking::{can_transition_to, BookingAction};
use crate::config::Services;
use crate::error::{extract_error_message, BookingUpdateError, ClientError};
use crate::model::{Booking, CheckoutSessionRef, DraftKind};
use crate::session::Credentials;

pub mod model;

pub use model::{
    resource_id_of, CheckoutRequest, PaymentVerification, Refund, RefundReason, RefundRequest,
};
use model::{CheckoutUrlResp, UploadResp};

#[async_trait]
pub trait BillingService: Send + Sync {
    /// Create a hosted-checkout session and return its redirect URL.
    async fn create_checkout_session(
        &self,
        kind: DraftKind,
        req: &CheckoutRequest,
    ) -> Result<String, ClientError>;

    async fn retrieve_checkout_session(&self, session_id: &str)
        -> Result<CheckoutSessionRef, ClientError>;

    async fn verify_payment(&self, payment_intent_id: &str)
        -> Result<PaymentVerification, ClientError>;

    async fn process_refund(&self, req: &RefundRequest) -> Result<Refund, ClientError>;

    async fn get_refund(&self, refund_id: &str) -> Result<Refund, ClientError>;
}

#[async_trait]
pub trait ResourceService: Send + Sync {
    /// Submit a draft payload; returns the created resource as sent back.
    async fn create_resource(
        &self,
        kind: DraftKind,
        payload: &Value,
        creds: &Credentials,
    ) -> Result<Value, ClientError>;

    async fn get_booking(&self, booking_id: &str, creds: &Credentials)
        -> Result<Booking, ClientError>;

    async fn update_booking_status(
        &self,
        booking_id: &str,
        action: BookingAction,
        creds: &Credentials,
    ) -> Result<Value, ClientError>;
}

#[async_trait]
pub trait UploadService: Send + Sync {
    /// Upload a local file and return its public URL.
    async fn upload_file(&self, path: &Path) -> Result<String, ClientError>;
}

pub fn checkout_path(kind: DraftKind) -> &'static [&'static str] {
    match kind {
        DraftKind::Event => &["api", "stripe"],
        DraftKind::Booking => &["api", "stripe", "booking"],
    }
}

pub fn creation_path(kind: DraftKind) -> &'static [&'static str] {
    match kind {
        DraftKind::Event => &["api", "v1", "create-event"],
        DraftKind::Booking => &["api", "v1", "bookings"],
    }
}

fn reference_field(kind: DraftKind) -> &'static str {
    match kind {
        DraftKind::Event => "eventId",
        DraftKind::Booking => "bookingId",
    }
}

/// Normalise a configured base URL so `path_segments_mut` appends under it.
fn parse_base(raw: &str) -> Result<Url, ClientError> {
    Ok(Url::parse(&format!("{}/", raw.trim().trim_end_matches('/')))?)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut out = base.clone();
    out.path_segments_mut()
        .map_err(|_| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(out)
}

/// Turn a non-2xx response into [`ClientError::Upstream`] with the extracted message.
pub async fn ensure_success(res: Response) -> Result<Response, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "upstream call failed");
    Err(ClientError::Upstream {
        status: status.as_u16(),
        message: extract_error_message(&body),
    })
}

async fn read_json(res: Response) -> Result<Value, ClientError> {
    let text = res.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

async fn decode<T: serde::de::DeserializeOwned>(res: Response) -> Result<T, ClientError> {
    res.json::<T>()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "svg" => "image/svg+xml",
        Some(ext) if ext == "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// reqwest client for the API gateway and the web front end's API routes.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    gateway_url: Url,
    frontend_url: Url,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("gateway_url", &self.gateway_url)
            .field("frontend_url", &self.frontend_url)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn from_config(services: &Services) -> Result<Self, ClientError> {
        Self::with_base_urls(
            parse_base(&services.gateway_url)?,
            parse_base(&services.frontend_url)?,
        )
    }

    pub fn with_base_urls(gateway_url: Url, frontend_url: Url) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("mulan-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            gateway_url,
            frontend_url,
        })
    }

    pub fn build_checkout_request(
        &self,
        kind: DraftKind,
        req: &CheckoutRequest,
    ) -> Result<reqwest::Request, ClientError> {
        let mut body = Map::new();
        body.insert(reference_field(kind).into(), json!(req.reference_id));
        body.insert("amount".into(), json!(req.amount));
        body.insert("successUrl".into(), json!(req.success_url));
        if let Some(desc) = &req.description {
            body.insert("description".into(), json!(desc));
        }
        Ok(self
            .http
            .post(endpoint(&self.frontend_url, checkout_path(kind))?)
            .json(&body)
            .build()?)
    }

    pub fn build_create_request(
        &self,
        kind: DraftKind,
        payload: &Value,
        creds: &Credentials,
    ) -> Result<reqwest::Request, ClientError> {
        let builder = self
            .http
            .post(endpoint(&self.gateway_url, creation_path(kind))?)
            .json(payload);
        Ok(creds.apply(builder).build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Response, ClientError> {
        debug!(method = %request.method(), url = %request.url(), "sending request");
        let res = self.http.execute(request).await?;
        debug!(status = res.status().as_u16(), "response received");
        ensure_success(res).await
    }

    /// Fetch a booking and change its status if the transition is allowed.
    #[instrument(skip(self, creds))]
    pub async fn transition_booking(
        &self,
        booking_id: &str,
        action: BookingAction,
        creds: &Credentials,
    ) -> Result<Value, BookingUpdateError> {
        change_booking_status(self, booking_id, action, creds).await
    }
}

/// Status change gated by the transition table; refused changes make no call.
pub async fn change_booking_status(
    resources: &dyn ResourceService,
    booking_id: &str,
    action: BookingAction,
    creds: &Credentials,
) -> Result<Value, BookingUpdateError> {
    let booking = resources.get_booking(booking_id, creds).await?;
    let target = action.target_status();
    if !can_transition_to(booking.status, target) {
        warn!(
            booking_id,
            from = booking.status.as_str(),
            to = target.as_str(),
            "booking transition refused"
        );
        return Err(BookingUpdateError::NotAllowed {
            from: booking.status.as_str(),
            to: target.as_str(),
        });
    }
    let updated = resources.update_booking_status(booking_id, action, creds).await?;
    info!(booking_id, to = target.as_str(), "booking status updated");
    Ok(updated)
}

#[async_trait]
impl BillingService for BackendClient {
    async fn create_checkout_session(
        &self,
        kind: DraftKind,
        req: &CheckoutRequest,
    ) -> Result<String, ClientError> {
        let request = self.build_checkout_request(kind, req)?;
        let resp: CheckoutUrlResp = decode(self.execute(request).await?).await?;
        match (resp.url, resp.error) {
            (Some(url), _) if !url.is_empty() => Ok(url),
            (_, Some(error)) => Err(ClientError::Upstream {
                status: 200,
                message: error,
            }),
            _ => Err(ClientError::Decode("checkout response has no url".into())),
        }
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionRef, ClientError> {
        let url = endpoint(&self.frontend_url, &["api", "checkout_sessions", session_id])?;
        let request = self.http.get(url).build()?;
        decode(self.execute(request).await?).await
    }

    async fn verify_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentVerification, ClientError> {
        let url = endpoint(&self.gateway_url, &["api", "payment", "verify"])?;
        let request = self
            .http
            .post(url)
            .json(&json!({ "payment_intent_id": payment_intent_id }))
            .build()?;
        decode(self.execute(request).await?).await
    }

    async fn process_refund(&self, req: &RefundRequest) -> Result<Refund, ClientError> {
        let url = endpoint(&self.gateway_url, &["api", "refund", "process"])?;
        let request = self.http.post(url).json(req).build()?;
        let refund: Refund = decode(self.execute(request).await?).await?;
        info!(refund_id = %refund.refund_id, status = %refund.status, "refund processed");
        Ok(refund)
    }

    async fn get_refund(&self, refund_id: &str) -> Result<Refund, ClientError> {
        let url = endpoint(&self.gateway_url, &["api", "refund", refund_id])?;
        let request = self.http.get(url).build()?;
        decode(self.execute(request).await?).await
    }
}

#[async_trait]
impl ResourceService for BackendClient {
    async fn create_resource(
        &self,
        kind: DraftKind,
        payload: &Value,
        creds: &Credentials,
    ) -> Result<Value, ClientError> {
        let request = self.build_create_request(kind, payload, creds)?;
        read_json(self.execute(request).await?).await
    }

    async fn get_booking(&self, booking_id: &str, creds: &Credentials) -> Result<Booking, ClientError> {
        let url = endpoint(&self.gateway_url, &["api", "v1", "mgmt", "bookings", booking_id])?;
        let request = creds.apply(self.http.get(url)).build()?;
        decode(self.execute(request).await?).await
    }

    async fn update_booking_status(
        &self,
        booking_id: &str,
        action: BookingAction,
        creds: &Credentials,
    ) -> Result<Value, ClientError> {
        let url = endpoint(
            &self.gateway_url,
            &["api", "v1", "mgmt", "bookings", booking_id, action.endpoint()],
        )?;
        let request = creds.apply(self.http.post(url)).build()?;
        read_json(self.execute(request).await?).await
    }
}

#[async_trait]
impl UploadService for BackendClient {
    async fn upload_file(&self, path: &Path) -> Result<String, ClientError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Decode(format!("invalid file name: {}", path.display())))?
            .to_string();
        let bytes = fs::read(path).await?;
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(content_type_for(path))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = endpoint(&self.frontend_url, &["api", "upload"])?;
        let res = self.http.post(url).multipart(form).send().await?;
        let resp: UploadResp = decode(ensure_success(res).await?).await?;
        match (resp.url, resp.error) {
            (Some(url), _) => {
                info!(file = %file_name, size, url = %url, "uploaded file");
                Ok(url)
            }
            (None, Some(error)) => Err(ClientError::Upstream {
                status: 200,
                message: error,
            }),
            (None, None) => Err(ClientError::Decode("upload response has no url".into())),
        }
    }
}
