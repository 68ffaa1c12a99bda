//! The signed-in user's session.
//!
//! Holds the current [`SessionToken`], runs it through the refresh flow before
//! handing out credentials, and mirrors it into client storage so that
//! separate runs share one sign-in.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::RequestBuilder;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::auth::{self, SessionToken, TokenEndpoint, TokenGrant};
use crate::db::{self, Pool, KEY_SESSION_TOKEN};
use crate::error::AuthError;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// Bearer credentials for one outgoing call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub user_id: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Credentials {
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.bearer_auth(&self.access_token);
        match &self.user_id {
            Some(id) => builder.header(USER_ID_HEADER, id),
            None => builder,
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", self.access_token)) {
            headers.insert(AUTHORIZATION, v);
        }
        if let Some(v) = self
            .user_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            headers.insert(USER_ID_HEADER, v);
        }
        headers
    }
}

pub struct Session {
    token: Mutex<Option<SessionToken>>,
    endpoint: Arc<dyn TokenEndpoint>,
    pool: Option<Pool>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("persistent", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// In-memory session; nothing survives the process.
    pub fn new(endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            token: Mutex::new(None),
            endpoint,
            pool: None,
        }
    }

    /// Session mirrored into client storage.
    pub fn with_storage(endpoint: Arc<dyn TokenEndpoint>, pool: Pool) -> Self {
        Self {
            token: Mutex::new(None),
            endpoint,
            pool: Some(pool),
        }
    }

    /// Load a previously persisted token. Returns whether one was found.
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<bool> {
        let Some(pool) = &self.pool else {
            return Ok(false);
        };
        let Some(raw) = db::storage_get(pool, KEY_SESSION_TOKEN).await? else {
            return Ok(false);
        };
        match serde_json::from_str::<SessionToken>(&raw) {
            Ok(token) => {
                debug!(role = %token.role, "session restored");
                *self.token.lock().await = Some(token);
                Ok(true)
            }
            Err(err) => {
                warn!(?err, "discarding unreadable stored session");
                db::storage_remove(pool, KEY_SESSION_TOKEN).await?;
                Ok(false)
            }
        }
    }

    async fn persist(&self, token: Option<&SessionToken>) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        match token {
            Some(t) => {
                let raw = serde_json::to_string(t).context("failed to encode session token")?;
                db::storage_set(pool, KEY_SESSION_TOKEN, &raw).await
            }
            None => db::storage_remove(pool, KEY_SESSION_TOKEN).await.map(|_| ()),
        }
    }

    /// Start a session from an initial authentication grant.
    #[instrument(skip_all)]
    pub async fn login(&self, grant: TokenGrant) -> Result<SessionToken> {
        let token = SessionToken::from_grant(grant, Utc::now().timestamp_millis());
        self.persist(Some(&token)).await?;
        *self.token.lock().await = Some(token.clone());
        info!(role = %token.role, "signed in");
        Ok(token)
    }

    pub async fn logout(&self) -> Result<()> {
        self.token.lock().await.take();
        self.persist(None).await?;
        info!("signed out");
        Ok(())
    }

    pub async fn current(&self) -> Option<SessionToken> {
        self.token.lock().await.clone()
    }

    pub async fn role(&self) -> Option<String> {
        self.token.lock().await.as_ref().map(|t| t.role.clone())
    }

    /// Credentials valid at `now_ms`, refreshing the token first if needed.
    pub async fn credentials_at(&self, now_ms: i64) -> Result<Credentials, AuthError> {
        let mut guard = self.token.lock().await;
        let Some(current) = guard.take() else {
            return Err(AuthError::NotSignedIn);
        };
        let was_valid = current.is_valid_at(now_ms);
        let refreshed = auth::refresh_if_needed(current, self.endpoint.as_ref(), now_ms).await;
        if !was_valid {
            if let Err(err) = self.persist(Some(&refreshed)).await {
                warn!(?err, "failed to persist refreshed session");
            }
        }
        let result = if refreshed.has_error() {
            Err(AuthError::RefreshFailed)
        } else if refreshed.access_token.is_empty() {
            Err(AuthError::NotSignedIn)
        } else {
            Ok(Credentials {
                access_token: refreshed.access_token.clone(),
                user_id: refreshed.user_id.clone(),
            })
        };
        *guard = Some(refreshed);
        result
    }

    pub async fn credentials(&self) -> Result<Credentials, AuthError> {
        self.credentials_at(Utc::now().timestamp_millis()).await
    }

    pub async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.credentials().await?.access_token)
    }

    /// `Authorization` and, when known, `X-User-ID` headers.
    pub async fn auth_headers(&self) -> Result<HeaderMap, AuthError> {
        Ok(self.credentials().await?.headers())
    }
}
