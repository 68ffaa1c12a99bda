//! Access-token lifecycle against an OAuth2 identity provider.
//!
//! A [`SessionToken`] is created from the first grant, then passed through
//! [`refresh_if_needed`] before each use. Refresh failures never raise: they
//! set [`TokenError::RefreshAccessTokenError`] on the record and keep the
//! refresh token so a later call can try again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClientError;

pub mod claims;
pub mod cognito;

pub use cognito::CognitoClient;

/// Token endpoint response, for both the initial grant and refreshes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenError {
    RefreshAccessTokenError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds; `None` forces a refresh on next use.
    pub access_token_expires_at_ms: Option<i64>,
    pub role: String,
    #[serde(default)]
    pub error: Option<TokenError>,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn lifetime_ms(expires_in: u64) -> i64 {
    i64::try_from(expires_in)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000)
}

impl SessionToken {
    /// Build the record from a fresh authentication grant issued at `now_ms`.
    pub fn from_grant(grant: TokenGrant, now_ms: i64) -> Self {
        let id_token = grant.id_token.as_deref();
        Self {
            role: id_token.map(claims::primary_role).unwrap_or_default(),
            user_id: id_token.and_then(claims::user_id),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or_default(),
            access_token_expires_at_ms: Some(now_ms.saturating_add(lifetime_ms(grant.expires_in))),
            error: None,
        }
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        matches!(self.access_token_expires_at_ms, Some(exp) if now_ms < exp)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Something that can exchange a refresh token for new tokens.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClientError>;
}

/// Return `token` unchanged while it is valid, otherwise try one refresh.
pub async fn refresh_if_needed(
    token: SessionToken,
    endpoint: &dyn TokenEndpoint,
    now_ms: i64,
) -> SessionToken {
    if token.is_valid_at(now_ms) {
        if let Some(exp) = token.access_token_expires_at_ms {
            debug!(expires_in_ms = exp - now_ms, "access token still valid");
        }
        return token;
    }

    debug!("access token expired, refreshing");
    match endpoint.refresh(&token.refresh_token).await {
        Ok(grant) => SessionToken {
            access_token: grant.access_token,
            access_token_expires_at_ms: Some(now_ms.saturating_add(lifetime_ms(grant.expires_in))),
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or(token.refresh_token),
            error: None,
            ..token
        },
        Err(err) => {
            warn!(error = %err, "error refreshing access token");
            SessionToken {
                error: Some(TokenError::RefreshAccessTokenError),
                ..token
            }
        }
    }
}
