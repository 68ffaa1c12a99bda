use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use tracing::{debug, info};

use super::{TokenEndpoint, TokenGrant};
use crate::config::Identity;
use crate::error::{extract_error_message, ClientError};

/// Cognito hosted-UI token endpoint client.
#[derive(Clone)]
pub struct CognitoClient {
    http: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    form_client_id: String,
    redirect_uri: String,
}

impl fmt::Debug for CognitoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitoClient")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl CognitoClient {
    pub fn from_config(identity: &Identity) -> Result<Self, ClientError> {
        let authority = format!("{}/", identity.authority.trim_end_matches('/'));
        let token_url = Url::parse(&authority)?.join("oauth2/token")?;
        let http = Client::builder()
            .user_agent(concat!("mulan-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            token_url,
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.clone(),
            form_client_id: identity.form_client_id().to_string(),
            redirect_uri: identity.redirect_uri.clone(),
        })
    }

    fn token_request(&self, form: &[(&str, &str)]) -> Result<reqwest::Request, ClientError> {
        Ok(self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .build()?)
    }

    pub fn build_refresh_request(&self, refresh_token: &str) -> Result<reqwest::Request, ClientError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.form_client_id),
            ("refresh_token", refresh_token),
        ])
    }

    pub fn build_code_request(&self, code: &str) -> Result<reqwest::Request, ClientError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.form_client_id),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
        ])
    }

    async fn execute(&self, request: reqwest::Request) -> Result<TokenGrant, ClientError> {
        debug!(url = %request.url(), "sending token request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }
        res.json::<TokenGrant>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Complete a hosted-UI sign-in with an authorization code.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ClientError> {
        let grant = self.execute(self.build_code_request(code)?).await?;
        info!(expires_in = grant.expires_in, "signed in");
        Ok(grant)
    }
}

#[async_trait]
impl TokenEndpoint for CognitoClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClientError> {
        self.execute(self.build_refresh_request(refresh_token)?).await
    }
}
