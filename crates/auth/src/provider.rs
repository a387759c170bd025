//! REST client for the identity provider.
//!
//! The provider exposes a secure-token style surface:
//! - `POST /v1/accounts:signUp`: anonymous bootstrap, or email registration
//! - `POST /v1/accounts:signInWithPassword`: password sign-in
//! - `POST /v1/accounts:update`: attach a credential to an existing session,
//!   keyed by its current id token (this is the anonymous upgrade path)
//! - `POST /v1/token`: exchange a refresh token for a fresh id token
//!
//! All endpoints carry the product API key as a `key` query parameter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::AuthError;

const SIGN_UP_PATH: &str = "v1/accounts:signUp";
const SIGN_IN_PATH: &str = "v1/accounts:signInWithPassword";
const UPDATE_PATH: &str = "v1/accounts:update";
const TOKEN_PATH: &str = "v1/token";

/// Token material returned by every provider endpoint.
///
/// The token-exchange endpoint answers in snake_case while the account
/// endpoints answer in camelCase; the aliases absorb both shapes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    #[serde(rename = "idToken", alias = "id_token")]
    pub id_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,
    /// Validity in seconds, transported as a decimal string.
    #[serde(rename = "expiresIn", alias = "expires_in")]
    pub expires_in: String,
    #[serde(rename = "localId", alias = "user_id", default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ProviderTokens {
    /// Parsed token validity. Falls back to one hour when the provider sends
    /// something unparseable.
    pub fn expires_in_secs(&self) -> u64 {
        self.expires_in.parse().unwrap_or(3600)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Establish a brand new anonymous session.
    async fn sign_up_anonymous(&self) -> Result<ProviderTokens, AuthError>;

    /// Create a fresh credentialed account (no prior session to preserve).
    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderTokens, AuthError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderTokens, AuthError>;

    /// Attach an email/password credential to the session behind `id_token`.
    /// The provider keeps the uid, so anything the server already associated
    /// with the anonymous session survives the upgrade.
    async fn link_password(
        &self,
        id_token: &str,
        email: &str,
        password: &str,
    ) -> Result<ProviderTokens, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError>;
}

/// Production [`IdentityProvider`] backed by the hosted identity service.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpIdentityProvider {
    pub fn new(client: Client, base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ProviderTokens, AuthError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| AuthError::provider(0, format!("invalid endpoint {path}: {e}")))?;

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error")
                .to_string();
            debug!(status = status.as_u16(), %message, "identity provider rejection");
            return Err(AuthError::provider(status.as_u16(), message));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_up_anonymous(&self) -> Result<ProviderTokens, AuthError> {
        self.post(SIGN_UP_PATH, json!({ "returnSecureToken": true }))
            .await
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.post(
            SIGN_UP_PATH,
            json!({ "email": email, "password": password, "returnSecureToken": true }),
        )
        .await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.post(
            SIGN_IN_PATH,
            json!({ "email": email, "password": password, "returnSecureToken": true }),
        )
        .await
    }

    async fn link_password(
        &self,
        id_token: &str,
        email: &str,
        password: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.post(
            UPDATE_PATH,
            json!({
                "idToken": id_token,
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        self.post(
            TOKEN_PATH,
            json!({ "grant_type": "refresh_token", "refresh_token": refresh_token }),
        )
        .await
    }
}
