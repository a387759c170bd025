//! Test doubles for the pipeline seams.
//!
//! Used by this crate's own tests and by embedders that want to exercise
//! their UI logic against a scripted backend without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;

use nutrio_auth::{AuthError, IdentityProvider, ProviderTokens};

use crate::error::ApiError;
use crate::request::ApiRequest;
use crate::response::{ApiResponse, ResponseBody};
use crate::transport::HttpTransport;

/// Initialize tracing for tests with appropriate settings.
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Transport double that replays a scripted sequence of responses and records
/// every request it sees. An exhausted script answers `200` with no body.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    seen: Mutex<Vec<ApiRequest>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: ApiResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub fn push_status(&self, status: u16) {
        self.push_response(ApiResponse::new(
            StatusCode::from_u16(status).expect("test status code"),
            ResponseBody::Empty,
        ));
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push_response(ApiResponse::new(
            StatusCode::from_u16(status).expect("test status code"),
            ResponseBody::Json(body),
        ));
    }

    pub fn push_error(&self, error: ApiError) {
        self.script.lock().push_back(Err(error));
    }

    /// Number of requests that reached the network seam.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Every request seen, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.seen.lock().push(request);
        match self.script.lock().pop_front() {
            Some(result) => result,
            None => Ok(ApiResponse::new(StatusCode::OK, ResponseBody::Empty)),
        }
    }
}

/// Identity-provider double. Mints sequentially numbered tokens and counts
/// every call; flip [`StubProvider::set_unreachable`] to simulate losing the
/// provider.
#[derive(Default)]
pub struct StubProvider {
    minted: AtomicU32,
    anonymous_calls: AtomicU32,
    refresh_calls: AtomicU32,
    link_calls: AtomicU32,
    unreachable: AtomicBool,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    pub fn anonymous_calls(&self) -> u32 {
        self.anonymous_calls.load(Ordering::Relaxed)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::Relaxed)
    }

    pub fn link_calls(&self) -> u32 {
        self.link_calls.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), AuthError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(AuthError::provider(503, "provider unreachable"));
        }
        Ok(())
    }

    fn mint(&self, uid: Option<&str>, email: Option<&str>) -> ProviderTokens {
        let n = self.minted.fetch_add(1, Ordering::Relaxed);
        ProviderTokens {
            id_token: format!("stub-id-{n}"),
            refresh_token: format!("stub-rt-{n}"),
            expires_in: "3600".to_owned(),
            uid: uid.map(str::to_owned),
            email: email.map(str::to_owned),
        }
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn sign_up_anonymous(&self) -> Result<ProviderTokens, AuthError> {
        self.check()?;
        self.anonymous_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.mint(Some("stub-anon"), None))
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.check()?;
        Ok(self.mint(Some("stub-fresh"), Some(email)))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.check()?;
        Ok(self.mint(Some("stub-user"), Some(email)))
    }

    async fn link_password(
        &self,
        _id_token: &str,
        email: &str,
        _password: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.check()?;
        self.link_calls.fetch_add(1, Ordering::Relaxed);
        // uid stays with the session being upgraded
        Ok(self.mint(None, Some(email)))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        self.check()?;
        self.refresh_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.mint(Some("stub-anon"), None))
    }
}
