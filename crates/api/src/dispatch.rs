//! The retry/refresh controller.
//!
//! Every logical request runs its own instance of this state machine:
//!
//! ```text
//! Unauthenticated -> TokenAcquired -> Sent -> Success
//!                                          -> Unauthorized -> RefreshAttempted -> Resent -> Success
//!                                                                                        -> Escalate
//!                                                          -> (no token)       -> Escalate
//! ```
//!
//! Exactly one forced refresh and one resend are permitted per request; the
//! resend's outcome is final. Transport failures unrelated to authorization
//! pass through untouched.

use std::sync::Arc;

use tracing::debug;

use nutrio_auth::CredentialSource;

use crate::account::AccountStore;
use crate::augment::RequestAugmenter;
use crate::error::ApiError;
use crate::escalate::{Escalation, EscalationReason};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::transport::HttpTransport;

enum DispatchState {
    Unauthenticated,
    TokenAcquired(String),
    Sent(ApiResponse),
    Unauthorized,
    RefreshAttempted(Option<String>),
    Resent(ApiResponse),
}

pub struct Dispatcher {
    credentials: Arc<CredentialSource>,
    accounts: Arc<AccountStore>,
    augmenter: RequestAugmenter,
    transport: Arc<dyn HttpTransport>,
    escalation: Arc<Escalation>,
}

impl Dispatcher {
    pub fn new(
        credentials: Arc<CredentialSource>,
        accounts: Arc<AccountStore>,
        augmenter: RequestAugmenter,
        transport: Arc<dyn HttpTransport>,
        escalation: Arc<Escalation>,
    ) -> Self {
        Self {
            credentials,
            accounts,
            augmenter,
            transport,
            escalation,
        }
    }

    /// Run one logical request through the pipeline.
    pub async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if !self.augmenter.should_augment(&request.url) {
            return self.transport.execute(request).await;
        }

        self.credentials.wait_ready().await;

        let url = request.url.to_string();
        let mut state = DispatchState::Unauthenticated;
        loop {
            state = match state {
                DispatchState::Unauthenticated => {
                    match self.credentials.current_token(false).await {
                        Some(token) => DispatchState::TokenAcquired(token),
                        None => {
                            // Request-time policy decision: nothing was sent.
                            self.escalation.escalate(EscalationReason::NoCredential);
                            return Err(ApiError::no_credential(url));
                        }
                    }
                }
                DispatchState::TokenAcquired(token) => {
                    let outgoing = self.augment(&request, &token);
                    DispatchState::Sent(self.transport.execute(outgoing).await?)
                }
                DispatchState::Sent(response) if response.is_unauthorized() => {
                    debug!(url = %url, "unauthorized; forcing a token refresh");
                    DispatchState::Unauthorized
                }
                DispatchState::Sent(response) => return Ok(self.accept(response)),
                DispatchState::Unauthorized => {
                    DispatchState::RefreshAttempted(self.credentials.current_token(true).await)
                }
                DispatchState::RefreshAttempted(Some(token)) => {
                    let outgoing = self.augment(&request, &token);
                    DispatchState::Resent(self.transport.execute(outgoing).await?)
                }
                DispatchState::RefreshAttempted(None) => {
                    self.escalation.escalate(EscalationReason::SessionExpired);
                    return Err(ApiError::unauthorized_after_refresh(url));
                }
                DispatchState::Resent(response) if response.is_unauthorized() => {
                    self.escalation.escalate(EscalationReason::SessionExpired);
                    return Err(ApiError::unauthorized_after_refresh(url));
                }
                DispatchState::Resent(response) => return Ok(self.accept(response)),
            };
        }
    }

    fn augment(&self, request: &ApiRequest, token: &str) -> ApiRequest {
        self.augmenter.augment(
            request.clone(),
            Some(token),
            self.accounts.account_id().as_deref(),
        )
    }

    /// Success path: let the account store inspect the body, then hand the
    /// response to the caller exactly as received.
    fn accept(&self, response: ApiResponse) -> ApiResponse {
        if let Some(adopted) = self.accounts.reconcile(&response.body) {
            self.credentials.update_persisted_account_id(Some(&adopted));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::ACCOUNT_ID_FIELD;
    use crate::config::ApiConfig;
    use crate::escalate::{NoopNavigator, SESSION_EXPIRED_MESSAGE, SIGN_IN_MESSAGE};
    use crate::request::RequestBody;
    use crate::testkit::{ScriptedTransport, StubProvider};
    use nutrio_auth::MemoryCredentialStore;
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;
    use url::Url;

    struct Rig {
        provider: Arc<StubProvider>,
        transport: Arc<ScriptedTransport>,
        escalation: Arc<Escalation>,
        dispatcher: Dispatcher,
    }

    fn rig() -> Rig {
        let config = ApiConfig::default()
            .with_base_url(Url::parse("https://api.nutrio.app/").unwrap())
            .with_timezone("America/New_York");
        let provider = Arc::new(StubProvider::new());
        let transport = Arc::new(ScriptedTransport::new());
        let credentials = Arc::new(CredentialSource::new(
            provider.clone(),
            Arc::new(MemoryCredentialStore::new()),
        ));
        let escalation = Arc::new(Escalation::new(Arc::new(NoopNavigator)));
        let dispatcher = Dispatcher::new(
            credentials,
            Arc::new(AccountStore::default()),
            RequestAugmenter::new(&config),
            transport.clone(),
            escalation.clone(),
        );
        Rig {
            provider,
            transport,
            escalation,
            dispatcher,
        }
    }

    impl Rig {
        async fn ready(&self) {
            self.dispatcher.credentials.restore().await;
        }
    }

    fn backend(path: &str) -> ApiRequest {
        let url = Url::parse("https://api.nutrio.app/")
            .unwrap()
            .join(path)
            .unwrap();
        ApiRequest::get(url)
    }

    #[tokio::test]
    async fn foreign_requests_pass_through_untouched() {
        let rig = rig();
        rig.transport.push_status(200);

        let request = ApiRequest::get(Url::parse("https://cdn.example.com/logo.png").unwrap());
        rig.dispatcher.dispatch(request.clone()).await.unwrap();

        // the transport saw the exact request, and no identity work happened
        assert_eq!(rig.transport.requests(), vec![request]);
        assert_eq!(rig.provider.anonymous_calls(), 0);
    }

    #[tokio::test]
    async fn backend_requests_carry_token_and_timezone() {
        let rig = rig();
        rig.ready().await;
        rig.transport.push_json(200, json!({}));

        rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap();

        let seen = rig.transport.requests();
        assert_eq!(seen.len(), 1);
        let auth = seen[0].headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("Bearer "));
        assert_eq!(
            seen[0].headers.get("x-timezone").unwrap(),
            "America/New_York"
        );
    }

    #[tokio::test]
    async fn unauthorized_triggers_exactly_one_refresh_and_resend() {
        let rig = rig();
        rig.ready().await;
        rig.transport.push_status(401);
        rig.transport.push_json(200, json!({"ok": true}));

        let response = rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap();

        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(rig.transport.calls(), 2);
        assert_eq!(rig.provider.refresh_calls(), 1);

        // the resend carries the refreshed token
        let seen = rig.transport.requests();
        assert_ne!(
            seen[0].headers.get(AUTHORIZATION),
            seen[1].headers.get(AUTHORIZATION)
        );
    }

    #[tokio::test]
    async fn second_unauthorized_is_terminal() {
        let rig = rig();
        rig.ready().await;
        rig.transport.push_status(401);
        rig.transport.push_status(401);

        let err = rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap_err();

        assert!(matches!(err, ApiError::UnauthorizedAfterRefresh { .. }));
        // one refresh, two network calls, not a third of either
        assert_eq!(rig.transport.calls(), 2);
        assert_eq!(rig.provider.refresh_calls(), 1);
        assert_eq!(
            rig.escalation.consume_notice().unwrap().message,
            SESSION_EXPIRED_MESSAGE
        );
    }

    #[tokio::test]
    async fn failed_refresh_is_terminal_without_resend() {
        let rig = rig();
        rig.ready().await;
        rig.transport.push_status(401);
        rig.provider.set_unreachable(true);

        let err = rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap_err();

        assert!(matches!(err, ApiError::UnauthorizedAfterRefresh { .. }));
        assert_eq!(rig.transport.calls(), 1);
    }

    #[tokio::test]
    async fn no_credential_escalates_before_any_network_call() {
        let rig = rig();
        rig.provider.set_unreachable(true);
        rig.ready().await;

        let err = rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap_err();

        assert!(matches!(err, ApiError::NoCredentialAvailable { .. }));
        assert_eq!(rig.transport.calls(), 0);
        assert_eq!(
            rig.escalation.consume_notice().unwrap().message,
            SIGN_IN_MESSAGE
        );
    }

    #[tokio::test]
    async fn account_id_from_a_response_rides_on_the_next_request() {
        let rig = rig();
        rig.ready().await;
        rig.transport.push_json(200, json!({"accountId": "a-9"}));
        rig.transport.push_json(200, json!({}));

        rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap();
        rig.dispatcher
            .dispatch(backend("v1/log").with_json(json!({"meal": "lunch"})))
            .await
            .unwrap();

        let seen = rig.transport.requests();
        let RequestBody::Json(body) = &seen[1].body else {
            panic!("expected a JSON body");
        };
        assert_eq!(body.get(ACCOUNT_ID_FIELD), Some(&json!("a-9")));
    }

    #[tokio::test]
    async fn non_unauthorized_statuses_pass_through() {
        let rig = rig();
        rig.ready().await;
        rig.transport.push_status(500);

        let response = rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap();

        assert_eq!(response.status.as_u16(), 500);
        assert_eq!(rig.provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn transport_errors_pass_through_without_escalation() {
        let rig = rig();
        rig.ready().await;
        rig.transport
            .push_error(ApiError::configuration("connection reset"));

        let err = rig.dispatcher.dispatch(backend("v1/summary")).await.unwrap_err();

        assert!(matches!(err, ApiError::Configuration { .. }));
        assert_eq!(rig.escalation.consume_notice(), None);
    }

    #[tokio::test]
    async fn dispatch_suspends_until_readiness() {
        let rig = rig();
        rig.transport.push_status(200);

        let dispatcher_credentials = rig.dispatcher.credentials.clone();
        let dispatcher = Arc::new(rig.dispatcher);
        let pending = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(backend("v1/summary")).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        dispatcher_credentials.restore().await;
        pending.await.unwrap().unwrap();
    }
}
