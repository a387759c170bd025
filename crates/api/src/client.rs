//! The client facade consumed by the UI layer.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use nutrio_auth::{
    AuthError, CredentialSource, CredentialStore, FileCredentialStore, HttpIdentityProvider,
    IdentityProvider, MemoryCredentialStore,
};

use crate::account::AccountStore;
use crate::augment::RequestAugmenter;
use crate::config::ApiConfig;
use crate::dispatch::Dispatcher;
use crate::error::ApiError;
use crate::escalate::{AuthNotice, Escalation, Navigator, NoopNavigator};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::transport::{HttpTransport, ReqwestTransport};

const ACCOUNT_PATH: &str = "v1/account";

pub struct ApiClientBuilder {
    config: ApiConfig,
    provider: Option<Arc<dyn IdentityProvider>>,
    store: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl ApiClientBuilder {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            provider: None,
            store: None,
            transport: None,
            navigator: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist session credentials as JSON at `path`.
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(Arc::new(FileCredentialStore::new(path)));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn build(self) -> ApiClient {
        let http = Client::new();
        let provider = self.provider.unwrap_or_else(|| {
            Arc::new(HttpIdentityProvider::new(
                http.clone(),
                self.config.identity_url.clone(),
                self.config.api_key.clone(),
            ))
        });
        let store: Arc<dyn CredentialStore> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new(http)));
        let navigator: Arc<dyn Navigator> =
            self.navigator.unwrap_or_else(|| Arc::new(NoopNavigator));

        let credentials = Arc::new(CredentialSource::new(provider, store));
        let accounts = Arc::new(AccountStore::default());
        let escalation = Arc::new(Escalation::new(navigator));
        let dispatcher = Dispatcher::new(
            credentials.clone(),
            accounts.clone(),
            RequestAugmenter::new(&self.config),
            transport,
            escalation.clone(),
        );

        ApiClient {
            config: self.config,
            credentials,
            accounts,
            escalation,
            dispatcher,
            account_tx: watch::Sender::new(None),
        }
    }
}

pub struct ApiClient {
    config: ApiConfig,
    credentials: Arc<CredentialSource>,
    accounts: Arc<AccountStore>,
    escalation: Arc<Escalation>,
    dispatcher: Dispatcher,
    account_tx: watch::Sender<Option<Value>>,
}

impl ApiClient {
    pub fn builder(config: ApiConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    /// Resume any persisted session and mark the pipeline ready. Call once at
    /// startup; requests dispatched earlier simply wait for it.
    pub async fn init(&self) {
        if let Some(account_id) = self.credentials.restore().await {
            self.accounts.set_account_id(&account_id);
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Resolve a path against the backend base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| ApiError::configuration(format!("endpoint `{path}`: {e}")))
    }

    /// Send a prepared request through the pipeline.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatcher.dispatch(request).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        let request = ApiRequest::get(self.endpoint(path)?);
        self.send(request).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        let request = ApiRequest::post(self.endpoint(path)?).with_json(body);
        self.send(request).await
    }

    /// Fetch the account resource and republish it on the account stream.
    pub async fn load_account(&self) -> Result<Option<Value>, ApiError> {
        let response = self.get(ACCOUNT_PATH).await?;
        let account = response.json();
        debug!(loaded = account.is_some(), "account resource loaded");
        self.account_tx.send_replace(account.clone());
        Ok(account)
    }

    /// Account resource stream, refreshed by [`ApiClient::load_account`].
    pub fn subscribe_account(&self) -> watch::Receiver<Option<Value>> {
        self.account_tx.subscribe()
    }

    // --- identity surface -------------------------------------------------

    pub fn ready(&self) -> bool {
        self.credentials.ready()
    }

    pub async fn wait_ready(&self) {
        self.credentials.wait_ready().await;
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.credentials.subscribe_ready()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated()
    }

    pub fn is_anonymous(&self) -> bool {
        self.credentials.is_anonymous()
    }

    pub fn subscribe_email(&self) -> watch::Receiver<Option<String>> {
        self.credentials.subscribe_email()
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.credentials.sign_in_with_email(email, password).await
    }

    /// Register an email/password credential, upgrading an active anonymous
    /// session in place. The account identifier survives the upgrade.
    pub async fn register_with_email(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.credentials.register_with_email(email, password).await
    }

    /// Sign out: the principal, the persisted credentials, and the account
    /// identifier are all cleared.
    pub fn sign_out(&self) {
        self.credentials.sign_out();
        self.accounts.clear();
        self.account_tx.send_replace(None);
    }

    // --- account identity -------------------------------------------------

    pub fn account_id(&self) -> Option<String> {
        self.accounts.account_id()
    }

    pub fn subscribe_account_id(&self) -> watch::Receiver<Option<String>> {
        self.accounts.subscribe()
    }

    // --- escalation surface -----------------------------------------------

    /// Take the pending auth notice, if any. Read-once.
    pub fn consume_notice(&self) -> Option<AuthNotice> {
        self.escalation.consume_notice()
    }

    pub fn subscribe_notices(&self) -> watch::Receiver<Option<AuthNotice>> {
        self.escalation.subscribe_notices()
    }

    /// Where to return the user after re-authentication. Read-once.
    pub fn consume_last_attempted_route(&self, default: &str) -> String {
        self.escalation.consume_last_attempted_route(default)
    }
}
