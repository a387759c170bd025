//! The credential source: owner of the current principal.
//!
//! A process starts with no principal and a not-ready session. [`CredentialSource::restore`]
//! runs once at startup, resumes any persisted session, and flips the
//! readiness signal exactly once regardless of outcome. From then on the
//! principal mutates only through sign-in, registration, sign-out, or an
//! on-demand anonymous bootstrap inside [`CredentialSource::current_token`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::provider::{IdentityProvider, ProviderTokens};
use crate::store::{CredentialStore, PersistedCredentials};

/// Tokens are treated as stale this long before their actual expiry, so a
/// token attached to a request does not lapse mid-flight.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(60);

/// Cached bearer-token material for the current principal.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: Instant,
}

impl TokenPair {
    pub fn from_provider(tokens: &ProviderTokens) -> Self {
        Self {
            id_token: tokens.id_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(tokens.expires_in_secs()),
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_LEEWAY < self.expires_at
    }
}

/// The identity behind the session.
#[derive(Debug, Clone)]
pub enum Principal {
    Anonymous { uid: String, tokens: TokenPair },
    Authenticated {
        uid: String,
        email: String,
        tokens: TokenPair,
    },
}

impl Principal {
    pub fn uid(&self) -> &str {
        match self {
            Self::Anonymous { uid, .. } | Self::Authenticated { uid, .. } => uid,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Anonymous { .. } => None,
            Self::Authenticated { email, .. } => Some(email),
        }
    }

    pub fn tokens(&self) -> &TokenPair {
        match self {
            Self::Anonymous { tokens, .. } | Self::Authenticated { tokens, .. } => tokens,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }

    fn set_tokens(&mut self, pair: TokenPair) {
        match self {
            Self::Anonymous { tokens, .. } | Self::Authenticated { tokens, .. } => *tokens = pair,
        }
    }
}

pub struct CredentialSource {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn CredentialStore>,
    principal: RwLock<Option<Principal>>,
    ready_tx: watch::Sender<bool>,
    email_tx: watch::Sender<Option<String>>,
}

impl CredentialSource {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider,
            store,
            principal: RwLock::new(None),
            ready_tx: watch::Sender::new(false),
            email_tx: watch::Sender::new(None),
        }
    }

    /// Resume any persisted session, then mark the source ready.
    ///
    /// Readiness flips exactly once per process, whatever the restore outcome:
    /// a resumed sign-in, a resumed anonymous session, or nothing to resume.
    /// Returns the persisted account identifier, if one was stored, so the
    /// caller can seed its account state.
    pub async fn restore(&self) -> Option<String> {
        let mut restored_account = None;

        match self.store.load() {
            Ok(Some(saved)) => {
                restored_account = saved.account_id.clone();
                match self.provider.refresh(&saved.refresh_token).await {
                    Ok(tokens) => {
                        let pair = TokenPair::from_provider(&tokens);
                        let uid = tokens.uid.clone().unwrap_or_else(|| saved.uid.clone());
                        let email = saved.email.clone().or_else(|| tokens.email.clone());
                        let principal = match email {
                            Some(email) => Principal::Authenticated { uid, email, tokens: pair },
                            None => Principal::Anonymous { uid, tokens: pair },
                        };
                        debug!(uid = principal.uid(), anonymous = principal.is_anonymous(), "resumed persisted session");
                        self.install(principal);
                        self.persist_current();
                    }
                    Err(e) if e.is_rejection() => {
                        warn!(error = %e, "persisted session was rejected, discarding it");
                        if let Err(e) = self.store.clear() {
                            warn!(error = %e, "failed to discard persisted credentials");
                        }
                    }
                    Err(e) => {
                        // Provider unreachable: stay signed out for now but keep
                        // the credentials for the next launch.
                        warn!(error = %e, "could not resume persisted session");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read persisted credentials"),
        }

        self.ready_tx.send_replace(true);
        restored_account
    }

    pub fn ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Suspend until the first identity state is known.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives inside self, so this wait cannot error out.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal
            .read()
            .as_ref()
            .is_some_and(|p| !p.is_anonymous())
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal
            .read()
            .as_ref()
            .is_some_and(Principal::is_anonymous)
    }

    pub fn uid(&self) -> Option<String> {
        self.principal.read().as_ref().map(|p| p.uid().to_owned())
    }

    /// Email of the signed-in user, republished on every principal transition.
    pub fn subscribe_email(&self) -> watch::Receiver<Option<String>> {
        self.email_tx.subscribe()
    }

    /// Current bearer token.
    ///
    /// With no principal an anonymous session is silently established. With a
    /// principal the cached token is returned unless it is stale or
    /// `force_refresh` is set, in which case the provider is asked for a new
    /// one. Returns `None` only when no token can be obtained at all.
    pub async fn current_token(&self, force_refresh: bool) -> Option<String> {
        let snapshot = self.principal.read().clone();
        let Some(principal) = snapshot else {
            return self.bootstrap_anonymous().await;
        };

        if !force_refresh && principal.tokens().is_fresh() {
            return Some(principal.tokens().id_token.clone());
        }

        match self.provider.refresh(&principal.tokens().refresh_token).await {
            Ok(tokens) => {
                let pair = TokenPair::from_provider(&tokens);
                let token = pair.id_token.clone();
                let stale = {
                    let mut guard = self.principal.write();
                    match guard.as_mut() {
                        Some(current) if current.uid() == principal.uid() => {
                            current.set_tokens(pair);
                            false
                        }
                        // The session changed hands while we were refreshing;
                        // the token we just minted belongs to the old one.
                        _ => true,
                    }
                };
                if stale {
                    debug!(uid = principal.uid(), "session changed during token refresh");
                    return None;
                }
                self.persist_current();
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                None
            }
        }
    }

    async fn bootstrap_anonymous(&self) -> Option<String> {
        match self.provider.sign_up_anonymous().await {
            Ok(tokens) => {
                let pair = TokenPair::from_provider(&tokens);
                let uid = tokens.uid.clone().unwrap_or_default();
                let minted = pair.id_token.clone();
                let token = {
                    let mut guard = self.principal.write();
                    match guard.as_ref() {
                        // A concurrent caller installed a principal first; use
                        // theirs and drop the session we just minted.
                        Some(existing) => existing.tokens().id_token.clone(),
                        None => {
                            *guard = Some(Principal::Anonymous { uid, tokens: pair });
                            minted
                        }
                    }
                };
                self.publish_email();
                self.persist_current();
                debug!("anonymous session established");
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "anonymous bootstrap failed");
                None
            }
        }
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let tokens = self.provider.sign_in_with_password(email, password).await?;
        self.adopt_authenticated(tokens, email);
        Ok(())
    }

    /// Register an email/password credential.
    ///
    /// With an active principal the credential is linked onto it, keeping the
    /// uid (and anything the server already associated with it) intact; this
    /// is how an anonymous session is upgraded in place. With no principal a
    /// fresh credentialed account is created. On failure the prior principal
    /// is left untouched.
    pub async fn register_with_email(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let snapshot = self.principal.read().clone();
        let (tokens, prior_uid) = match snapshot {
            Some(principal) => {
                let id_token = if principal.tokens().is_fresh() {
                    principal.tokens().id_token.clone()
                } else {
                    // The link call is keyed by the id token; mint a fresh one
                    // first, without touching the installed principal.
                    self.provider
                        .refresh(&principal.tokens().refresh_token)
                        .await?
                        .id_token
                };
                let tokens = self.provider.link_password(&id_token, email, password).await?;
                (tokens, Some(principal.uid().to_owned()))
            }
            None => (
                self.provider.sign_up_with_password(email, password).await?,
                None,
            ),
        };

        let uid = tokens.uid.clone().or(prior_uid).unwrap_or_default();
        let principal = Principal::Authenticated {
            uid,
            email: email.to_owned(),
            tokens: TokenPair::from_provider(&tokens),
        };
        self.install(principal);
        self.persist_current();
        Ok(())
    }

    /// Drop the principal and its persisted credentials. The next
    /// `current_token` call re-establishes a fresh anonymous session.
    pub fn sign_out(&self) {
        *self.principal.write() = None;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear persisted credentials");
        }
        self.publish_email();
        debug!("signed out");
    }

    /// Record the server-assigned account identifier next to the persisted
    /// refresh token. Best-effort; a persistence failure is only logged.
    pub fn update_persisted_account_id(&self, account_id: Option<&str>) {
        match self.store.load() {
            Ok(Some(mut saved)) => {
                let next = account_id.map(str::to_owned);
                if saved.account_id != next {
                    saved.account_id = next;
                    if let Err(e) = self.store.save(&saved) {
                        warn!(error = %e, "failed to persist account identifier");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read persisted credentials"),
        }
    }

    fn adopt_authenticated(&self, tokens: ProviderTokens, email: &str) {
        let principal = Principal::Authenticated {
            uid: tokens.uid.clone().unwrap_or_default(),
            email: tokens.email.clone().unwrap_or_else(|| email.to_owned()),
            tokens: TokenPair::from_provider(&tokens),
        };
        self.install(principal);
        self.persist_current();
    }

    fn install(&self, principal: Principal) {
        *self.principal.write() = Some(principal);
        self.publish_email();
    }

    fn publish_email(&self) {
        let email = self
            .principal
            .read()
            .as_ref()
            .and_then(|p| p.email().map(str::to_owned));
        self.email_tx.send_replace(email);
    }

    /// Write the current principal's token material through the store,
    /// carrying over whatever account identifier was already persisted.
    fn persist_current(&self) {
        let snapshot = self.principal.read().clone();
        let Some(principal) = snapshot else { return };
        let account_id = self
            .store
            .load()
            .ok()
            .flatten()
            .and_then(|saved| saved.account_id);
        let credentials = PersistedCredentials {
            refresh_token: principal.tokens().refresh_token.clone(),
            uid: principal.uid().to_owned(),
            email: principal.email().map(str::to_owned),
            account_id,
        };
        if let Err(e) = self.store.save(&credentials) {
            warn!(error = %e, "failed to persist session");
        }
    }
}
