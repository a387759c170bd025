//! Failure escalation: the terminal path of the pipeline.
//!
//! When a request cannot be authenticated even after the refresh protocol,
//! the pipeline records where the user was, leaves them a one-shot notice
//! explaining the redirect, and asks the navigator to bring up the login
//! entry point. All of it is best-effort; the original error still reaches
//! the caller.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please sign in again to continue.";
pub const SIGN_IN_MESSAGE: &str =
    "Sign in or continue as guest to keep tracking your meals.";

/// One-shot user-facing message shown after a forced redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthNotice {
    pub message: String,
}

/// Why escalation fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    /// No credential could be acquired at all.
    NoCredential,
    /// A credential existed but the server kept rejecting it.
    SessionExpired,
}

impl EscalationReason {
    fn message(self) -> &'static str {
        match self {
            Self::NoCredential => SIGN_IN_MESSAGE,
            Self::SessionExpired => SESSION_EXPIRED_MESSAGE,
        }
    }
}

/// Navigation hooks implemented by the embedding UI layer.
pub trait Navigator: Send + Sync {
    /// The route the user is currently on, if the UI knows it.
    fn current_route(&self) -> Option<String>;
    /// Force navigation to the login entry point.
    fn go_to_login(&self);
}

/// Default navigator for embedders without a routing layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_route(&self) -> Option<String> {
        None
    }

    fn go_to_login(&self) {}
}

pub struct Escalation {
    navigator: Arc<dyn Navigator>,
    notice_tx: watch::Sender<Option<AuthNotice>>,
    last_route: Mutex<Option<String>>,
}

impl Escalation {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            navigator,
            notice_tx: watch::Sender::new(None),
            last_route: Mutex::new(None),
        }
    }

    /// Run the escalation side effects for a terminal auth failure.
    pub fn escalate(&self, reason: EscalationReason) {
        warn!(?reason, "escalating terminal auth failure");

        if let Some(route) = self.navigator.current_route() {
            *self.last_route.lock() = Some(route);
        }

        self.notice_tx.send_replace(Some(AuthNotice {
            message: reason.message().to_owned(),
        }));

        self.navigator.go_to_login();
    }

    /// Take the pending notice, if any. Read-once: a second call returns
    /// `None` until the next escalation.
    pub fn consume_notice(&self) -> Option<AuthNotice> {
        self.notice_tx.send_replace(None)
    }

    /// Stream of pending notices for the UI banner.
    pub fn subscribe_notices(&self) -> watch::Receiver<Option<AuthNotice>> {
        self.notice_tx.subscribe()
    }

    /// Where to send the user back after they re-authenticate. Read-once;
    /// falls back to `default` when no route was recorded.
    pub fn consume_last_attempted_route(&self, default: &str) -> String {
        match self.last_route.lock().take() {
            Some(route) => route,
            None => {
                debug!("no attempted route recorded, using default");
                default.to_owned()
            }
        }
    }
}
