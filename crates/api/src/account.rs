//! The account identity store.
//!
//! Holds the single server-assigned account identifier for the current
//! session. The identifier is only ever adopted from a response body, never
//! invented locally.

use tokio::sync::watch;
use tracing::debug;

use crate::response::{ResponseBody, decode_body};

/// Body field carrying the account identifier in both directions.
pub const ACCOUNT_ID_FIELD: &str = "accountId";

pub struct AccountStore {
    tx: watch::Sender<Option<String>>,
}

impl AccountStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    pub fn account_id(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Adopt an identifier. Idempotent: setting the stored value again is a
    /// no-op and emits no change notification.
    pub fn set_account_id(&self, id: &str) -> bool {
        let changed = self.tx.borrow().as_deref() != Some(id);
        if changed {
            debug!(account_id = id, "account identifier updated");
            self.tx.send_replace(Some(id.to_owned()));
        }
        changed
    }

    /// Forget the identifier (sign-out path).
    pub fn clear(&self) -> bool {
        let changed = self.tx.borrow().is_some();
        if changed {
            self.tx.send_replace(None);
        }
        changed
    }

    /// Inspect a response body for a server-assigned identifier and adopt it
    /// if it differs from the stored one. Bodies that do not decode to a JSON
    /// object are silently ignored; the response itself is never altered.
    /// Returns the newly adopted identifier, when one was.
    pub fn reconcile(&self, body: &ResponseBody) -> Option<String> {
        let value = decode_body(body)?;
        let id = value.get(ACCOUNT_ID_FIELD)?.as_str()?;
        self.set_account_id(id).then(|| id.to_owned())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new(None)
    }
}
