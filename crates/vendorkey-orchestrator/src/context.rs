//! Per-session activation context
//!
//! Holds the mutable state one administrator session carries between
//! coordinator calls: whether the session resumed from the payer redirect,
//! and the in-flight guard that keeps activation and commit single-entry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

/// Query flag the payer redirect appends to the return URL
pub const LICENSE_PENDING_PARAM: &str = "licensePending";

/// Guard key shared by everything that writes the vendor record or the
/// provider signatures derived from it
const VENDOR_RECORD: &str = "vendor-record";

/// Which operation a guard entry protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardScope {
    /// The full activation sequence, a standalone settings re-sign or a
    /// candidate abandonment; one per vendor record
    Activation,
    /// `commit_verifying_key`
    Commit,
}

type GuardEntry = (GuardScope, String);

/// Tracks which (scope, key) pairs have an operation in flight
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    entries: Arc<Mutex<HashSet<GuardEntry>>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` under `scope`; None if already claimed
    pub fn try_acquire(&self, scope: GuardScope, key: &str) -> Option<InFlightTicket> {
        let entry = (scope, key.to_string());
        let mut entries = self.lock();
        if !entries.insert(entry.clone()) {
            debug!(?scope, key, "Operation already in flight");
            return None;
        }
        Some(InFlightTicket {
            entries: self.entries.clone(),
            entry,
        })
    }

    pub fn is_in_flight(&self, scope: GuardScope, key: &str) -> bool {
        self.lock().contains(&(scope, key.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<GuardEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its guard entry on drop
#[derive(Debug)]
pub struct InFlightTicket {
    entries: Arc<Mutex<HashSet<GuardEntry>>>,
    entry: GuardEntry,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(&self.entry);
    }
}

/// Session context passed to every coordinator call
#[derive(Debug, Clone, Default)]
pub struct ActivationContext {
    guard: InFlightGuard,
    license_pending: bool,
}

impl ActivationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a session that returned from the payer with `return_url`
    ///
    /// The flag may sit in the fragment (`#/licensing?licensePending=true`)
    /// or in the query string.
    pub fn from_return_url(return_url: &str) -> Self {
        let license_pending = match Url::parse(return_url) {
            Ok(url) => {
                let fragment_query = url
                    .fragment()
                    .and_then(|fragment| fragment.split_once('?'))
                    .map(|(_, query)| query)
                    .unwrap_or_default();
                url.query_pairs()
                    .chain(form_urlencoded::parse(fragment_query.as_bytes()))
                    .any(|(name, value)| name == LICENSE_PENDING_PARAM && value == "true")
            }
            Err(e) => {
                warn!("Ignoring unparseable return URL: {}", e);
                false
            }
        };

        Self {
            guard: InFlightGuard::new(),
            license_pending,
        }
    }

    /// Claim the vendor record for an activation-scope operation
    pub fn try_claim_record(&self) -> Option<InFlightTicket> {
        self.guard.try_acquire(GuardScope::Activation, VENDOR_RECORD)
    }

    pub fn guard(&self) -> &InFlightGuard {
        &self.guard
    }

    pub fn license_pending(&self) -> bool {
        self.license_pending
    }

    /// Consume the redirect flag so a later call in the same session polls
    /// with the interactive policy
    pub fn take_license_pending(&mut self) -> bool {
        std::mem::take(&mut self.license_pending)
    }
}
