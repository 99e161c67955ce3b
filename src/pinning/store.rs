//! Pin Store - host identity to accepted fingerprint sets
//!
//! The store is built once at startup from validated configuration and is
//! immutable afterwards, so concurrent readers need no synchronization.
//! Lookups are exact host-name matches only: no wildcard or subdomain
//! broadening, and a host absent from the store is "unconfigured", never
//! "trust everything".

use crate::pinning::fingerprint::Fingerprint;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Pin store construction errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pin set for host {0} is empty")]
    EmptyPinSet(String),

    #[error("host {0} is pinned more than once")]
    DuplicateHost(String),
}

/// A host with its accepted public-key fingerprints
///
/// Multiple fingerprints express backup/rotation pins: a presented key
/// matching any one of them is sufficient.
#[derive(Debug, Clone)]
pub struct PinnedHost {
    host: String,
    accepted_fingerprints: HashSet<Fingerprint>,
}

impl PinnedHost {
    /// Create a pinned host entry; the fingerprint set must be non-empty
    pub fn new(
        host: impl Into<String>,
        fingerprints: impl IntoIterator<Item = Fingerprint>,
    ) -> Result<Self, StoreError> {
        let host = host.into();
        let accepted_fingerprints: HashSet<Fingerprint> = fingerprints.into_iter().collect();

        if accepted_fingerprints.is_empty() {
            return Err(StoreError::EmptyPinSet(host));
        }

        Ok(Self {
            host,
            accepted_fingerprints,
        })
    }

    /// Pinned host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the fingerprint is a member of the accepted set
    pub fn accepts(&self, fingerprint: &Fingerprint) -> bool {
        self.accepted_fingerprints.contains(fingerprint)
    }

    /// Number of accepted fingerprints
    pub fn pin_count(&self) -> usize {
        self.accepted_fingerprints.len()
    }
}

/// Read-only-after-init table of pinned hosts
#[derive(Debug, Default)]
pub struct PinStore {
    hosts: HashMap<String, PinnedHost>,
}

impl PinStore {
    /// Build a store from validated entries
    pub fn from_entries(entries: Vec<PinnedHost>) -> Result<Self, StoreError> {
        let mut hosts = HashMap::with_capacity(entries.len());

        for entry in entries {
            if hosts.contains_key(entry.host()) {
                return Err(StoreError::DuplicateHost(entry.host().to_string()));
            }
            hosts.insert(entry.host().to_string(), entry);
        }

        Ok(Self { hosts })
    }

    /// Look up a host by exact name match
    pub fn lookup(&self, host: &str) -> Option<&PinnedHost> {
        self.hosts.get(host)
    }

    /// Number of pinned hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether the store has no entries
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
