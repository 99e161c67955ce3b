//! Trust Validator - per-request pin evaluation
//!
//! `evaluate` is a pure function of the handshake result and the pinned
//! entry for the target host. The active scheme is SPKI-SHA-256 of the
//! leaf certificate only; membership is OR over the accepted set, so any
//! configured backup pin is sufficient. Verdicts are never cached: every
//! request is evaluated independently.

use crate::pinning::fingerprint::Fingerprint;
use crate::pinning::handshake::HandshakeResult;
use crate::pinning::store::PinnedHost;
use tracing::{debug, warn};

/// Trust verdict for a single intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustVerdict {
    /// Leaf SPKI fingerprint matched a configured pin
    Trusted,

    /// Handshake succeeded but the leaf key matched no configured pin
    PinMismatch,

    /// No pin entry exists for the target host
    HostUnconfigured,

    /// The handshake itself failed (network error, TLS alert, untrusted root)
    HandshakeFailed,
}

/// Evaluate a completed or failed handshake against the host's pin entry
pub fn evaluate(handshake: &HandshakeResult, pinned: Option<&PinnedHost>) -> TrustVerdict {
    let chain = match handshake {
        HandshakeResult::Completed { chain } => chain,
        HandshakeResult::Failed { reason } => {
            debug!(reason = %reason, "handshake failure routed to verdict");
            return TrustVerdict::HandshakeFailed;
        }
    };

    let Some(pinned) = pinned else {
        return TrustVerdict::HostUnconfigured;
    };

    // The chain is leaf-first; only the leaf's key identity is pinned.
    let Some(leaf) = chain.first() else {
        warn!(host = %pinned.host(), "completed handshake carried an empty chain");
        return TrustVerdict::HandshakeFailed;
    };

    let fingerprint = match Fingerprint::of_cert_der(leaf.as_ref()) {
        Ok(fp) => fp,
        Err(e) => {
            // A leaf we cannot parse cannot positively confirm trust.
            warn!(host = %pinned.host(), error = %e, "failed to fingerprint leaf certificate");
            return TrustVerdict::HandshakeFailed;
        }
    };

    if pinned.accepts(&fingerprint) {
        debug!(host = %pinned.host(), "leaf key matched a configured pin");
        TrustVerdict::Trusted
    } else {
        // The mismatching fingerprint value is deliberately not logged.
        warn!(host = %pinned.host(), "leaf key matched none of the configured pins");
        TrustVerdict::PinMismatch
    }
}
