//! Policy Engine - verdict plus build mode to disposition
//!
//! The build mode is fixed at construction; there is no runtime toggle, so
//! an in-flight decision can never race against a mode change. The decision
//! table:
//!
//! | Verdict          | Dev         | Prod         |
//! |------------------|-------------|--------------|
//! | Trusted          | serve real  | serve real   |
//! | PinMismatch      | passthrough | serve blocked|
//! | HostUnconfigured | passthrough | serve blocked|
//! | HandshakeFailed  | passthrough | serve blocked|
//!
//! Unconfigured hosts in Prod fail closed by explicit choice. Dev-mode
//! passthrough keeps local and staging environments with self-signed or
//! non-pinned certificates usable.

use crate::config::BuildMode;
use crate::pinning::validator::TrustVerdict;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, PRAGMA};
use http::{Response, StatusCode};
use http_body_util::Full;

/// Fixed blocked-page body
///
/// Static and non-parameterized: no host, URL, fingerprint, or error detail
/// is ever interpolated, so a hostile network path learns nothing from it.
pub const BLOCKED_PAGE_HTML: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Secure connection failed</title></head>\
<body><h3>Secure connection failed.</h3>\
<p>The identity of the server could not be verified.</p></body></html>";

/// What the interceptor should do with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Fetch and serve the real response over the validated session
    ServeUpstream,

    /// Synthesize the fixed blocked page
    ServeBlocked,

    /// Decline the request entirely; the default stack proceeds
    Passthrough,
}

/// Turns trust verdicts into dispositions for a fixed build mode
#[derive(Debug, Clone, Copy)]
pub struct PolicyEngine {
    build_mode: BuildMode,
}

impl PolicyEngine {
    /// Create an engine for the given build mode
    pub fn new(build_mode: BuildMode) -> Self {
        Self { build_mode }
    }

    /// Build mode this engine was constructed with
    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    /// Decide the disposition for a verdict
    pub fn decide(&self, verdict: TrustVerdict) -> PolicyAction {
        match (verdict, self.build_mode) {
            (TrustVerdict::Trusted, _) => PolicyAction::ServeUpstream,
            (_, BuildMode::Dev) => PolicyAction::Passthrough,
            (_, BuildMode::Prod) => PolicyAction::ServeBlocked,
        }
    }
}

/// Build the synthesized blocked response
///
/// `text/html`, UTF-8, non-cacheable. The 502 status makes the failure
/// client-visible without describing it.
pub fn build_blocked_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(CACHE_CONTROL, "no-store")
        .header(PRAGMA, "no-cache")
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::from_static(BLOCKED_PAGE_HTML.as_bytes())))
        .unwrap()
}
