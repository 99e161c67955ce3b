//! Request Interceptor - orchestrates pin enforcement per request
//!
//! Flow per candidate request: eligibility check, one upstream TLS
//! handshake, trust verdict, policy decision, disposition. Only `https`
//! requests without the one-shot handled marker are eligible; everything
//! else is declined immediately with no side effects.
//!
//! `intercept` is async and must not run on the rendering surface's UI
//! scheduling thread. Cancellation is dropping the returned future: the
//! in-flight handshake or fetch is aborted, the connection is closed, and
//! no disposition is produced.

use crate::config::{ConfigError, PinConfig};
use crate::pinning::fetch;
use crate::pinning::handshake::{HandshakeError, HandshakeResult, UpstreamTls};
use crate::pinning::policy::{self, PolicyAction, PolicyEngine};
use crate::pinning::store::PinStore;
use crate::pinning::validator::{self, TrustVerdict};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::Full;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

const HTTPS_SCHEME: &str = "https";
const DEFAULT_HTTPS_PORT: u16 = 443;

/// Interceptor construction errors
///
/// Configuration problems surface here, before the interceptor can be
/// registered with any pipeline: running with a corrupt pin store is worse
/// than not pinning at all.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS initialization failed: {0}")]
    TlsInit(#[from] HandshakeError),
}

/// A candidate request offered by the rendering surface
///
/// The URL-derived context (host, scheme, port) is fixed for the request's
/// lifetime. The `handled` marker is the re-entrancy guard: a request
/// carrying it is never intercepted again, mirroring how the interceptor's
/// own traffic must tag itself if it is ever re-offered to the pipeline.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    url: Url,
    handled: bool,
}

impl ResourceRequest {
    /// Parse a request URL
    pub fn new(url: &str) -> Result<Self, InterceptError> {
        let url = Url::parse(url).map_err(|e| InterceptError::InvalidUrl(e.to_string()))?;
        Ok(Self::from_url(url))
    }

    /// Wrap an already-parsed URL
    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            handled: false,
        }
    }

    /// Request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Target host, if the URL has one
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// URL scheme
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Set the one-shot handled marker
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Whether the handled marker is set
    pub fn is_marked_handled(&self) -> bool {
        self.handled
    }

    fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(DEFAULT_HTTPS_PORT)
    }

    fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// Outcome handed back to the rendering surface
#[derive(Debug)]
pub enum InterceptOutcome {
    /// The interceptor produced a response (real upstream body or the fixed
    /// blocked page)
    Response(Response<Full<Bytes>>),

    /// The interceptor declined; the default network stack proceeds with its
    /// own, non-pinned trust decision
    NotHandled,
}

impl InterceptOutcome {
    /// Whether the interceptor handled the request
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// Pin-enforcing request interceptor
///
/// Shares only the read-only pin store and a fixed-mode policy engine across
/// requests; each intercepted request is otherwise independent and may run
/// concurrently with others.
pub struct PinInterceptor {
    store: Arc<PinStore>,
    policy: PolicyEngine,
    tls: Arc<UpstreamTls>,
}

impl PinInterceptor {
    /// Build an interceptor from validated configuration
    ///
    /// Any malformed pin entry aborts construction; configuration errors are
    /// never deferred to per-request handling.
    pub fn from_config(config: &PinConfig) -> Result<Self, InterceptError> {
        let store = Arc::new(config.build_store()?);
        let policy = PolicyEngine::new(config.build_mode());
        Self::new(store, policy)
    }

    /// Build an interceptor from an existing store and policy engine
    pub fn new(store: Arc<PinStore>, policy: PolicyEngine) -> Result<Self, InterceptError> {
        let tls = Arc::new(UpstreamTls::new()?);

        info!(
            pinned_hosts = store.len(),
            build_mode = ?policy.build_mode(),
            "pin interceptor initialized"
        );

        Ok(Self { store, policy, tls })
    }

    /// Replace the upstream TLS configuration
    ///
    /// For deployments with a private CA; pin evaluation is unchanged.
    pub fn with_upstream_tls(mut self, tls: UpstreamTls) -> Self {
        self.tls = Arc::new(tls);
        self
    }

    /// Whether a request qualifies for pin evaluation
    fn eligible(&self, request: &ResourceRequest) -> bool {
        request.scheme() == HTTPS_SCHEME && !request.is_marked_handled()
    }

    /// Intercept one candidate request
    ///
    /// Performs exactly one upstream handshake for an eligible request; the
    /// resulting TLS stream is reused to fetch the body when trusted.
    pub async fn intercept(&self, request: &ResourceRequest) -> InterceptOutcome {
        if !self.eligible(request) {
            debug!(
                url = %request.url(),
                marked = request.is_marked_handled(),
                "request not eligible for pin evaluation"
            );
            return InterceptOutcome::NotHandled;
        }

        // https URLs always carry a host; anything else is not ours to judge.
        let Some(host) = request.host() else {
            return InterceptOutcome::NotHandled;
        };
        let host = host.to_string();
        let pinned = self.store.lookup(&host);

        let (handshake, session) = match self.tls.connect(&host, request.port()).await {
            Ok(session) => (session.handshake_result(), Some(session)),
            Err(reason) => {
                warn!(host = %host, error = %reason, "upstream TLS handshake failed");
                (HandshakeResult::Failed { reason }, None)
            }
        };

        let verdict = validator::evaluate(&handshake, pinned);
        debug!(host = %host, verdict = ?verdict, "trust verdict");

        match self.policy.decide(verdict) {
            PolicyAction::Passthrough => {
                info!(host = %host, "declining request, default stack proceeds");
                InterceptOutcome::NotHandled
            }
            PolicyAction::ServeBlocked => {
                warn!(host = %host, "serving blocked page");
                InterceptOutcome::Response(policy::build_blocked_response())
            }
            PolicyAction::ServeUpstream => {
                // decide() only returns ServeUpstream for a Trusted verdict,
                // which requires a completed handshake.
                let Some(mut session) = session else {
                    return self.failed_exchange(&host);
                };

                match fetch::exchange(session.stream_mut(), &host, &request.target()).await {
                    Ok(upstream) => {
                        info!(
                            host = %host,
                            status = upstream.status,
                            body_len = upstream.body.len(),
                            "serving validated upstream response"
                        );
                        InterceptOutcome::Response(into_response(upstream))
                    }
                    Err(e) => {
                        warn!(host = %host, error = %e, "upstream exchange failed after trust");
                        self.failed_exchange(&host)
                    }
                }
            }
        }
    }

    /// Disposition for an exchange that died after the handshake
    ///
    /// Routed through the policy as a handshake failure: Prod fails closed,
    /// Dev defers to the default stack.
    fn failed_exchange(&self, host: &str) -> InterceptOutcome {
        match self.policy.decide(TrustVerdict::HandshakeFailed) {
            PolicyAction::Passthrough => InterceptOutcome::NotHandled,
            _ => {
                warn!(host = %host, "serving blocked page for failed exchange");
                InterceptOutcome::Response(policy::build_blocked_response())
            }
        }
    }
}

/// Convert a fetched upstream response into the surface-facing form
fn into_response(upstream: fetch::UpstreamResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);

    let mut response = Response::new(Full::new(upstream.body));
    *response.status_mut() = status;

    if let Some(value) = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }

    response
}
