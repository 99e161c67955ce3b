//! Certificate pinning core
//!
//! Composed per intercepted request, leaves first:
//! - Pin store: read-only host -> accepted fingerprint table
//! - Trust validator: handshake result + pin entry -> verdict
//! - Policy engine: verdict + build mode -> disposition
//! - Request interceptor: orchestrates the other three

pub mod fetch;
pub mod fingerprint;
pub mod handshake;
pub mod interceptor;
pub mod policy;
pub mod store;
pub mod validator;

// Re-export main types
pub use fetch::{FetchError, UpstreamResponse, MAX_RESPONSE_BYTES};
pub use fingerprint::{Fingerprint, FingerprintAlgorithm, FingerprintError, SHA256_DIGEST_LEN};
pub use handshake::{HandshakeError, HandshakeResult, TlsSession, UpstreamTls};
pub use interceptor::{InterceptError, InterceptOutcome, PinInterceptor, ResourceRequest};
pub use policy::{build_blocked_response, PolicyAction, PolicyEngine, BLOCKED_PAGE_HTML};
pub use store::{PinStore, PinnedHost, StoreError};
pub use validator::{evaluate, TrustVerdict};
