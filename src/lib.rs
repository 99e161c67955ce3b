//! Webpin - Certificate Pinning for Embedded Web-Rendering Surfaces
//!
//! Webpin enforces certificate pinning for HTTPS requests originating from a
//! hybrid application's in-app browser component (WebView). The host platform's
//! default network stack does not apply pinning to WebView traffic, so webpin
//! intercepts eligible requests before that stack handles them, performs the
//! TLS handshake itself, and validates the server's leaf public key against a
//! static, pre-provisioned pin set.
//!
//! ## Features
//!
//! - **SPKI-SHA-256 pinning**: renewal-stable public-key fingerprints, with
//!   backup pins per host (membership is OR over the set)
//! - **Build-mode policy**: Dev falls back to the platform's default trust on
//!   failure; Prod fails closed with a fixed, non-leaking blocked page
//! - **Static pin store**: loaded once at startup from YAML or PEM files;
//!   malformed entries abort startup, never a per-request surprise
//! - **Single handshake per request**: the validated TLS stream is reused to
//!   fetch the body, and a one-shot handled marker prevents re-interception
//!
//! ## Usage
//!
//! ```rust,no_run
//! use webpin::{PinConfig, PinInterceptor, ResourceRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load pins and build mode before the surface issues any request
//!     let config = PinConfig::from_file("webpin.yaml")?;
//!     let interceptor = PinInterceptor::from_config(&config)?;
//!
//!     // Offer each candidate request from the rendering surface
//!     let request = ResourceRequest::new("https://api.example.com/data")?;
//!     let outcome = interceptor.intercept(&request).await;
//!
//!     // outcome is a real response, the blocked page, or NotHandled
//!     // (in which case the default stack proceeds normally)
//!     let _ = outcome;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `config` - pin configuration and build mode
//! - `pinning` - pin store, trust validator, policy engine, interceptor

pub mod config;
pub mod pinning;

/// Configuration types
pub use config::{BuildMode, ConfigError, HostPins, PinConfig};

/// Pinning types and functionality
pub use pinning::{
    build_blocked_response,
    evaluate,
    // Fingerprints
    Fingerprint,
    FingerprintAlgorithm,
    FingerprintError,
    HandshakeError,

    HandshakeResult,
    InterceptError,
    // Interception
    InterceptOutcome,
    // Policy
    PolicyAction,
    PolicyEngine,

    PinInterceptor,
    // Store
    PinStore,
    PinnedHost,

    ResourceRequest,
    StoreError,
    // Verdicts
    TrustVerdict,
    // Handshake
    UpstreamTls,

    BLOCKED_PAGE_HTML,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
