//! Upstream TLS handshake - chain capture for pin evaluation
//!
//! The interceptor performs its own TLS handshake against the target so the
//! presented certificate chain can be validated against the pin store. The
//! handshake uses the Mozilla root bundle for ordinary path validation; an
//! untrusted root is therefore a handshake failure, not a pin decision.
//!
//! A successful handshake yields a [`TlsSession`] holding both the captured
//! leaf-first chain and the live stream, so a trusted request can fetch its
//! body without a second handshake.

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("server presented no certificate chain")]
    EmptyChain,
}

/// Outcome of a handshake attempt, as consumed by the trust validator
///
/// `Completed` carries the leaf-first DER chain; the live stream stays with
/// the [`TlsSession`] so the validator remains a pure function of the chain.
#[derive(Debug)]
pub enum HandshakeResult {
    /// Handshake succeeded; chain is leaf-first and non-empty
    Completed { chain: Vec<CertificateDer<'static>> },

    /// Handshake failed at the network or TLS layer
    Failed { reason: HandshakeError },
}

/// An established upstream TLS session
pub struct TlsSession {
    chain: Vec<CertificateDer<'static>>,
    stream: TlsStream<TcpStream>,
}

impl TlsSession {
    /// Leaf-first certificate chain presented by the server
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Mutable access to the underlying stream for the upstream exchange
    pub fn stream_mut(&mut self) -> &mut TlsStream<TcpStream> {
        &mut self.stream
    }

    /// Handshake result view of this session's chain
    pub fn handshake_result(&self) -> HandshakeResult {
        HandshakeResult::Completed {
            chain: self.chain.clone(),
        }
    }
}

/// Upstream TLS configuration (interceptor acts as client)
///
/// TLS 1.2 and 1.3 only, HTTP/1.1 ALPN, SNI from the request host.
pub struct UpstreamTls {
    config: Arc<ClientConfig>,
}

impl UpstreamTls {
    /// Build a config trusting the Mozilla CA bundle
    pub fn new() -> Result<Self, HandshakeError> {
        let mut roots = RootCertStore::empty();
        roots.extend(TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Build a config with a caller-provided root store
    ///
    /// Used by tests and by hosts that ship a private CA; pin evaluation is
    /// unaffected, this only controls whether the handshake itself succeeds.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, HandshakeError> {
        let mut config = ClientConfig::builder_with_protocol_versions(&[&TLS12, &TLS13])
            .with_root_certificates(roots)
            .with_no_client_auth();

        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Connect and complete the TLS handshake, capturing the presented chain
    pub async fn connect(&self, host: &str, port: u16) -> Result<TlsSession, HandshakeError> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| HandshakeError::InvalidServerName(e.to_string()))?;

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(HandshakeError::Connect)?;

        let connector = TlsConnector::from(Arc::clone(&self.config));
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| HandshakeError::Tls(e.to_string()))?;

        let chain: Vec<CertificateDer<'static>> = stream
            .get_ref()
            .1
            .peer_certificates()
            .unwrap_or_default()
            .to_vec();

        if chain.is_empty() {
            return Err(HandshakeError::EmptyChain);
        }

        debug!(
            host = %host,
            port = port,
            chain_len = chain.len(),
            "upstream TLS handshake completed"
        );

        Ok(TlsSession { chain, stream })
    }
}
