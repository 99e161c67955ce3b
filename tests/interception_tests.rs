//! End-to-end interception tests
//!
//! Runs a local TLS server with a throwaway CA and exercises the full
//! intercept flow: eligibility, handshake, verdict, policy, disposition.

use bytes::Bytes;
use http::header::CACHE_CONTROL;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use rcgen::{BasicConstraints, Certificate, CertificateParams, IsCa};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use webpin::{
    BuildMode, Fingerprint, InterceptOutcome, PinConfig, PinInterceptor, PolicyEngine,
    ResourceRequest, UpstreamTls, BLOCKED_PAGE_HTML,
};

const UPSTREAM_BODY: &str = "hello from upstream";
const UPSTREAM_CONTENT_TYPE: &str = "text/plain";

// ============================================================================
// Test harness
// ============================================================================

struct TestUpstream {
    port: u16,
    ca_der: Vec<u8>,
    leaf_der: Vec<u8>,
    accepts: Arc<AtomicUsize>,
}

impl TestUpstream {
    /// Spawn a TLS server for "localhost" behind a throwaway CA
    async fn spawn() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new());
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = Certificate::from_params(ca_params).unwrap();
        let ca_der = ca.serialize_der().unwrap();

        let leaf = Certificate::from_params(CertificateParams::new(vec![
            "localhost".to_string(),
        ]))
        .unwrap();
        let leaf_der = leaf.serialize_der_with_signer(&ca).unwrap();
        let leaf_key = leaf.serialize_private_key_der();

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(leaf_der.clone())],
                PrivateKeyDer::Pkcs8(leaf_key.into()),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts_counter = Arc::clone(&accepts);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepts_counter.fetch_add(1, Ordering::SeqCst);

                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };

                    let mut buf = vec![0u8; 4096];
                    let _ = tls.read(&mut buf).await;

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {UPSTREAM_CONTENT_TYPE}\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{UPSTREAM_BODY}",
                        UPSTREAM_BODY.len()
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self {
            port,
            ca_der,
            leaf_der,
            accepts,
        }
    }

    fn leaf_fingerprint(&self) -> Fingerprint {
        Fingerprint::of_cert_der(&self.leaf_der).unwrap()
    }

    /// Upstream TLS config that trusts the test CA
    fn trusting_tls(&self) -> UpstreamTls {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(self.ca_der.clone())).unwrap();
        UpstreamTls::with_roots(roots).unwrap()
    }

    fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.port, path)
    }

    fn handshakes(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

fn interceptor_with_pins(
    upstream: &TestUpstream,
    mode: BuildMode,
    pins: Vec<Fingerprint>,
) -> PinInterceptor {
    let config = PinConfig::new(mode).with_host(
        "localhost",
        pins.iter().map(|fp| fp.to_string()).collect::<Vec<_>>(),
    );
    PinInterceptor::from_config(&config)
        .unwrap()
        .with_upstream_tls(upstream.trusting_tls())
}

fn interceptor_without_pins(upstream: &TestUpstream, mode: BuildMode) -> PinInterceptor {
    PinInterceptor::from_config(&PinConfig::new(mode))
        .unwrap()
        .with_upstream_tls(upstream.trusting_tls())
}

async fn body_bytes(response: http::Response<Full<Bytes>>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

// ============================================================================
// Trusted path
// ============================================================================

#[tokio::test]
async fn test_matching_pin_serves_real_body_in_both_modes() {
    let upstream = TestUpstream::spawn().await;

    for mode in [BuildMode::Dev, BuildMode::Prod] {
        let interceptor =
            interceptor_with_pins(&upstream, mode, vec![upstream.leaf_fingerprint()]);
        let request = ResourceRequest::new(&upstream.url("/data")).unwrap();

        let InterceptOutcome::Response(response) = interceptor.intercept(&request).await else {
            panic!("trusted request must be handled in {mode:?} mode");
        };

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            UPSTREAM_CONTENT_TYPE
        );
        assert_eq!(&body_bytes(response).await[..], UPSTREAM_BODY.as_bytes());
    }
}

#[tokio::test]
async fn test_backup_pin_is_sufficient() {
    let upstream = TestUpstream::spawn().await;

    // The presented key matches only the second pin in the set.
    let decoy = Fingerprint::from_sha256([0xAA; 32]);
    let interceptor = interceptor_with_pins(
        &upstream,
        BuildMode::Prod,
        vec![decoy, upstream.leaf_fingerprint()],
    );

    let request = ResourceRequest::new(&upstream.url("/data")).unwrap();
    let outcome = interceptor.intercept(&request).await;

    let InterceptOutcome::Response(response) = outcome else {
        panic!("backup pin must validate");
    };
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_exactly_one_handshake_per_request() {
    let upstream = TestUpstream::spawn().await;
    let interceptor =
        interceptor_with_pins(&upstream, BuildMode::Prod, vec![upstream.leaf_fingerprint()]);

    let request = ResourceRequest::new(&upstream.url("/data")).unwrap();

    interceptor.intercept(&request).await;
    assert_eq!(upstream.handshakes(), 1);

    // A repeated identical request validates again; no verdict caching.
    let outcome = interceptor.intercept(&request).await;
    assert_eq!(upstream.handshakes(), 2);
    assert!(outcome.is_handled());
}

// ============================================================================
// Pin mismatch
// ============================================================================

#[tokio::test]
async fn test_mismatch_blocks_in_prod() {
    let upstream = TestUpstream::spawn().await;

    let pinned = Fingerprint::from_sha256([0xAA; 32]);
    let interceptor = interceptor_with_pins(&upstream, BuildMode::Prod, vec![pinned]);

    let request = ResourceRequest::new(&upstream.url("/data?token=secret")).unwrap();
    let InterceptOutcome::Response(response) = interceptor.intercept(&request).await else {
        panic!("prod mismatch must be handled with a blocked page");
    };

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");

    let body = body_bytes(response).await;
    assert_eq!(&body[..], BLOCKED_PAGE_HTML.as_bytes());

    // No request- or pin-specific data leaks into the page.
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(!text.contains("localhost"));
    assert!(!text.contains("token=secret"));
    assert!(!text.contains(&pinned.to_string()));
    assert!(!text.contains(&upstream.leaf_fingerprint().to_string()));
}

#[tokio::test]
async fn test_mismatch_passes_through_in_dev() {
    let upstream = TestUpstream::spawn().await;

    let interceptor = interceptor_with_pins(
        &upstream,
        BuildMode::Dev,
        vec![Fingerprint::from_sha256([0xAA; 32])],
    );

    let request = ResourceRequest::new(&upstream.url("/data")).unwrap();
    let outcome = interceptor.intercept(&request).await;
    assert!(
        !outcome.is_handled(),
        "dev mismatch defers to the default stack"
    );
}

// ============================================================================
// Unconfigured host (documented policy: fail closed in Prod)
// ============================================================================

#[tokio::test]
async fn test_unconfigured_host_blocks_in_prod() {
    let upstream = TestUpstream::spawn().await;
    let interceptor = interceptor_without_pins(&upstream, BuildMode::Prod);

    let request = ResourceRequest::new(&upstream.url("/anything")).unwrap();
    let InterceptOutcome::Response(response) = interceptor.intercept(&request).await else {
        panic!("unconfigured host fails closed in prod");
    };

    assert_eq!(&body_bytes(response).await[..], BLOCKED_PAGE_HTML.as_bytes());
}

#[tokio::test]
async fn test_unconfigured_host_passes_through_in_dev() {
    let upstream = TestUpstream::spawn().await;
    let interceptor = interceptor_without_pins(&upstream, BuildMode::Dev);

    let request = ResourceRequest::new(&upstream.url("/anything")).unwrap();
    assert!(!interceptor.intercept(&request).await.is_handled());
}

#[tokio::test]
async fn test_blocked_page_is_byte_identical_across_hosts_and_urls() {
    let upstream = TestUpstream::spawn().await;

    // Mismatch on a pinned host and an unconfigured host produce the same
    // bytes; nothing about the request distinguishes them.
    let mismatch = interceptor_with_pins(
        &upstream,
        BuildMode::Prod,
        vec![Fingerprint::from_sha256([0xAA; 32])],
    );
    let unconfigured = interceptor_without_pins(&upstream, BuildMode::Prod);

    let first = mismatch
        .intercept(&ResourceRequest::new(&upstream.url("/a/path")).unwrap())
        .await;
    let second = unconfigured
        .intercept(&ResourceRequest::new(&upstream.url("/different?query=1")).unwrap())
        .await;

    let (InterceptOutcome::Response(a), InterceptOutcome::Response(b)) = (first, second) else {
        panic!("both must block in prod");
    };
    assert_eq!(
        &body_bytes(a).await[..],
        &body_bytes(b).await[..],
        "blocked pages must not differ per host or URL"
    );
}

// ============================================================================
// Handshake failure (untrusted root)
// ============================================================================

#[tokio::test]
async fn test_untrusted_root_blocks_in_prod() {
    let upstream = TestUpstream::spawn().await;

    // Default roots (Mozilla bundle) do not include the test CA, so the
    // handshake itself fails before any pin comparison.
    let config = PinConfig::new(BuildMode::Prod).with_host(
        "localhost",
        vec![upstream.leaf_fingerprint().to_string()],
    );
    let interceptor = PinInterceptor::from_config(&config).unwrap();

    let request = ResourceRequest::new(&upstream.url("/data")).unwrap();
    let InterceptOutcome::Response(response) = interceptor.intercept(&request).await else {
        panic!("prod handshake failure must block");
    };
    assert_eq!(&body_bytes(response).await[..], BLOCKED_PAGE_HTML.as_bytes());
}

#[tokio::test]
async fn test_untrusted_root_passes_through_in_dev() {
    let upstream = TestUpstream::spawn().await;

    let config = PinConfig::new(BuildMode::Dev).with_host(
        "localhost",
        vec![upstream.leaf_fingerprint().to_string()],
    );
    let interceptor = PinInterceptor::from_config(&config).unwrap();

    let request = ResourceRequest::new(&upstream.url("/data")).unwrap();
    assert!(!interceptor.intercept(&request).await.is_handled());
}

// ============================================================================
// Eligibility and recursion guard
// ============================================================================

#[tokio::test]
async fn test_non_https_request_touches_nothing() {
    let upstream = TestUpstream::spawn().await;
    let interceptor =
        interceptor_with_pins(&upstream, BuildMode::Prod, vec![upstream.leaf_fingerprint()]);

    let request =
        ResourceRequest::new(&format!("http://localhost:{}/data", upstream.port)).unwrap();
    let outcome = interceptor.intercept(&request).await;

    assert!(!outcome.is_handled());
    assert_eq!(upstream.handshakes(), 0, "no validation side effects");
}

#[tokio::test]
async fn test_marked_request_is_never_reintercepted() {
    let upstream = TestUpstream::spawn().await;
    let interceptor =
        interceptor_with_pins(&upstream, BuildMode::Prod, vec![upstream.leaf_fingerprint()]);

    let mut request = ResourceRequest::new(&upstream.url("/data")).unwrap();
    request.mark_handled();

    let outcome = interceptor.intercept(&request).await;
    assert!(!outcome.is_handled());
    assert_eq!(upstream.handshakes(), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_dropping_intercept_aborts_inflight_handshake() {
    // Upstream accepts TCP but never answers the TLS handshake, so the
    // intercept future can only complete by being dropped.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = closed_tx.send(());
    });

    let config = PinConfig::new(BuildMode::Prod).with_host(
        "localhost",
        vec![Fingerprint::from_sha256([0xAA; 32]).to_string()],
    );
    let interceptor = PinInterceptor::from_config(&config).unwrap();

    let request = ResourceRequest::new(&format!("https://localhost:{port}/data")).unwrap();
    let result =
        tokio::time::timeout(Duration::from_millis(200), interceptor.intercept(&request)).await;

    // The timeout drops the future; no disposition of any kind is produced.
    assert!(result.is_err(), "stalled handshake must not yield an outcome");

    // Dropping the future closes the upstream connection.
    tokio::time::timeout(Duration::from_secs(2), closed_rx)
        .await
        .expect("upstream must observe the connection closing")
        .unwrap();
}

// ============================================================================
// Construction from configuration
// ============================================================================

#[tokio::test]
async fn test_corrupt_config_prevents_construction() {
    let config =
        PinConfig::new(BuildMode::Prod).with_host("localhost", vec!["sha256:bogus".to_string()]);
    assert!(PinInterceptor::from_config(&config).is_err());
}

#[test]
fn test_policy_engine_mode_is_fixed_at_construction() {
    let engine = PolicyEngine::new(BuildMode::Prod);
    assert_eq!(engine.build_mode(), BuildMode::Prod);
}
