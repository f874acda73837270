//! HTTP surface tests through the router, without a socket.
//!
//! The transport's verdict is injected as a [`ConnectionPeer`] request
//! extension, the same way the TLS acceptor does it.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use mtls_ca::config::PkiConfig;
use mtls_ca::http::{AppState, ISSUANCE_ERROR_MESSAGE, create_router};
use mtls_ca::mtls::{ConnectionPeer, TrustGate, chain};
use mtls_ca::pki::CertificateIssuer;
use pretty_assertions::assert_eq;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    _dir: tempfile::TempDir,
    issuer: Arc<CertificateIssuer>,
    shutdown: CancellationToken,
    router: Router,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let issuer = Arc::new(
        CertificateIssuer::bootstrap(&PkiConfig {
            storage_dir: dir.path().to_path_buf(),
            ..PkiConfig::default()
        })
        .unwrap(),
    );
    let shutdown = CancellationToken::new();
    let router = create_router(Arc::new(AppState {
        issuer: Arc::clone(&issuer),
        gate: TrustGate,
        shutdown: shutdown.clone(),
    }));
    TestApp {
        _dir: dir,
        issuer,
        shutdown,
        router,
    }
}

fn csr(cn: Option<&str>) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::OrganizationName, "Requester");
    if let Some(cn) = cn {
        params.distinguished_name.push(DnType::CommonName, cn);
    }
    params.serialize_request(&key).unwrap().pem().unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_test(operand: &Value, peer: Option<ConnectionPeer>) -> Request<Body> {
    let mut request = post_json("/test", &json!({"operand": operand}));
    if let Some(peer) = peer {
        request.extensions_mut().insert(peer);
    }
    request
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Verdict for a certificate our CA issued, as the acceptor would report it.
fn verified_peer(issuer: &CertificateIssuer, cn: &str) -> ConnectionPeer {
    let cert = issuer.issue_client_certificate(&csr(Some(cn))).unwrap();
    ConnectionPeer::presented(cert.der, true)
}

// ============================================================================
// Health and usage
// ============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let request = Request::get("/health").body(Body::empty()).unwrap();

    let (status, body) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn get_csr_explains_usage() {
    let app = app();
    let request = Request::get("/csr").body(Body::empty()).unwrap();

    let (status, body) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"csr": "use POST"}));
}

// ============================================================================
// POST /csr
// ============================================================================

#[tokio::test]
async fn valid_csr_returns_client_certificate() {
    // GIVEN: a CSR for "alice"
    let app = app();

    // WHEN: posting it
    let (status, body) =
        send_json(&app.router, post_json("/csr", &json!({"csr": csr(Some("alice"))}))).await;

    // THEN: a PEM certificate that chains to the root
    assert_eq!(status, StatusCode::OK);
    let pem = body["clientCert"].as_str().unwrap();
    assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    let der = chain::pem_to_der(pem).unwrap();
    chain::verify_leaf(app.issuer.trusted_root().der(), &der).unwrap();
}

#[tokio::test]
async fn empty_body_returns_server_certificate() {
    let app = app();
    let request = Request::post("/csr").body(Body::empty()).unwrap();

    let (status, body) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    let der = chain::pem_to_der(body["clientCert"].as_str().unwrap()).unwrap();
    let identity = mtls_ca::mtls::PeerIdentity::from_der(&der).unwrap();
    assert_eq!(identity.common_name.as_deref(), Some("localhost"));
}

#[tokio::test]
async fn csr_without_common_name_is_bad_request() {
    let app = app();

    let (status, body) =
        send_json(&app.router, post_json("/csr", &json!({"csr": csr(None)}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], ISSUANCE_ERROR_MESSAGE);
    assert!(body["error"].as_str().unwrap().contains("common name"));
    assert!(!app.shutdown.is_cancelled());
}

#[tokio::test]
async fn garbage_csr_is_bad_request() {
    let app = app();

    let (status, body) =
        send_json(&app.router, post_json("/csr", &json!({"csr": "not a csr"}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], ISSUANCE_ERROR_MESSAGE);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid CSR"));
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = app();
    let request = Request::post("/csr")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"csr\":"))
        .unwrap();

    let (status, body) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], ISSUANCE_ERROR_MESSAGE);
}

// ============================================================================
// POST /test
// ============================================================================

#[tokio::test]
async fn verified_peer_gets_doubled_operand() {
    // GIVEN: a request arriving on a connection with a verified certificate
    let app = app();
    let peer = verified_peer(&app.issuer, "alice");

    // WHEN
    let (status, body) = send_json(&app.router, post_test(&json!(21), Some(peer))).await;

    // THEN
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": 42}));
}

#[tokio::test]
async fn fractional_operand_is_doubled() {
    let app = app();
    let peer = verified_peer(&app.issuer, "alice");

    let (status, body) = send_json(&app.router, post_test(&json!(1.25), Some(peer))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": 2.5}));
}

#[tokio::test]
async fn anonymous_peer_is_unauthorized() {
    let app = app();

    for peer in [None, Some(ConnectionPeer::anonymous())] {
        let (status, body) = send(&app.router, post_test(&json!(21), peer)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, b"Unauthorized");
    }
}

#[tokio::test]
async fn unverified_certificate_is_unauthorized() {
    // GIVEN: a certificate the transport did not verify
    let app = app();
    let cert = app
        .issuer
        .issue_client_certificate(&csr(Some("alice")))
        .unwrap();
    let peer = ConnectionPeer::presented(cert.der, false);

    // WHEN
    let (status, body) = send(&app.router, post_test(&json!(21), Some(peer))).await;

    // THEN: the verdict is what counts, not the certificate contents
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, b"Unauthorized");
}

#[tokio::test]
async fn non_numeric_operand_is_bad_request() {
    let app = app();
    let peer = verified_peer(&app.issuer, "alice");

    let (status, _) = send(&app.router, post_test(&json!("21"), Some(peer))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
