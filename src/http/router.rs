//! HTTP router and handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness |
//! | `GET` | `/csr` | Usage hint |
//! | `POST` | `/csr` | Issue a certificate (client with CSR, server without) |
//! | `POST` | `/test` | Double an operand; requires a verified client certificate |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::mtls::{ConnectionPeer, TrustGate};
use crate::pki::CertificateIssuer;

/// Message returned with every failed issuance.
pub const ISSUANCE_ERROR_MESSAGE: &str = "Error creating the client certificate";

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    /// Certificate issuer
    pub issuer: Arc<CertificateIssuer>,
    /// Authorization policy for `/test`
    pub gate: TrustGate,
    /// Cancelled when the server must stop
    pub shutdown: CancellationToken,
}

/// `POST /csr` body.
#[derive(Debug, Default, Deserialize)]
pub struct CsrRequest {
    /// PEM CSR; absent for server-type issuance.
    #[serde(default)]
    pub csr: Option<String>,
}

/// `POST /csr` success body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CsrResponse {
    /// Issued certificate, PEM.
    #[serde(rename = "clientCert")]
    pub client_cert: String,
}

/// `POST /test` body.
#[derive(Debug, Deserialize)]
pub struct TestRequest {
    /// Number to double.
    pub operand: Number,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/csr", post(csr_handler).get(csr_usage_handler))
        .route("/test", post(test_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn csr_usage_handler() -> impl IntoResponse {
    Json(json!({"csr": "use POST"}))
}

/// POST /csr handler
async fn csr_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: CsrRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CsrRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return issuance_error(StatusCode::BAD_REQUEST, &e.to_string()),
        }
    };

    let issuer = Arc::clone(&state.issuer);
    let joined =
        tokio::task::spawn_blocking(move || issuer.issue(request.csr.as_deref())).await;

    match joined {
        Ok(Ok((kind, cert))) => {
            info!(kind = kind.as_str(), serial = %cert.serial, subject = %cert.subject, "Issued certificate");
            Json(CsrResponse {
                client_cert: cert.pem,
            })
            .into_response()
        }
        Ok(Err(e)) if e.is_client_error() => {
            warn!(error = %e, "Issuance rejected");
            issuance_error(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Ok(Err(e)) => {
            if e.is_fatal() {
                error!(error = %e, "Root can no longer sign; shutting down");
                state.shutdown.cancel();
            } else {
                error!(error = %e, "Issuance failed");
            }
            issuance_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Issuance task failed");
            issuance_error(StatusCode::INTERNAL_SERVER_ERROR, "issuance task failed")
        }
    }
}

/// POST /test handler
async fn test_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectionPeer>()
        .cloned()
        .unwrap_or_default();

    if !state.gate.is_authorized(&peer) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return bad_request(&e.to_string()),
    };
    let input: TestRequest = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => return bad_request(&e.to_string()),
    };

    match double(&input.operand) {
        Some(result) => Json(json!({"result": result})).into_response(),
        None => bad_request("operand out of range"),
    }
}

/// `2 * n`, staying integral when the integer result fits.
fn double(n: &Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        if let Some(doubled) = i.checked_mul(2) {
            return Some(Value::from(doubled));
        }
    }
    let f = n.as_f64()? * 2.0;
    Number::from_f64(f).map(Value::Number)
}

fn issuance_error(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(json!({"message": ISSUANCE_ERROR_MESSAGE, "error": error})),
    )
        .into_response()
}

fn bad_request(error: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": error}))).into_response()
}
