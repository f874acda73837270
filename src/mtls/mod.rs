//! Mutual TLS: transport verdicts and the per-request trust gate.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (client cert requested, not required)
//!   → rustls WebPki verifier checks the chain against the root
//!   → ConnectionPeer {certificate, verified} injected into request extensions
//!   → TrustGate decides on privileged routes
//! ```
//!
//! # Modules
//!
//! - [`tls`] - rustls config from persisted material, `axum-server` acceptor
//! - [`trust_gate`] - authorization from the transport verdict
//! - [`identity`] - X.509 field extraction for logging (`PeerIdentity`)
//! - [`chain`] - explicit leaf-to-root verification outside a handshake

pub mod chain;
pub mod identity;
pub mod tls;
pub mod trust_gate;

pub use identity::PeerIdentity;
pub use tls::{PeerCertAcceptor, TlsSetup, build_tls_config, load_certs, load_private_key};
pub use trust_gate::{ConnectionPeer, DenyReason, GateVerdict, TrustGate};
