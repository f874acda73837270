//! TLS termination with a per-connection peer verdict.
//!
//! The server asks every client for a certificate but does not require one,
//! and a certificate that fails chain verification does not abort the
//! handshake. Instead the verdict is recorded on the connection as a
//! [`ConnectionPeer`] request extension, and the [`TrustGate`] decides per
//! request. Proof of possession (the handshake signature) is still enforced.
//!
//! [`TrustGate`]: super::TrustGate

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::Extension;
use axum::middleware::AddExtension;
use axum_server::accept::{Accept, DefaultAcceptor};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower::Layer;
use tracing::debug;

use super::trust_gate::ConnectionPeer;
use crate::config::PkiConfig;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Server config
// ─────────────────────────────────────────────────────────────────────────────

/// TLS server configuration plus the strict verifier used for verdicts.
#[derive(Clone)]
pub struct TlsSetup {
    /// rustls server configuration.
    pub server_config: Arc<ServerConfig>,
    /// Verifier that fails for certificates not chaining to the root.
    pub verifier: Arc<dyn ClientCertVerifier>,
}

impl fmt::Debug for TlsSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSetup")
            .field("alpn", &self.server_config.alpn_protocols.len())
            .finish_non_exhaustive()
    }
}

/// Build the TLS setup from the persisted server and root material.
///
/// # Errors
///
/// Returns `Error::Config` if any file cannot be read or parsed, or if the
/// server certificate does not match its key.
pub fn build_tls_config(config: &PkiConfig) -> Result<TlsSetup> {
    let dir = &config.storage_dir;
    let server_certs = load_certs(&dir.join(&config.server_cert_file))?;
    let server_key = load_private_key(&dir.join(&config.server_key_file))?;
    let ca_certs = load_certs(&dir.join(&config.ca_cert_file))?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("Failed to add root to trust store: {e}")))?;
    }

    let provider = provider();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS protocol versions: {e}")))?
        .with_client_cert_verifier(Arc::new(ReportingClientVerifier {
            inner: Arc::clone(&verifier),
        }))
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(storage_dir = %dir.display(), "TLS config built");

    Ok(TlsSetup {
        server_config: Arc::new(tls_cfg),
        verifier,
    })
}

/// The crypto provider for every rustls object in the crate.
#[must_use]
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| Error::Config(format!("Failed to read certs from '{}': {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read private key from '{}': {e}",
            path.display()
        ))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Client verifier
// ─────────────────────────────────────────────────────────────────────────────

/// Requests a client certificate and never fails the handshake on chain
/// errors; handshake signatures are checked by the inner verifier.
#[derive(Debug)]
struct ReportingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
}

impl ClientCertVerifier for ReportingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        if let Err(e) = self.inner.verify_client_cert(end_entity, intermediates, now) {
            debug!(error = %e, "Client certificate does not verify; continuing unauthenticated");
        }
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Verdict for the certificates a client presented.
#[must_use]
pub fn peer_verdict(
    verifier: &dyn ClientCertVerifier,
    presented: Option<&[CertificateDer<'static>]>,
) -> ConnectionPeer {
    match presented {
        Some([leaf, intermediates @ ..]) => {
            let verified = verifier
                .verify_client_cert(leaf, intermediates, UnixTime::now())
                .is_ok();
            ConnectionPeer::presented(leaf.clone(), verified)
        }
        _ => ConnectionPeer::anonymous(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Acceptor
// ─────────────────────────────────────────────────────────────────────────────

/// `axum-server` acceptor: rustls handshake, then a [`ConnectionPeer`]
/// extension on every request of the connection.
#[derive(Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor<DefaultAcceptor>,
    verifier: Arc<dyn ClientCertVerifier>,
}

impl fmt::Debug for PeerCertAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCertAcceptor").finish_non_exhaustive()
    }
}

impl PeerCertAcceptor {
    /// Acceptor for a built [`TlsSetup`].
    #[must_use]
    pub fn new(setup: &TlsSetup) -> Self {
        let config = RustlsConfig::from_config(Arc::clone(&setup.server_config));
        Self {
            inner: RustlsAcceptor::new(config),
            verifier: Arc::clone(&setup.verifier),
        }
    }
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, ConnectionPeer>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        let verifier = Arc::clone(&self.verifier);

        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let peer = peer_verdict(verifier.as_ref(), stream.get_ref().1.peer_certificates());
            Ok((stream, Extension(peer).layer(service)))
        })
    }
}
