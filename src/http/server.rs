//! HTTPS server lifecycle

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::mtls::{PeerCertAcceptor, TlsSetup, TrustGate, build_tls_config};
use crate::pki::CertificateIssuer;
use crate::{Error, Result};

/// In-flight requests get this long after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Certificate authority HTTPS server
pub struct Server {
    config: Config,
    issuer: Arc<CertificateIssuer>,
    tls: TlsSetup,
    shutdown: CancellationToken,
}

impl Server {
    /// Bootstrap key material and build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Fails if bootstrap fails or the persisted material cannot back TLS.
    pub fn new(config: Config) -> Result<Self> {
        let issuer = CertificateIssuer::bootstrap(&config.pki)?;
        let tls = build_tls_config(&config.pki)?;
        Ok(Self {
            config,
            issuer: Arc::new(issuer),
            tls,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the server when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until a shutdown signal or a fatal issuance error.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            issuer: Arc::clone(&self.issuer),
            gate: TrustGate,
            shutdown: self.shutdown.clone(),
        });
        let app = create_router(state);

        let handle = Handle::new();
        let drain = handle.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown).await;
            drain.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        info!("============================================================");
        info!("MTLS CA v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening (HTTPS, client certificates requested)");
        info!(root = %self.issuer.trusted_root().subject(), "Trusted root");
        info!(storage_dir = %self.config.pki.storage_dir.display(), "Key material");
        info!("  POST https://{}:{}/csr   (issuance)", self.config.server.host, self.config.server.port);
        info!("  POST https://{}:{}/test  (mTLS protected)", self.config.server.host, self.config.server.port);
        info!("============================================================");

        axum_server::bind(addr)
            .acceptor(PeerCertAcceptor::new(&self.tls))
            .handle(handle)
            .serve(app.into_make_service())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Wait for Ctrl+C, SIGTERM or cancellation; cancels `shutdown` either way.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Shutdown signal received"),
        () = terminate => info!("Shutdown signal received"),
        () = shutdown.cancelled() => warn!("Shutdown requested"),
    }

    shutdown.cancel();
}
