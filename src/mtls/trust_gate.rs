//! Per-request authorization from the transport's peer verdict.
//!
//! The gate does no cryptography. A request is authorized exactly when the
//! TLS layer reported a presented client certificate as verified against
//! the root; the certificate's identity fields are only read for logging.
//!
//! ```text
//! Unauthenticated ──verified──► Authenticated   (terminal)
//!        │
//!        └──absent / unverified──► Denied        (terminal)
//! ```

use std::fmt;

use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use super::identity::PeerIdentity;

/// What the transport reported about one connection's client certificate.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPeer {
    /// End-entity certificate the client presented, if any.
    pub certificate: Option<CertificateDer<'static>>,
    /// `true` when the transport verified `certificate` against the root.
    pub verified: bool,
}

impl ConnectionPeer {
    /// No certificate presented.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A presented certificate with the transport's verdict.
    #[must_use]
    pub fn presented(certificate: CertificateDer<'static>, verified: bool) -> Self {
        Self {
            certificate: Some(certificate),
            verified,
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The client sent no certificate.
    NoCertificate,
    /// The client sent a certificate the transport did not verify.
    Unverified,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCertificate => f.write_str("no client certificate"),
            Self::Unverified => f.write_str("client certificate not verified"),
        }
    }
}

/// Terminal state of the per-request gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Verified peer; identity for auditing.
    Authenticated(PeerIdentity),
    /// Denied; identity of a presented but unverified certificate, if readable.
    Denied {
        /// Why.
        reason: DenyReason,
        /// Presented identity.
        identity: Option<PeerIdentity>,
    },
}

impl GateVerdict {
    /// `true` only for [`GateVerdict::Authenticated`].
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Identity read from the presented certificate.
    #[must_use]
    pub fn identity(&self) -> Option<&PeerIdentity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Denied { identity, .. } => identity.as_ref(),
        }
    }
}

/// Authorization policy for privileged operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustGate;

impl TrustGate {
    /// Decide for one request.
    #[must_use]
    pub fn evaluate(&self, peer: &ConnectionPeer) -> GateVerdict {
        let Some(cert) = &peer.certificate else {
            warn!(reason = %DenyReason::NoCertificate, "Request denied");
            return GateVerdict::Denied {
                reason: DenyReason::NoCertificate,
                identity: None,
            };
        };

        let identity = PeerIdentity::from_der(cert)
            .inspect_err(|e| debug!(error = %e, "Peer certificate identity unreadable"))
            .ok();

        if !peer.verified {
            warn!(
                reason = %DenyReason::Unverified,
                peer = identity.as_ref().map_or("<unknown>", |id| id.display_name.as_str()),
                "Request denied"
            );
            return GateVerdict::Denied {
                reason: DenyReason::Unverified,
                identity,
            };
        }

        let identity = identity.unwrap_or_else(|| PeerIdentity {
            display_name: "<unknown>".to_string(),
            ..PeerIdentity::default()
        });
        debug!(peer = %identity.display_name, serial = %identity.serial, "Request authorized");
        GateVerdict::Authenticated(identity)
    }

    /// `true` when the request may proceed.
    #[must_use]
    pub fn is_authorized(&self, peer: &ConnectionPeer) -> bool {
        self.evaluate(peer).is_authorized()
    }
}
