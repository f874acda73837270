//! Error types for the certificate authority

use std::io;

use thiserror::Error;

/// Result type alias for the certificate authority
pub type Result<T> = std::result::Result<T, Error>;

/// Certificate authority errors
#[derive(Error, Debug)]
pub enum Error {
    /// Stored key or certificate material cannot be used.
    ///
    /// Fatal to bootstrap: serving without valid root material is unsafe.
    #[error("Key material corrupt: {0}")]
    KeyMaterialCorrupt(String),

    /// Malformed CSR, or its self-signature does not verify
    #[error("Invalid CSR: {0}")]
    InvalidCsr(String),

    /// CSR subject has no common name
    #[error("CSR subject has no common name")]
    MissingCommonName,

    /// The root key could not produce a signature
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// A certificate cannot be parsed
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// A certificate does not chain to the trusted root
    #[error("Chain verification failed: {0}")]
    ChainVerification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Request rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// `true` for errors caused by the requester's input.
    ///
    /// These are reported back as a client error and leave CA state untouched.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidCsr(_) | Self::MissingCommonName)
    }

    /// `true` for errors that mean the root material can no longer be trusted.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KeyMaterialCorrupt(_) | Self::SigningFailed(_))
    }
}
