//! mtls-ca Library
//!
//! A minimal certificate authority and a mutual-TLS gate in front of a
//! privileged operation.
//!
//! # Features
//!
//! - **Root CA**: one self-signed RSA root per deployment, created on first boot
//! - **Issuance**: server certificates for the local key, client certificates from
//!   CSRs whose self-signature verifies
//! - **mTLS gate**: rustls verifies presented client certificates; the gate
//!   authorizes per request from that verdict
//! - **Companion client**: CSR generation, submission and the protected call

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mtls;
pub mod pki;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Tracing already initialised: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Tracing already initialised: {e}")))?,
    }

    Ok(())
}
