//! Append-only issuance ledger.
//!
//! Every issued certificate produces one [`IssuanceRecord`]. The record is
//! always emitted as a structured `tracing` event; when a ledger file is
//! configured it is also appended to that file as one JSON line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::authority::IssuedCertificate;
use crate::{Error, Result};

/// Which issuance path produced a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateKind {
    /// Server identity, signed for the local server key.
    Server,
    /// Client identity, signed for a CSR's key.
    Client,
}

impl CertificateKind {
    /// Lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    /// Always `certificate.issued`.
    pub event: String,
    /// Issuance path.
    pub kind: CertificateKind,
    /// Serial number, lowercase hex.
    pub serial: String,
    /// Subject rendered as `CN=.., O=..`.
    pub subject: String,
    /// `notBefore`, Unix seconds.
    pub not_before: i64,
    /// `notAfter`, Unix seconds.
    pub not_after: i64,
}

impl IssuanceRecord {
    /// Record for a freshly issued certificate.
    #[must_use]
    pub fn issued(kind: CertificateKind, cert: &IssuedCertificate) -> Self {
        Self {
            event: "certificate.issued".to_string(),
            kind,
            serial: cert.serial.clone(),
            subject: cert.subject.to_string(),
            not_before: cert.validity.not_before.unix_timestamp(),
            not_after: cert.validity.not_after.unix_timestamp(),
        }
    }
}

/// Issuance ledger; file-backed when a path is configured.
#[derive(Debug, Default)]
pub struct IssuanceLedger {
    path: Option<PathBuf>,
    // Serialises appends from concurrent issuances.
    write_lock: Mutex<()>,
}

impl IssuanceLedger {
    /// Ledger that only emits tracing events.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Ledger appending to `path`.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// Ledger file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Emit and (if file-backed) append one record.
    pub fn record(&self, record: &IssuanceRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        tracing::info!(
            ledger = %json,
            kind = record.kind.as_str(),
            serial = %record.serial,
            subject = %record.subject,
            "Certificate issued"
        );

        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    /// Read every record back, in append order.
    pub fn read_all(&self) -> Result<Vec<IssuanceRecord>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}
