//! Issuance orchestration.
//!
//! Ties [`KeyStore`], [`CertificateAuthority`] and [`CsrValidator`] together
//! into the two issuance paths: server certificates for the local server key,
//! and client certificates for the key in a verified CSR.

use tracing::{info, warn};

use super::authority::{CertificateAuthority, IssuedCertificate, LeafExtensions, TrustedRoot};
use super::csr::CsrValidator;
use super::key_store::KeyStore;
use super::ledger::{CertificateKind, IssuanceLedger, IssuanceRecord};
use crate::config::PkiConfig;
use crate::mtls::chain;
use crate::{Error, Result};

/// Issues server and client certificates from one root.
#[derive(Debug)]
pub struct CertificateIssuer {
    store: KeyStore,
    authority: CertificateAuthority,
    config: PkiConfig,
    server_extensions: LeafExtensions,
    ledger: IssuanceLedger,
}

impl CertificateIssuer {
    /// Ensure root and server material exist, then return a ready issuer.
    ///
    /// Holds the bootstrap lock for the whole check-then-create sequence, so
    /// concurrent processes sharing a storage directory create each file once.
    ///
    /// # Errors
    ///
    /// [`Error::KeyMaterialCorrupt`] for unusable stored material; IO errors
    /// if the storage directory is not writable.
    pub fn bootstrap(config: &PkiConfig) -> Result<Self> {
        let store = KeyStore::new(&config.storage_dir)?;
        let _lock = store.lock_bootstrap()?;

        let authority = CertificateAuthority::ensure_root(&store, config)?;
        let ledger = config
            .ledger_file
            .as_ref()
            .map_or_else(IssuanceLedger::disabled, |file| {
                IssuanceLedger::at(config.storage_dir.join(file))
            });

        let issuer = Self {
            server_extensions: LeafExtensions::server(
                &config.server_dns_names,
                &config.server_ip_addresses,
            )?,
            store,
            authority,
            config: config.clone(),
            ledger,
        };
        issuer.ensure_server_certificate()?;
        Ok(issuer)
    }

    /// Create and persist the server certificate unless one is stored.
    ///
    /// Returns `true` when a certificate was written.
    pub fn ensure_server_certificate(&self) -> Result<bool> {
        let file = &self.config.server_cert_file;
        if let Some(pem) = self.store.read_pem(file)? {
            if !self.store.exists(&self.config.server_key_file) {
                return Err(Error::KeyMaterialCorrupt(format!(
                    "server certificate '{file}' exists but its key '{}' is missing",
                    self.config.server_key_file
                )));
            }
            chain::pem_to_der(&pem)
                .and_then(|der| chain::verify_leaf(self.authority.root().der(), &der))
                .map_err(|e| {
                    Error::KeyMaterialCorrupt(format!(
                        "server certificate '{file}' does not verify against the root: {e}"
                    ))
                })?;
            info!(file = %file, "Server certificate present, skipping creation");
            return Ok(false);
        }

        let cert = self.issue_server_certificate()?;
        self.store.write_pem(file, &cert.pem)?;
        info!(file = %file, serial = %cert.serial, "Created server certificate");
        Ok(true)
    }

    /// Sign a fresh server certificate for the stored server key.
    ///
    /// Not persisted; [`ensure_server_certificate`](Self::ensure_server_certificate)
    /// writes the bootstrap copy.
    pub fn issue_server_certificate(&self) -> Result<IssuedCertificate> {
        let key = self
            .store
            .load_or_create_key_pair(&self.config.server_key_file)?;
        let subject = self
            .config
            .leaf_subject
            .with_common_name(&self.config.server_common_name);

        let cert = self
            .authority
            .sign_leaf(&key, &subject, &self.server_extensions)?;
        self.ledger
            .record(&IssuanceRecord::issued(CertificateKind::Server, &cert))?;
        Ok(cert)
    }

    /// Sign a client certificate for the key in `csr_pem`.
    ///
    /// Only the CN is taken from the request; the rest of the subject is the
    /// configured leaf organisation. The result is never persisted.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCsr`] or [`Error::MissingCommonName`] for a bad
    /// request, [`Error::SigningFailed`] if the root cannot sign.
    pub fn issue_client_certificate(&self, csr_pem: &str) -> Result<IssuedCertificate> {
        let csr = CsrValidator::parse_and_verify(csr_pem).inspect_err(|e| {
            warn!(error = %e, "CSR rejected");
        })?;
        let Some(cn) = csr.subject.common_name() else {
            warn!(subject = %csr.subject, "CSR rejected: no common name");
            return Err(Error::MissingCommonName);
        };
        let subject = self.config.leaf_subject.with_common_name(cn);

        let cert = self
            .authority
            .sign_leaf(&csr.public_key, &subject, &LeafExtensions::client())?;
        self.ledger
            .record(&IssuanceRecord::issued(CertificateKind::Client, &cert))?;
        Ok(cert)
    }

    /// Client path when a CSR is given, server path otherwise.
    ///
    /// A blank CSR counts as absent.
    pub fn issue(&self, csr_pem: Option<&str>) -> Result<(CertificateKind, IssuedCertificate)> {
        match csr_pem.map(str::trim).filter(|csr| !csr.is_empty()) {
            Some(csr) => Ok((CertificateKind::Client, self.issue_client_certificate(csr)?)),
            None => Ok((CertificateKind::Server, self.issue_server_certificate()?)),
        }
    }

    /// The root every issued certificate chains to.
    #[must_use]
    pub fn trusted_root(&self) -> &TrustedRoot {
        self.authority.root()
    }

    /// Backing key store.
    #[must_use]
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Configuration the issuer was bootstrapped with.
    #[must_use]
    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// Issuance ledger.
    #[must_use]
    pub fn ledger(&self) -> &IssuanceLedger {
        &self.ledger
    }
}
