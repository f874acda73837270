//! The root certificate authority.
//!
//! Owns the root key pair and the self-signed root certificate, and signs
//! every leaf. The root is the only certificate whose issuer is itself.

use std::fmt;
use std::net::IpAddr;

use rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, PublicKeyData, SanType, SerialNumber, string::Ia5String,
};
use rustls::pki_types::CertificateDer;
use tracing::info;
use x509_parser::pem::parse_x509_pem;

use super::key_store::KeyStore;
use super::serial::SerialGenerator;
use super::subject::SubjectAttributes;
use super::validity::Validity;
use crate::config::PkiConfig;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Trusted root
// ─────────────────────────────────────────────────────────────────────────────

/// The self-signed root of trust. One per deployment.
#[derive(Debug, Clone)]
pub struct TrustedRoot {
    pem: String,
    der: CertificateDer<'static>,
    subject: SubjectAttributes,
}

impl TrustedRoot {
    /// Parse a stored root certificate and check it belongs to `key`.
    fn load(pem: String, key: &KeyPair) -> Result<Self> {
        let (_, block) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| Error::KeyMaterialCorrupt(format!("root certificate is not PEM: {e}")))?;
        let cert = block.parse_x509().map_err(|e| {
            Error::KeyMaterialCorrupt(format!("root certificate is not X.509: {e}"))
        })?;

        if cert.public_key().raw != key.subject_public_key_info().as_slice() {
            return Err(Error::KeyMaterialCorrupt(
                "root certificate does not match the root private key".to_string(),
            ));
        }
        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|bc| bc.value.ca);
        if !is_ca {
            return Err(Error::KeyMaterialCorrupt(
                "root certificate is not marked as a CA".to_string(),
            ));
        }

        let subject = SubjectAttributes::from_x509_name(cert.subject())
            .map_err(|e| Error::KeyMaterialCorrupt(format!("root subject: {e}")))?;
        let der = CertificateDer::from(block.contents.clone());
        Ok(Self { pem, der, subject })
    }

    /// PEM encoding, as distributed to peers.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// DER encoding.
    #[must_use]
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// Subject (and issuer) attributes of the root.
    #[must_use]
    pub fn subject(&self) -> &SubjectAttributes {
        &self.subject
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issued certificates and leaf extensions
// ─────────────────────────────────────────────────────────────────────────────

/// A signed certificate, immutable once produced.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM encoding.
    pub pem: String,
    /// DER encoding.
    pub der: CertificateDer<'static>,
    /// Serial number, lowercase hex.
    pub serial: String,
    /// Subject attributes.
    pub subject: SubjectAttributes,
    /// Validity window.
    pub validity: Validity,
}

/// Extensions attached to a leaf certificate.
#[derive(Debug, Clone, Default)]
pub struct LeafExtensions {
    /// `keyUsage` bits.
    pub key_usages: Vec<KeyUsagePurpose>,
    /// `extKeyUsage` purposes.
    pub extended_key_usages: Vec<ExtendedKeyUsagePurpose>,
    /// `subjectAltName` entries.
    pub subject_alt_names: Vec<SanType>,
}

impl LeafExtensions {
    /// Server identity: TLS server auth plus the names it answers on.
    pub fn server(dns_names: &[String], ip_addresses: &[IpAddr]) -> Result<Self> {
        let mut sans = Vec::with_capacity(dns_names.len() + ip_addresses.len());
        for dns in dns_names {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Config(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        sans.extend(ip_addresses.iter().copied().map(SanType::IpAddress));

        Ok(Self {
            key_usages: vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
                KeyUsagePurpose::DataEncipherment,
            ],
            extended_key_usages: vec![ExtendedKeyUsagePurpose::ServerAuth],
            subject_alt_names: sans,
        })
    }

    /// Client identity. Never carries server auth.
    #[must_use]
    pub fn client() -> Self {
        Self {
            key_usages: vec![KeyUsagePurpose::DigitalSignature],
            extended_key_usages: vec![ExtendedKeyUsagePurpose::ClientAuth],
            subject_alt_names: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate authority
// ─────────────────────────────────────────────────────────────────────────────

/// Root CA: the root certificate plus the key that signs leaves.
pub struct CertificateAuthority {
    root: TrustedRoot,
    issuer: Issuer<'static, KeyPair>,
    serials: SerialGenerator,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("root", &self.root.subject.to_string())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load the root key and certificate, creating whichever is missing.
    ///
    /// Idempotent: with both files present nothing is written.
    ///
    /// # Errors
    ///
    /// [`Error::KeyMaterialCorrupt`] if the stored key or certificate is
    /// unusable, or if a root certificate exists without its key.
    pub fn ensure_root(store: &KeyStore, config: &PkiConfig) -> Result<Self> {
        if store.exists(&config.ca_cert_file) && !store.exists(&config.ca_key_file) {
            return Err(Error::KeyMaterialCorrupt(format!(
                "root certificate '{}' exists but its key '{}' is missing",
                config.ca_cert_file, config.ca_key_file
            )));
        }

        let key = store.load_or_create_key_pair(&config.ca_key_file)?;
        let serials = SerialGenerator::new();

        let root = if let Some(pem) = store.read_pem(&config.ca_cert_file)? {
            let root = TrustedRoot::load(pem, &key)?;
            info!(subject = %root.subject, "Loaded root certificate");
            root
        } else {
            let pem = self_sign_root(&key, &config.authority_subject, &serials)?;
            store.write_pem(&config.ca_cert_file, &pem)?;
            let root = TrustedRoot::load(pem, &key)?;
            info!(
                subject = %root.subject,
                file = %config.ca_cert_file,
                "Created self-signed root certificate"
            );
            root
        };

        let issuer = Issuer::from_ca_cert_pem(root.pem(), key)
            .map_err(|e| Error::SigningFailed(format!("Root cannot act as issuer: {e}")))?;

        Ok(Self {
            root,
            issuer,
            serials,
        })
    }

    /// The trusted root certificate.
    #[must_use]
    pub fn root(&self) -> &TrustedRoot {
        &self.root
    }

    /// Sign a one-year leaf for `public_key` with the root as issuer.
    ///
    /// # Errors
    ///
    /// [`Error::SigningFailed`] if the root key cannot produce the signature.
    pub fn sign_leaf(
        &self,
        public_key: &impl PublicKeyData,
        subject: &SubjectAttributes,
        extensions: &LeafExtensions,
    ) -> Result<IssuedCertificate> {
        let validity = Validity::leaf()?;
        let serial = self.serials.next_bytes();

        let mut params = CertificateParams::default();
        params.distinguished_name = subject.to_distinguished_name();
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages.clone_from(&extensions.key_usages);
        params
            .extended_key_usages
            .clone_from(&extensions.extended_key_usages);
        params
            .subject_alt_names
            .clone_from(&extensions.subject_alt_names);
        params.use_authority_key_identifier_extension = true;
        params.not_before = validity.not_before;
        params.not_after = validity.not_after;
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        let cert = params
            .signed_by(public_key, &self.issuer)
            .map_err(|e| Error::SigningFailed(e.to_string()))?;

        Ok(IssuedCertificate {
            pem: cert.pem(),
            der: cert.der().clone(),
            serial: hex::encode(serial),
            subject: subject.clone(),
            validity,
        })
    }
}

/// Build and self-sign the root: subject == issuer, CA without path limit,
/// keyCertSign + cRLSign, ten-year window.
fn self_sign_root(
    key: &KeyPair,
    subject: &SubjectAttributes,
    serials: &SerialGenerator,
) -> Result<String> {
    let validity = Validity::root()?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = validity.not_before;
    params.not_after = validity.not_after;
    params.serial_number = Some(serials.next());

    let cert = params
        .self_signed(key)
        .map_err(|e| Error::SigningFailed(format!("Root self-signing failed: {e}")))?;
    Ok(cert.pem())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::subject::{AttributeName, SubjectAttribute};
    use pretty_assertions::assert_eq;
    use x509_parser::prelude::{FromDer, X509Certificate};

    fn config() -> PkiConfig {
        PkiConfig::default()
    }

    fn authority(dir: &std::path::Path) -> CertificateAuthority {
        let store = KeyStore::new(dir).unwrap();
        CertificateAuthority::ensure_root(&store, &config()).unwrap()
    }

    #[test]
    fn root_is_self_signed_ca_with_cert_and_crl_sign() {
        // GIVEN: a fresh authority
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());

        // WHEN: inspecting the root
        let (_, cert) = X509Certificate::from_der(ca.root().der()).unwrap();

        // THEN: issuer == subject, CA with no path length, correct key usage
        assert_eq!(cert.issuer().as_raw(), cert.subject().as_raw());
        let bc = cert.basic_constraints().unwrap().unwrap().value;
        assert!(bc.ca);
        assert!(bc.path_len_constraint.is_none());
        let ku = cert.key_usage().unwrap().unwrap().value;
        assert!(ku.key_cert_sign());
        assert!(ku.crl_sign());
        // Self-signature verifies with its own key
        assert!(cert.verify_signature(None).is_ok());
    }

    #[test]
    fn root_subject_matches_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        assert_eq!(ca.root().subject(), &config().authority_subject);
        assert_eq!(ca.root().subject().common_name(), Some("My CA"));
    }

    #[test]
    fn ensure_root_twice_reuses_stored_material() {
        let dir = tempfile::tempdir().unwrap();
        let first = authority(dir.path());
        let key_before = std::fs::read(dir.path().join("ca-key.pem")).unwrap();

        let second = authority(dir.path());

        assert_eq!(first.root().pem(), second.root().pem());
        assert_eq!(std::fs::read(dir.path().join("ca-key.pem")).unwrap(), key_before);
    }

    #[test]
    fn root_without_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        authority(dir.path());
        std::fs::remove_file(dir.path().join("ca-key.pem")).unwrap();

        let store = KeyStore::new(dir.path()).unwrap();
        let err = CertificateAuthority::ensure_root(&store, &config()).unwrap_err();

        assert!(matches!(err, Error::KeyMaterialCorrupt(_)), "got {err}");
        assert!(!dir.path().join("ca-key.pem").exists(), "no key may be generated");
    }

    #[test]
    fn root_for_a_different_key_is_corrupt() {
        // GIVEN: a root certificate paired with someone else's key
        let dir = tempfile::tempdir().unwrap();
        authority(dir.path());
        let other = tempfile::tempdir().unwrap();
        authority(other.path());
        std::fs::copy(other.path().join("ca-key.pem"), dir.path().join("ca-key.pem")).unwrap();

        // WHEN/THEN: bootstrap refuses the mismatched pair
        let store = KeyStore::new(dir.path()).unwrap();
        let err = CertificateAuthority::ensure_root(&store, &config()).unwrap_err();
        assert!(err.to_string().contains("does not match"), "got {err}");
    }

    #[test]
    fn leaf_issuer_equals_root_subject_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        let leaf_key = KeyPair::generate().unwrap();
        let subject = SubjectAttributes::new(vec![SubjectAttribute::new(
            AttributeName::CommonName,
            "svc",
        )]);

        let leaf = ca
            .sign_leaf(&leaf_key, &subject, &LeafExtensions::client())
            .unwrap();

        let (_, root) = X509Certificate::from_der(ca.root().der()).unwrap();
        let (_, cert) = X509Certificate::from_der(&leaf.der).unwrap();
        assert_eq!(cert.issuer().as_raw(), root.subject().as_raw());
        assert!(cert.verify_signature(Some(root.public_key())).is_ok());
    }

    #[test]
    fn leaf_serials_differ_between_issuances() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        let leaf_key = KeyPair::generate().unwrap();
        let subject = config().leaf_subject.with_common_name("svc");

        let a = ca.sign_leaf(&leaf_key, &subject, &LeafExtensions::client()).unwrap();
        let b = ca.sign_leaf(&leaf_key, &subject, &LeafExtensions::client()).unwrap();

        assert_ne!(a.serial, b.serial);
        let (_, cert) = X509Certificate::from_der(&a.der).unwrap();
        assert_eq!(hex::encode(cert.raw_serial()), a.serial);
    }

    #[test]
    fn server_extensions_reject_invalid_dns_name() {
        let result = LeafExtensions::server(&["bad name ü".to_string()], &[]);
        assert!(result.is_err());
    }

    #[test]
    fn client_extensions_never_include_server_auth() {
        let ext = LeafExtensions::client();
        assert!(!ext.extended_key_usages.contains(&ExtendedKeyUsagePurpose::ServerAuth));
    }
}
