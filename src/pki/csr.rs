//! Certificate signing request validation.

use std::fmt;

use rcgen::{CertificateSigningRequestParams, PublicKey};
use rustls::pki_types::CertificateSigningRequestDer;
use tracing::debug;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

use super::subject::SubjectAttributes;
use crate::{Error, Result};

/// A CSR whose self-signature has been checked.
///
/// Only [`CsrValidator`] constructs this, so holding one means the
/// requester proved possession of the private key.
pub struct VerifiedCsr {
    /// Public key embedded in the request.
    pub public_key: PublicKey,
    /// Requested subject, in encoded order.
    pub subject: SubjectAttributes,
}

impl fmt::Debug for VerifiedCsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedCsr")
            .field("subject", &self.subject.to_string())
            .finish_non_exhaustive()
    }
}

/// Stateless CSR validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrValidator;

impl CsrValidator {
    /// Parse a PEM request and verify its signature with its own key.
    ///
    /// No field of the request is read before the signature verifies.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCsr`] if the input is not a PEM-encoded PKCS#10
    /// request or the signature does not verify.
    pub fn parse_and_verify(csr_pem: &str) -> Result<VerifiedCsr> {
        let (_, block) = parse_x509_pem(csr_pem.trim().as_bytes())
            .map_err(|e| Error::InvalidCsr(format!("not PEM: {e}")))?;
        if !block.label.ends_with("CERTIFICATE REQUEST") {
            return Err(Error::InvalidCsr(format!(
                "unexpected PEM label '{}'",
                block.label
            )));
        }

        Self::verify_der(&block.contents)
    }

    /// Same as [`parse_and_verify`](Self::parse_and_verify) for a DER request.
    pub fn verify_der(der: &[u8]) -> Result<VerifiedCsr> {
        let (_, request) = X509CertificationRequest::from_der(der)
            .map_err(|e| Error::InvalidCsr(format!("not a PKCS#10 request: {e}")))?;
        request
            .verify_signature()
            .map_err(|e| Error::InvalidCsr(format!("signature verification failed: {e}")))?;

        let subject = SubjectAttributes::from_x509_name(&request.certification_request_info.subject)
            .map_err(Error::InvalidCsr)?;

        let der = CertificateSigningRequestDer::from(der.to_vec());
        let params = CertificateSigningRequestParams::from_der(&der)
            .map_err(|e| Error::InvalidCsr(format!("unsupported public key: {e}")))?;

        debug!(subject = %subject, "CSR signature verified");
        Ok(VerifiedCsr {
            public_key: params.public_key,
            subject,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::subject::AttributeName;
    use rcgen::{CertificateParams, DnType, KeyPair, PublicKeyData};

    fn csr_pem(cn: Option<&str>) -> (KeyPair, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        if let Some(cn) = cn {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Acme");
        let csr = params.serialize_request(&key).unwrap();
        (key, csr.pem().unwrap())
    }

    #[test]
    fn valid_csr_yields_key_and_subject() {
        // GIVEN: a CSR signed by its own key
        let (key, pem) = csr_pem(Some("alice"));

        // WHEN: validating it
        let verified = CsrValidator::parse_and_verify(&pem).unwrap();

        // THEN: the embedded key and subject come back
        assert_eq!(verified.public_key.der_bytes(), key.der_bytes());
        assert_eq!(verified.subject.common_name(), Some("alice"));
        assert_eq!(verified.subject.get(AttributeName::Organization), Some("Acme"));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        // GIVEN: a valid CSR with one bit of the signature flipped
        let (_, pem) = csr_pem(Some("alice"));
        let (_, block) = parse_x509_pem(pem.as_bytes()).unwrap();
        let mut der = block.contents.clone();
        let last = der.len() - 1;
        der[last] ^= 0x01;

        // WHEN: validating it
        let err = CsrValidator::verify_der(&der).unwrap_err();

        // THEN: InvalidCsr, before any subject is read
        assert!(matches!(err, Error::InvalidCsr(_)), "got {err}");
        assert!(err.to_string().contains("signature"), "got {err}");
    }

    #[test]
    fn garbage_input_is_rejected() {
        let err = CsrValidator::parse_and_verify("hello").unwrap_err();
        assert!(matches!(err, Error::InvalidCsr(_)));
    }

    #[test]
    fn certificate_pem_is_not_a_csr() {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["x".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();

        let err = CsrValidator::parse_and_verify(&cert.pem()).unwrap_err();
        assert!(err.to_string().contains("unexpected PEM label"), "got {err}");
    }

    #[test]
    fn csr_without_cn_still_verifies() {
        let (_, pem) = csr_pem(None);
        let verified = CsrValidator::parse_and_verify(&pem).unwrap();
        assert!(verified.subject.common_name().is_none());
    }
}
