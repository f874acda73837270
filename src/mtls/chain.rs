//! Explicit leaf-to-root chain verification.
//!
//! The TLS transport already verifies chains during the handshake. This is
//! the same check for callers holding a certificate outside a handshake
//! (the `verify` command, bootstrap sanity checks).

use x509_parser::certificate::X509Certificate;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;
use x509_parser::time::ASN1Time;

use crate::{Error, Result};

/// Verify `leaf_der` against `root_der` at the current time.
///
/// # Errors
///
/// [`Error::ChainVerification`] naming the first failed check.
pub fn verify_leaf(root_der: &[u8], leaf_der: &[u8]) -> Result<()> {
    verify_leaf_at(root_der, leaf_der, ASN1Time::now())
}

/// Verify `leaf_der` against `root_der` at `at`.
///
/// Checks, in order: the root is a CA, the leaf's issuer name equals the
/// root's subject name byte for byte, the leaf's signature verifies with the
/// root's key, and both certificates are within their validity windows.
pub fn verify_leaf_at(root_der: &[u8], leaf_der: &[u8], at: ASN1Time) -> Result<()> {
    let root = parse(root_der, "root")?;
    let leaf = parse(leaf_der, "leaf")?;

    let root_is_ca = root
        .basic_constraints()
        .ok()
        .flatten()
        .is_some_and(|bc| bc.value.ca);
    if !root_is_ca {
        return Err(fail("root certificate is not a CA"));
    }

    if leaf.issuer().as_raw() != root.subject().as_raw() {
        return Err(fail(format!(
            "leaf issuer '{}' is not root subject '{}'",
            leaf.issuer(),
            root.subject()
        )));
    }

    leaf.verify_signature(Some(root.public_key()))
        .map_err(|e| fail(format!("leaf signature does not verify with root key: {e}")))?;

    if !root.validity().is_valid_at(at) {
        return Err(fail("root certificate is outside its validity window"));
    }
    if !leaf.validity().is_valid_at(at) {
        return Err(fail("leaf certificate is outside its validity window"));
    }
    Ok(())
}

/// Decode the first PEM block of a certificate file.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let (_, block) =
        parse_x509_pem(pem.as_bytes()).map_err(|e| fail(format!("not a PEM certificate: {e}")))?;
    Ok(block.contents)
}

fn parse<'a>(der: &'a [u8], what: &str) -> Result<X509Certificate<'a>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| fail(format!("{what} certificate cannot be parsed: {e}")))
}

fn fail(reason: impl Into<String>) -> Error {
    Error::ChainVerification(reason.into())
}
