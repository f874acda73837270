//! Peer certificate identity extraction.
//!
//! Reads the fields the gate logs about a peer: Common Name, Organisational
//! Unit, serial, issuer, DNS SANs and expiry. Nothing here is trusted for
//! authorization; that is the transport's verdict.

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity fields of a peer certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Subject CN.
    pub common_name: Option<String>,
    /// First subject OU.
    pub organizational_unit: Option<String>,
    /// Serial number, lowercase hex.
    pub serial: String,
    /// Issuer rendered by `x509-parser` (`CN=My CA, C=US, ...`).
    pub issuer: String,
    /// DNS SAN entries.
    pub san_dns_names: Vec<String>,
    /// `notAfter`, Unix seconds.
    pub not_after: i64,
    /// Label for logs: the CN, or `<unknown>`.
    pub display_name: String,
}

impl PeerIdentity {
    /// Parse a DER certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCertificate`] if the bytes are not an X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::InvalidCertificate(format!("peer certificate: {e}")))?;

        let common_name = first_str(cert.subject().iter_common_name());
        let organizational_unit = first_str(cert.subject().iter_organizational_unit());
        let display_name = common_name.clone().unwrap_or_else(|| "<unknown>".to_string());

        Ok(Self {
            common_name,
            organizational_unit,
            serial: hex::encode(cert.raw_serial()),
            issuer: cert.issuer().to_string(),
            san_dns_names: dns_names(&cert),
            not_after: cert.validity().not_after.timestamp(),
            display_name,
        })
    }
}

fn first_str<'a, 'b: 'a>(
    mut attrs: impl Iterator<Item = &'a x509_parser::x509::AttributeTypeAndValue<'b>>,
) -> Option<String> {
    attrs
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_owned()),
            _ => None,
        })
        .collect()
}
