//! Companion client: CSR generation, submission and the protected call.
//!
//! The client trusts only the CA's root for the server connection and, for
//! the protected operation, presents a certificate the CA issued.

use std::path::Path;

use rcgen::CertificateParams;
use reqwest::{Certificate, Client, Identity};
use serde_json::{Number, Value, json};
use tracing::{debug, info};

use crate::http::CsrResponse;
use crate::pki::{KeyStore, SubjectAttributes};
use crate::{Error, Result};

/// Generate (or reuse) a key in `store` and write a CSR for `subject`.
///
/// Returns the CSR PEM. The key is RSA, the same as every key the CA makes.
///
/// # Errors
///
/// [`Error::KeyMaterialCorrupt`] if an existing key file is unusable.
pub fn generate_request(
    store: &KeyStore,
    key_file: &str,
    csr_file: &str,
    subject: &SubjectAttributes,
) -> Result<String> {
    if subject.common_name().is_none() {
        return Err(Error::MissingCommonName);
    }
    let key = store.load_or_create_key_pair(key_file)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    let csr = params
        .serialize_request(&key)
        .and_then(|csr| csr.pem())
        .map_err(|e| Error::Internal(format!("CSR serialisation failed: {e}")))?;

    store.write_pem(csr_file, &csr)?;
    info!(subject = %subject, file = %csr_file, "Wrote certificate signing request");
    Ok(csr)
}

/// HTTPS client bound to one CA server.
#[derive(Debug, Clone)]
pub struct CaClient {
    http: Client,
    base_url: String,
}

impl CaClient {
    /// Client trusting `root_pem`, optionally presenting `identity_pem`
    /// (certificate followed by its private key, both PEM).
    pub fn new(base_url: &str, root_pem: &[u8], identity_pem: Option<&[u8]>) -> Result<Self> {
        let mut builder = Client::builder().add_root_certificate(Certificate::from_pem(root_pem)?);
        if let Some(pem) = identity_pem {
            builder = builder.identity(Identity::from_pem(pem)?);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build from files: root certificate and optional client cert + key.
    pub fn from_files(
        base_url: &str,
        root: &Path,
        identity: Option<(&Path, &Path)>,
    ) -> Result<Self> {
        let root_pem = std::fs::read(root)?;
        let identity_pem = identity
            .map(|(cert, key)| -> Result<Vec<u8>> {
                let mut pem = std::fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
                Ok(pem)
            })
            .transpose()?;
        Self::new(base_url, &root_pem, identity_pem.as_deref())
    }

    /// `POST /csr`. Without a CSR the server issues a server-type certificate.
    ///
    /// Returns the issued certificate PEM.
    pub async fn submit_csr(&self, csr_pem: Option<&str>) -> Result<String> {
        let url = format!("{}/csr", self.base_url);
        let body = match csr_pem {
            Some(csr) => json!({"csr": csr}),
            None => json!({}),
        };
        debug!(url = %url, with_csr = csr_pem.is_some(), "Submitting issuance request");

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let issued: CsrResponse = response.json().await?;
        Ok(issued.client_cert)
    }

    /// `POST /test` with `operand`; returns the `result` field.
    pub async fn call_double(&self, operand: Number) -> Result<Value> {
        let url = format!("{}/test", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({"operand": operand}))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let mut body: Value = response.json().await?;
        body.get_mut("result")
            .map(Value::take)
            .ok_or_else(|| Error::Internal("response has no 'result'".to_string()))
    }
}
