//! Configuration management

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::pki::{AttributeName, SubjectAttribute, SubjectAttributes};
use crate::{Error, Result};

/// Prefix of environment variables merged over the config file.
pub const ENV_PREFIX: &str = "MTLS_CA_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Key material and issuance configuration
    pub pki: PkiConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // MTLS_CA_SERVER__PORT=8443 -> server.port
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a working deployment.
    pub fn validate(&self) -> Result<()> {
        let pki = &self.pki;
        let files = [
            &pki.ca_key_file,
            &pki.ca_cert_file,
            &pki.server_key_file,
            &pki.server_cert_file,
        ];
        for (i, file) in files.iter().enumerate() {
            if file.is_empty() || file.contains(['/', '\\']) {
                return Err(Error::Config(format!(
                    "PKI file names must be plain file names, got '{file}'"
                )));
            }
            if files[..i].contains(file) {
                return Err(Error::Config(format!("PKI file '{file}' is used twice")));
            }
        }
        if pki.authority_subject.common_name().is_none() {
            return Err(Error::Config(
                "pki.authority_subject needs a common_name".to_string(),
            ));
        }
        if pki.server_common_name.is_empty() {
            return Err(Error::Config("pki.server_common_name is empty".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4443,
        }
    }
}

/// Key material and issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// Directory holding keys and certificates
    pub storage_dir: PathBuf,
    /// Root private key file
    pub ca_key_file: String,
    /// Root certificate file
    pub ca_cert_file: String,
    /// Server private key file
    pub server_key_file: String,
    /// Server certificate file
    pub server_cert_file: String,
    /// Append-only issuance ledger (JSON lines); disabled when unset.
    /// Relative paths resolve under `storage_dir`.
    pub ledger_file: Option<PathBuf>,
    /// Subject (and issuer) of the root certificate
    pub authority_subject: SubjectAttributes,
    /// Attributes following the CN in every leaf subject
    pub leaf_subject: SubjectAttributes,
    /// CN of the server certificate
    pub server_common_name: String,
    /// DNS SANs of the server certificate
    pub server_dns_names: Vec<String>,
    /// IP SANs of the server certificate
    pub server_ip_addresses: Vec<IpAddr>,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("."),
            ca_key_file: "ca-key.pem".to_string(),
            ca_cert_file: "ca.pem".to_string(),
            server_key_file: "server-key.pem".to_string(),
            server_cert_file: "server-cert.pem".to_string(),
            ledger_file: None,
            authority_subject: organisation("MyCA").with_common_name("My CA"),
            leaf_subject: organisation("MyApp"),
            server_common_name: "localhost".to_string(),
            server_dns_names: vec!["localhost".to_string()],
            server_ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        }
    }
}

fn organisation(unit: &str) -> SubjectAttributes {
    SubjectAttributes::new(vec![
        SubjectAttribute::new(AttributeName::Country, "US"),
        SubjectAttribute::new(AttributeName::State, "Some-State"),
        SubjectAttribute::new(AttributeName::Locality, "MyCity"),
        SubjectAttribute::new(AttributeName::Organization, "MyCompany"),
        SubjectAttribute::new(AttributeName::OrganizationalUnit, unit),
    ])
}
