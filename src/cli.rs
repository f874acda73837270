//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Minimal certificate authority with a mutual-TLS protected service
#[derive(Parser, Debug)]
#[command(name = "mtls-ca")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_CA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MTLS_CA_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MTLS_CA_HOST")]
    pub host: Option<String>,

    /// Directory holding keys and certificates
    #[arg(long, env = "MTLS_CA_STORAGE_DIR", global = true)]
    pub storage_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MTLS_CA_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_CA_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTPS server (default)
    Serve,

    /// Create root and server material if missing, then exit
    Init,

    /// Generate a private key and a certificate signing request
    Request {
        /// Common name to request
        #[arg(long)]
        cn: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Private key file name (reused if present)
        #[arg(long, default_value = "client-key.pem")]
        key_file: String,

        /// CSR file name
        #[arg(long, default_value = "csr.pem")]
        csr_file: String,
    },

    /// Submit a CSR and save the issued certificate
    Submit {
        /// Server base URL
        #[arg(long, default_value = "https://localhost:4443")]
        url: String,

        /// CSR to submit
        #[arg(long, default_value = "csr.pem")]
        csr: PathBuf,

        /// Send no CSR and receive a server-type certificate
        #[arg(long, conflicts_with = "csr")]
        no_csr: bool,

        /// Root certificate to trust
        #[arg(long, default_value = "ca.pem")]
        ca: PathBuf,

        /// Where to write the issued certificate
        #[arg(short, long, default_value = "client-cert.pem")]
        out: PathBuf,
    },

    /// Call the protected operation with a client certificate
    Call {
        /// Server base URL
        #[arg(long, default_value = "https://localhost:4443")]
        url: String,

        /// Number to double
        #[arg(allow_negative_numbers = true)]
        operand: serde_json::Number,

        /// Root certificate to trust
        #[arg(long, default_value = "ca.pem")]
        ca: PathBuf,

        /// Client certificate
        #[arg(long, default_value = "client-cert.pem")]
        cert: PathBuf,

        /// Client private key
        #[arg(long, default_value = "client-key.pem")]
        key: PathBuf,
    },

    /// Check that a certificate chains to the root
    Verify {
        /// Certificate to check
        #[arg(required = true)]
        cert: PathBuf,

        /// Root certificate
        #[arg(long, default_value = "ca.pem")]
        ca: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["mtls-ca", "--port", "8443"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(8443));
    }

    #[test]
    fn call_parses_negative_and_fractional_operands() {
        let cli = Cli::try_parse_from(["mtls-ca", "call", "-2.5"]).unwrap();
        let Some(Command::Call { operand, .. }) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(operand.as_f64(), Some(-2.5));
    }

    #[test]
    fn submit_rejects_csr_with_no_csr() {
        let result = Cli::try_parse_from(["mtls-ca", "submit", "--csr", "a.pem", "--no-csr"]);
        assert!(result.is_err());
    }

    #[test]
    fn storage_dir_is_global() {
        let cli = Cli::try_parse_from(["mtls-ca", "init", "--storage-dir", "/tmp/ca"]).unwrap();
        assert_eq!(cli.storage_dir, Some(PathBuf::from("/tmp/ca")));
    }
}
