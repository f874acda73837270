//! mtls-ca - minimal certificate authority with a mutual-TLS protected service

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_ca::{
    client::{CaClient, generate_request},
    cli::{Cli, Command},
    config::Config,
    http::Server,
    mtls::{PeerIdentity, chain},
    pki::{CertificateIssuer, KeyStore},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // reqwest and axum-server build rustls configs from the process default
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Init) => run_init(&config),
        Some(Command::Request {
            cn,
            out_dir,
            key_file,
            csr_file,
        }) => run_request(&config, &cn, &out_dir, &key_file, &csr_file),
        Some(Command::Submit {
            url,
            csr,
            no_csr,
            ca,
            out,
        }) => run_submit(&url, (!no_csr).then_some(csr.as_path()), &ca, &out).await,
        Some(Command::Call {
            url,
            operand,
            ca,
            cert,
            key,
        }) => run_call(&url, operand, &ca, &cert, &key).await,
        Some(Command::Verify { cert, ca }) => run_verify(&cert, &ca),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Config file + env, then CLI overrides
fn load_config(cli: &Cli) -> mtls_ca::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(ref dir) = cli.storage_dir {
        config.pki.storage_dir = dir.clone();
    }
    Ok(config)
}

/// Run the HTTPS server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        storage_dir = %config.pki.storage_dir.display(),
        "Starting mtls-ca"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Bootstrap failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Bootstrap only
fn run_init(config: &Config) -> ExitCode {
    match CertificateIssuer::bootstrap(&config.pki) {
        Ok(issuer) => {
            let store = issuer.store();
            println!("Root:   {}", issuer.trusted_root().subject());
            for file in [
                &config.pki.ca_key_file,
                &config.pki.ca_cert_file,
                &config.pki.server_key_file,
                &config.pki.server_cert_file,
            ] {
                println!("  {}", store.path(file).display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Bootstrap failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Generate a key and CSR
fn run_request(config: &Config, cn: &str, out_dir: &Path, key_file: &str, csr_file: &str) -> ExitCode {
    let subject = config.pki.leaf_subject.with_common_name(cn);
    let result = KeyStore::new(out_dir)
        .and_then(|store| generate_request(&store, key_file, csr_file, &subject));
    match result {
        Ok(_) => {
            println!("Wrote {}", out_dir.join(key_file).display());
            println!("Wrote {}", out_dir.join(csr_file).display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to create request: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Submit a CSR and persist the certificate
async fn run_submit(url: &str, csr: Option<&Path>, ca: &Path, out: &Path) -> ExitCode {
    let result = async {
        let csr_pem = csr.map(std::fs::read_to_string).transpose()?;
        let client = CaClient::from_files(url, ca, None)?;
        let cert = client.submit_csr(csr_pem.as_deref()).await?;
        std::fs::write(out, &cert)?;
        mtls_ca::Result::Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            println!("Certificate saved to {}", out.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Submission failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Call the protected operation
async fn run_call(
    url: &str,
    operand: serde_json::Number,
    ca: &Path,
    cert: &Path,
    key: &Path,
) -> ExitCode {
    let result = async {
        let client = CaClient::from_files(url, ca, Some((cert, key)))?;
        client.call_double(operand).await
    }
    .await;

    match result {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Call failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Verify a certificate against the root
fn run_verify(cert: &Path, ca: &Path) -> ExitCode {
    let result = (|| {
        let root = chain::pem_to_der(&std::fs::read_to_string(ca)?)?;
        let leaf = chain::pem_to_der(&std::fs::read_to_string(cert)?)?;
        chain::verify_leaf(&root, &leaf)?;
        PeerIdentity::from_der(&leaf)
    })();

    match result {
        Ok(identity) => {
            println!("OK: {} (serial {})", identity.display_name, identity.serial);
            println!("   issuer: {}", identity.issuer);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("FAILED: {e}");
            ExitCode::FAILURE
        }
    }
}
