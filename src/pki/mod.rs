//! Certificate authority core.
//!
//! ```text
//! KeyStore ──► CertificateAuthority ──► CertificateIssuer
//!                                          ▲
//!                      CsrValidator ───────┘
//! ```
//!
//! - [`key_store`] - RSA key pairs and PEM files on disk, bootstrap lock
//! - [`authority`] - self-signed root, leaf signing
//! - [`csr`] - CSR parsing and self-signature verification
//! - [`issuer`] - server and client issuance paths
//! - [`ledger`] - optional append-only issuance record
//! - [`subject`], [`validity`], [`serial`] - certificate building blocks

pub mod authority;
pub mod csr;
pub mod issuer;
pub mod key_store;
pub mod ledger;
pub mod serial;
pub mod subject;
pub mod validity;

pub use authority::{CertificateAuthority, IssuedCertificate, LeafExtensions, TrustedRoot};
pub use csr::{CsrValidator, VerifiedCsr};
pub use issuer::CertificateIssuer;
pub use key_store::{BootstrapLock, KeyStore};
pub use ledger::{CertificateKind, IssuanceLedger, IssuanceRecord};
pub use serial::SerialGenerator;
pub use subject::{AttributeName, SubjectAttribute, SubjectAttributes};
pub use validity::Validity;
