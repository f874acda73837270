//! Flat-file storage for key and certificate material.
//!
//! Everything lives as PEM files in one directory. Private keys are stored
//! as PKCS#8 only; the public half is re-derived on load. Presence of a file
//! is the signal that bootstrap already produced it.
//!
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so a crash never leaves a truncated key behind. The check-then-create
//! sequence of bootstrap is serialised across processes with an exclusive
//! advisory lock on [`BOOTSTRAP_LOCK_FILE`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rcgen::{KeyPair, PKCS_RSA_SHA256, PublicKeyData};
use tracing::{debug, info};
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::{Error, Result};

/// RSA modulus size for every generated key.
pub const RSA_KEY_BITS: usize = 2048;

/// Name of the lock file guarding bootstrap.
pub const BOOTSTRAP_LOCK_FILE: &str = ".bootstrap.lock";

/// Directory-backed store for PEM key and certificate files.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Open (and create if needed) the storage directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| with_path(&dir, e))?;
        Ok(Self { dir })
    }

    /// Storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a stored file.
    #[must_use]
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// `true` if the file is present.
    #[must_use]
    pub fn exists(&self, file: &str) -> bool {
        self.path(file).is_file()
    }

    /// Load the RSA key pair stored in `file`, or generate and persist one.
    ///
    /// The first call for a location writes exactly one file; later calls
    /// only read it.
    ///
    /// # Errors
    ///
    /// [`Error::KeyMaterialCorrupt`] if the stored data is not a usable RSA
    /// private key.
    pub fn load_or_create_key_pair(&self, file: &str) -> Result<KeyPair> {
        if let Some(pem) = self.read_pem(file)? {
            let key = parse_rsa_key(&pem)
                .map_err(|reason| Error::KeyMaterialCorrupt(format!("'{file}': {reason}")))?;
            debug!(file = %file, "Loaded private key");
            return Ok(key);
        }

        let key = KeyPair::generate_for(&PKCS_RSA_SHA256)
            .map_err(|e| Error::Internal(format!("RSA key generation failed: {e}")))?;
        self.write_file(file, &key.serialize_pem(), true)?;
        info!(file = %file, bits = RSA_KEY_BITS, "Generated private key");
        Ok(key)
    }

    /// Read a stored PEM file; `None` if it does not exist.
    pub fn read_pem(&self, file: &str) -> Result<Option<String>> {
        let path = self.path(file);
        match fs::read_to_string(&path) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(with_path(&path, e)),
        }
    }

    /// Persist a public PEM document (certificate).
    pub fn write_pem(&self, file: &str, pem: &str) -> Result<()> {
        self.write_file(file, pem, false)
    }

    /// Take the exclusive bootstrap lock, blocking until it is free.
    ///
    /// The lock is released when the guard is dropped.
    pub fn lock_bootstrap(&self) -> Result<BootstrapLock> {
        let path = self.path(BOOTSTRAP_LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| with_path(&path, e))?;
        file.lock().map_err(|e| with_path(&path, e))?;
        debug!(path = %path.display(), "Bootstrap lock acquired");
        Ok(BootstrapLock { file })
    }

    fn write_file(&self, file: &str, contents: &str, private: bool) -> Result<()> {
        let target = self.path(file);
        let tmp = self.dir.join(format!(".{file}.tmp"));

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(if private { 0o600 } else { 0o644 });
        }
        #[cfg(not(unix))]
        let _ = private;

        let mut out = options.open(&tmp).map_err(|e| with_path(&tmp, e))?;
        out.write_all(contents.as_bytes())
            .and_then(|()| out.sync_all())
            .map_err(|e| with_path(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| with_path(&target, e))?;
        Ok(())
    }
}

/// Exclusive advisory lock held for the duration of bootstrap.
#[derive(Debug)]
pub struct BootstrapLock {
    file: File,
}

impl Drop for BootstrapLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Parse a PKCS#8 PEM private key and require RSA of at least [`RSA_KEY_BITS`].
fn parse_rsa_key(pem: &str) -> std::result::Result<KeyPair, String> {
    let key = KeyPair::from_pem(pem).map_err(|e| format!("not a private key: {e}"))?;
    if key.algorithm() != &PKCS_RSA_SHA256 {
        return Err("not an RSA key".to_string());
    }

    let spki = key.subject_public_key_info();
    let (_, info) = SubjectPublicKeyInfo::from_der(&spki)
        .map_err(|e| format!("unreadable public key: {e}"))?;
    match info.parsed() {
        Ok(PublicKey::RSA(rsa)) if rsa.key_size() >= RSA_KEY_BITS => Ok(key),
        Ok(PublicKey::RSA(rsa)) => Err(format!("RSA modulus too small ({} bits)", rsa.key_size())),
        _ => Err("not an RSA key".to_string()),
    }
}

fn with_path(path: &Path, e: io::Error) -> Error {
    Error::Io(io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}
