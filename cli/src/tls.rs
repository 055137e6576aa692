use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Certificate and key locations for the HTTPS listener.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsPaths {
    /// `cert.pem` and `key.pem` inside `dir`, unless overridden.
    pub fn resolve(dir: &Path, cert: Option<PathBuf>, key: Option<PathBuf>) -> Self {
        Self {
            cert_path: cert.unwrap_or_else(|| dir.join("cert.pem")),
            key_path: key.unwrap_or_else(|| dir.join("key.pem")),
        }
    }
}

/// Generate a self-signed certificate for `localhost` plus any extra host
/// names, writing PEM files to `paths`. Returns the SHA-256 fingerprint.
pub fn generate_self_signed_cert(paths: &TlsPaths, extra_hosts: &[String]) -> Result<String> {
    let mut names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    for host in extra_hosts {
        if !names.contains(host) {
            names.push(host.clone());
        }
    }

    // IP literals in `names` become IP SANs
    let mut params =
        rcgen::CertificateParams::new(names).context("failed to create certificate params")?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "grocer self-signed");
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, "grocer");

    let key_pair = rcgen::KeyPair::generate().context("failed to generate key pair")?;
    let cert = params
        .self_signed(&key_pair)
        .context("failed to generate self-signed certificate")?;

    std::fs::write(&paths.cert_path, cert.pem()).with_context(|| {
        format!(
            "Failed to write certificate to {}",
            paths.cert_path.display()
        )
    })?;
    std::fs::write(&paths.key_path, key_pair.serialize_pem()).with_context(|| {
        format!("Failed to write private key to {}", paths.key_path.display())
    })?;

    Ok(sha256_fingerprint(cert.der()))
}

fn sha256_fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Fingerprint of the first certificate in a PEM file.
pub fn fingerprint_from_pem_file(cert_path: &Path) -> Result<String> {
    let pem_data = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate from {}", cert_path.display()))?;

    let mut reader = std::io::BufReader::new(pem_data.as_slice());
    let certs: Vec<_> =
        rustls_pemfile::certs(&mut reader).collect::<std::result::Result<_, _>>()?;
    let cert = certs.first().context("No certificate found in PEM file")?;

    Ok(sha256_fingerprint(cert.as_ref()))
}

/// Reuse an existing certificate pair or generate one.
pub fn ensure_cert(paths: &TlsPaths, extra_hosts: &[String]) -> Result<String> {
    if paths.cert_path.exists() && paths.key_path.exists() {
        fingerprint_from_pem_file(&paths.cert_path)
    } else {
        tracing::info!(
            path = %paths.cert_path.display(),
            "generating self-signed TLS certificate"
        );
        generate_self_signed_cert(paths, extra_hosts)
    }
}
