//! TLS material for the control plane endpoint.
//!
//! Certificates and keys are read from PEM files and assembled into a
//! `rustls` server config up front, so a bad file stops the daemon at
//! startup instead of on the first connection.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

/// A certificate chain and the private key it was issued for.
#[derive(Debug)]
pub struct TlsMaterial {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Read a certificate chain and private key from PEM files.
pub fn load(cert_file: &Path, key_file: &Path) -> anyhow::Result<TlsMaterial> {
    let mut reader = BufReader::new(
        File::open(cert_file)
            .with_context(|| format!("cannot open tls cert {}", cert_file.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid tls cert {}", cert_file.display()))?;
    if certs.is_empty() {
        bail!("no certificate found in {}", cert_file.display());
    }

    let mut reader = BufReader::new(
        File::open(key_file)
            .with_context(|| format!("cannot open tls key {}", key_file.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("invalid tls key {}", key_file.display()))?
        .with_context(|| format!("no private key found in {}", key_file.display()))?;

    info!(cert = %cert_file.display(), chain = certs.len(), "loaded tls material");
    Ok(TlsMaterial { certs, key })
}

/// Build a server config; fails when the key does not match the certificate.
pub fn server_config(material: TlsMaterial) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let config = rustls::ServerConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .context("tls protocol versions")?
    .with_no_client_auth()
    .with_single_cert(material.certs, material.key)
    .context("tls cert and key do not form a valid pair")?;
    Ok(Arc::new(config))
}

/// Startup check of the configured material.
///
/// keeld opens no listener of its own, so the assembled config is dropped;
/// only the failure matters, and it aborts startup.
pub fn check(cert_file: &Path, key_file: &Path) -> anyhow::Result<()> {
    server_config(load(cert_file, key_file)?)?;
    info!(cert = %cert_file.display(), "tls material validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn self_signed() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["keel.local".to_string()]).unwrap()
    }

    #[test]
    fn loads_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let ck = self_signed();
        let cert = write(dir.path(), "server.crt", &ck.cert.pem());
        let key = write(dir.path(), "server.key", &ck.key_pair.serialize_pem());

        let material = load(&cert, &key).unwrap();
        assert_eq!(material.certs.len(), 1);
        server_config(material).unwrap();
    }

    #[test]
    fn startup_check() {
        let dir = tempfile::tempdir().unwrap();
        let ck = self_signed();
        let cert = write(dir.path(), "server.crt", &ck.cert.pem());
        let key = write(dir.path(), "server.key", &ck.key_pair.serialize_pem());
        check(&cert, &key).unwrap();

        let err = check(&cert, &dir.path().join("absent.key")).unwrap_err();
        assert!(err.to_string().contains("cannot open tls key"));
    }

    #[test]
    fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ck = self_signed();
        let key = write(dir.path(), "server.key", &ck.key_pair.serialize_pem());

        let err = load(&dir.path().join("absent.crt"), &key).unwrap_err();
        assert!(err.to_string().contains("cannot open tls cert"));
    }

    #[test]
    fn file_without_key_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ck = self_signed();
        let cert = write(dir.path(), "server.crt", &ck.cert.pem());

        // A certificate is not a key.
        let err = load(&cert, &cert).unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }
}
