//! TLS configuration and certificate loading.

use std::io::BufReader;
use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;

/// Error type for certificate loading.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("invalid certificate or key: {0}")]
    Invalid(#[source] std::io::Error),
}

/// Load TLS configuration from PEM certificate and key files.
///
/// Both files are checked up front so a bad deployment fails with a message
/// naming the offending file rather than a generic rustls error.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    let cert = read(cert_path).await?;
    let key = read(key_path).await?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(cert.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let private_key = rustls_pemfile::private_key(&mut BufReader::new(key.as_slice())).map_err(
        |source| TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        },
    )?;
    if private_key.is_none() {
        return Err(TlsError::NoPrivateKey(key_path.to_path_buf()));
    }

    let config = RustlsConfig::from_pem(cert, key)
        .await
        .map_err(TlsError::Invalid)?;

    tracing::info!(
        cert_path = %cert_path.display(),
        certificates = certs.len(),
        "TLS certificate loaded"
    );

    Ok(config)
}

async fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(path).await.map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tiny-tls-proxy-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_tls_config(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
        assert!(err.to_string().contains("cert.pem"));
    }

    #[tokio::test]
    async fn test_file_without_certificates() {
        let dir = scratch_dir("nocert");
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = load_tls_config(&cert, &key).await.unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[tokio::test]
    async fn test_generated_certificate_loads() {
        let dir = scratch_dir("valid");
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, generated.cert.pem()).unwrap();
        std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();

        assert!(load_tls_config(&cert, &key).await.is_ok());

        std::fs::write(&key, "").unwrap();
        let err = load_tls_config(&cert, &key).await.unwrap_err();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }
}
