//! Self-signed certificate generation and TLS server setup.
//!
//! A fresh certificate is generated on every start; peers learn it from the
//! certificate discovery file.

use std::sync::Arc;
use webverse_core::{WebVerseError, WebVerseResult};

/// PEM-encoded certificate and private key held in memory.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub common_name: String,
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed certificate for `hostname`.
///
/// Subject CN is `<hostname>.webverse.info`; SANs cover `localhost`,
/// `127.0.0.1` and the bare hostname so local peers can connect by any.
pub fn generate(hostname: &str) -> WebVerseResult<CertificateBundle> {
    let common_name = format!("{hostname}.webverse.info");

    let mut names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    if hostname != "localhost" {
        names.push(hostname.to_string());
    }

    let mut params = rcgen::CertificateParams::new(names)
        .map_err(|e| WebVerseError::Tls(format!("certificate params: {e}")))?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name.as_str());

    let key_pair =
        rcgen::KeyPair::generate().map_err(|e| WebVerseError::Tls(format!("key generation: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| WebVerseError::Tls(format!("self-signing: {e}")))?;

    Ok(CertificateBundle {
        common_name,
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Build a rustls server config from a PEM certificate and key.
pub fn server_config(bundle: &CertificateBundle) -> WebVerseResult<Arc<rustls::ServerConfig>> {
    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut bundle.cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()?;

    let key = rustls_pemfile::private_key(&mut bundle.key_pem.as_bytes())?
        .ok_or_else(|| WebVerseError::Tls("no private key found in PEM".into()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| WebVerseError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| WebVerseError::Tls(e.to_string()))?;

    // WebSocket upgrade runs over HTTP/1.1.
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(tls_config))
}
