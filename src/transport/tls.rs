use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::warn;

use crate::config::TlsOptions;
use crate::protocol::error::{LoomError, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Build a TLS 1.3 client config advertising `alpn`.
pub fn client_config(options: &TlsOptions, alpn: &[u8]) -> Result<rustls::ClientConfig> {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| LoomError::InvalidConfig(format!("tls: {}", e)))?;

    let builder = if options.insecure_skip_verify {
        warn!("TLS certificate verification is disabled; use only for development");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
    } else {
        builder.with_root_certificates(root_store(options)?)
    };

    let mut config = match (&options.client_cert_file, &options.client_key_file) {
        (Some(cert_file), Some(key_file)) => {
            let certs = load_certs(cert_file)?;
            let key = PrivateKeyDer::from_pem_file(as_path(key_file))
                .map_err(|e| LoomError::InvalidConfig(format!("failed to read key {}: {}", key_file, e)))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| LoomError::InvalidConfig(format!("client certificate: {}", e)))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(LoomError::InvalidConfig(
                "client_cert_file and client_key_file must be set together".into(),
            ))
        }
    };

    config.alpn_protocols = vec![alpn.to_vec()];
    Ok(config)
}

fn root_store(options: &TlsOptions) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match &options.ca_file {
        Some(ca_file) => {
            for cert in load_certs(ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| LoomError::InvalidConfig(format!("bad CA certificate in {}: {}", ca_file, e)))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

fn as_path(path: &str) -> &std::path::Path {
    std::path::Path::new(path)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(as_path(path))
        .map_err(|e| LoomError::InvalidConfig(format!("failed to read {}: {}", path, e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LoomError::InvalidConfig(format!("failed to parse certs from {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(LoomError::InvalidConfig(format!("no certificates found in {}", path)));
    }
    Ok(certs)
}

/// Accepts any server certificate. Development only.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
