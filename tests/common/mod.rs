//! Self-signed QUIC server endpoints and matching client options.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use loom::{ClientOptions, TransportKind};

fn generate_self_signed() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let cert_der = CertificateDer::from(cert.cert);
    (vec![cert_der], key.into())
}

/// A server endpoint on an ephemeral localhost port speaking `alpn`.
pub fn server_endpoint(alpn: &[u8]) -> (quinn::Endpoint, SocketAddr) {
    let (certs, key) = generate_self_signed();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    tls_config.alpn_protocols = vec![alpn.to_vec()];

    let quic_config = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config).unwrap();
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_config));
    let endpoint = quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = endpoint.local_addr().unwrap();
    (endpoint, addr)
}

pub fn client_options(addr: SocketAddr, name: &str, transport: TransportKind) -> ClientOptions {
    let mut options = ClientOptions::new(addr.to_string());
    options.transport = transport;
    options.name = name.to_string();
    options.room = "integration".to_string();
    options.tls.insecure_skip_verify = true;
    options.tls.server_name = Some("localhost".to_string());
    options.limits.chunk_size = 1024;
    options
}
