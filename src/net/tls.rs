//! TLS client configuration backed by the certificate store.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::certs::{CertificateStore, Validation};
use crate::config::ConfigError;

/// Routes every handshake's chain check through [`CertificateStore::validate`].
#[derive(Debug)]
pub struct StoreVerifier {
    store: Arc<CertificateStore>,
}

impl StoreVerifier {
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }
}

impl ServerCertVerifier for StoreVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        match self.store.validate(&chain, server_name, now) {
            Validation::Trusted => Ok(ServerCertVerified::assertion()),
            Validation::Untrusted(reason) => {
                tracing::debug!(server_name = ?server_name, reason = %reason, "Peer chain rejected");
                Err(reason)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.store.webpki().verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.store.webpki().verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.store.webpki().supported_verify_schemes()
    }
}

/// Build a connector whose handshakes trust exactly the roots in `store`.
pub fn client_connector(store: Arc<CertificateStore>) -> Result<TlsConnector, ConfigError> {
    let provider = store.provider();
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(StoreVerifier::new(store)))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}
