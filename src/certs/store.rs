//! Certificate store loading and chain validation.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::RootCertStore;

use crate::config::ConfigError;

/// Outcome of validating a peer chain against the trust roots.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Trusted,
    /// The chain does not lead to a trust root; carries the rejection detail.
    Untrusted(rustls::Error),
}

/// Immutable set of trusted root certificates.
#[derive(Debug)]
pub struct CertificateStore {
    roots: Arc<RootCertStore>,
    verifier: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    sources: Vec<PathBuf>,
}

impl CertificateStore {
    /// Load every PEM bundle in `paths`, in order.
    ///
    /// Paths that cannot be read or parsed are skipped with a warning. Fails
    /// with [`ConfigError::NoTrustRoots`] unless at least one certificate was
    /// accepted.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut roots = RootCertStore::empty();
        let mut sources = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let certs = match read_pem_certificates(path) {
                Ok(certs) => certs,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping certificate bundle");
                    continue;
                }
            };

            let (added, ignored) = roots.add_parsable_certificates(certs);
            tracing::debug!(path = %path.display(), added, ignored, "Certificate bundle read");
            if ignored > 0 {
                tracing::warn!(path = %path.display(), ignored, "Bundle contained unusable certificates");
            }
            if added > 0 {
                sources.push(path.to_path_buf());
            }
        }

        if roots.is_empty() {
            return Err(ConfigError::NoTrustRoots(
                paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            ));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(roots);
        let verifier = WebPkiServerVerifier::builder_with_provider(roots.clone(), provider.clone())
            .build()
            .map_err(|e| ConfigError::Tls(e.to_string()))?;

        tracing::info!(roots = roots.len(), sources = sources.len(), "Certificate store loaded");

        Ok(Self {
            roots,
            verifier,
            provider,
            sources,
        })
    }

    /// Validate a peer chain (end-entity first) for `server_name` at `now`.
    pub fn validate(
        &self,
        chain: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Validation {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return Validation::Untrusted(rustls::Error::NoCertificatesPresented);
        };

        match self
            .verifier
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
        {
            Ok(_) => Validation::Trusted,
            Err(e) => Validation::Untrusted(e),
        }
    }

    /// Number of trust roots held.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Bundles that contributed at least one root, in load order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub(crate) fn provider(&self) -> Arc<CryptoProvider> {
        self.provider.clone()
    }

    pub(crate) fn webpki(&self) -> &WebPkiServerVerifier {
        &self.verifier
    }
}

fn read_pem_certificates(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}
