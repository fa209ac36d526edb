//! Backchannel TLS that also trusts a local development CA (e.g. mkcert's).
//!
//! Only reachable with a [`Development`] guard. Production keeps the standard
//! trust store and real CA-issued certificates.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::environment::Development;
use crate::error::Error;

/// A loaded development root CA.
pub struct DevCaTrust {
    verifier: Arc<DevCaVerifier>,
    provider: Arc<CryptoProvider>,
}

impl DevCaTrust {
    /// Load the root CA certificate (PEM) at `ca_path`.
    ///
    /// # Errors
    ///
    /// [`Error::CaNotFound`] if the path does not name a file, [`Error::Tls`]
    /// if it holds no usable certificate.
    pub fn load(_development: &Development, ca_path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = ca_path.as_ref();
        if !path.is_file() {
            return Err(Error::CaNotFound(path.to_path_buf()));
        }

        let root = CertificateDer::from_pem_file(path)
            .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;

        let provider = Arc::new(ring::default_provider());
        let verifier = Arc::new(DevCaVerifier::new(root, provider.clone())?);

        tracing::debug!(ca_path = %path.display(), "Loaded development root CA");
        Ok(Self { verifier, provider })
    }

    /// The certificate verifier, for callers wiring their own TLS stack.
    #[must_use]
    pub fn verifier(&self) -> Arc<dyn ServerCertVerifier> {
        self.verifier.clone()
    }

    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the crypto provider rejects the default
    /// protocol versions.
    pub fn client_config(&self) -> Result<rustls::ClientConfig, Error> {
        Ok(
            rustls::ClientConfig::builder_with_provider(self.provider.clone())
                .with_safe_default_protocol_versions()
                .map_err(|e| Error::Tls(e.to_string()))?
                .dangerous()
                .with_custom_certificate_verifier(self.verifier.clone())
                .with_no_client_auth(),
        )
    }

    /// HTTP client for backchannel calls to the identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] or [`Error::Http`] if the client cannot be built.
    pub fn http_client(&self, timeout: Duration) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .use_preconfigured_tls(self.client_config()?)
            .timeout(timeout)
            .build()
            .map_err(Error::Http)
    }
}

/// Standard validation first; on failure, the chain is re-validated against
/// the development root alone. No CRLs are configured, so revocation is not
/// checked on the fallback path.
#[derive(Debug)]
struct DevCaVerifier {
    standard: Arc<WebPkiServerVerifier>,
    development: Arc<WebPkiServerVerifier>,
}

impl DevCaVerifier {
    fn new(root: CertificateDer<'static>, provider: Arc<CryptoProvider>) -> Result<Self, Error> {
        let standard_roots = standard_roots();

        let mut development_roots = RootCertStore::empty();
        development_roots
            .add(root)
            .map_err(|e| Error::Tls(format!("invalid root CA: {e}")))?;

        let standard =
            WebPkiServerVerifier::builder_with_provider(Arc::new(standard_roots), provider.clone())
                .build()
                .map_err(|e| Error::Tls(e.to_string()))?;
        let development =
            WebPkiServerVerifier::builder_with_provider(Arc::new(development_roots), provider)
                .build()
                .map_err(|e| Error::Tls(e.to_string()))?;

        Ok(Self {
            standard,
            development,
        })
    }
}

/// The operating system's trust store, or the bundled Mozilla roots when it
/// yields nothing usable.
fn standard_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::debug!(error = %error, "Skipping unreadable native certificate");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if ignored > 0 {
        tracing::debug!(ignored, "Ignored unparsable native root certificates");
    }
    if added == 0 {
        tracing::warn!("No native root certificates found, using bundled webpki roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    roots
}

impl ServerCertVerifier for DevCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.standard.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(e) => {
                tracing::trace!(error = %e, "Standard validation failed, trying development CA");
                self.development.verify_server_cert(
                    end_entity,
                    intermediates,
                    server_name,
                    ocsp_response,
                    now,
                )
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.development.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.development.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.development.supported_verify_schemes()
    }
}
