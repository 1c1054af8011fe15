//! TLS trust negotiation for the vCenter endpoint.
//!
//! Every connection installs a single [`TrustVerifier`] into rustls. It either
//! verifies the chain (against a CA bundle or the platform roots) or checks
//! the leaf against a pinned thumbprint. Handshake signatures are verified in
//! every mode. Rejections are recorded in a [`TrustMonitor`] so the caller can
//! tell a trust failure apart from a network error once the request fails.

use crate::error::{VclibError, VclibResult};
use crate::fingerprint::Fingerprint;
use crate::types::{CaBundle, TrustAnchor};

use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

/// Why the verifier refused the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustFailure {
    /// The chain does not lead to a trusted root (or names another host).
    Untrusted(String),
    /// The leaf certificate is not the pinned one.
    ThumbprintMismatch { expected: String, actual: String },
}

impl TrustFailure {
    pub fn into_error(self, host: &str) -> VclibError {
        match self {
            Self::Untrusted(reason) => VclibError::untrusted(format!(
                "Certificate presented by {host} is not trusted: {reason}. \
                 Supply a CA bundle or the server thumbprint"
            )),
            Self::ThumbprintMismatch { expected, actual } => VclibError::thumbprint_mismatch(format!(
                "Host {host} thumbprint does not match {expected:?} (server presented {actual})"
            )),
        }
    }
}

/// Shared slot the verifier writes its last rejection into.
#[derive(Debug, Clone, Default)]
pub struct TrustMonitor(Arc<Mutex<Option<TrustFailure>>>);

impl TrustMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, failure: TrustFailure) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(failure);
        }
    }

    /// Take the recorded failure, if any.
    pub fn take(&self) -> Option<TrustFailure> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[derive(Debug)]
enum Mode {
    /// `None` when no root was available at all.
    Chain(Option<Arc<WebPkiServerVerifier>>),
    Pinned(String),
}

/// rustls verifier enforcing one [`TrustAnchor`].
#[derive(Debug)]
pub struct TrustVerifier {
    mode: Mode,
    provider: Arc<CryptoProvider>,
    monitor: TrustMonitor,
}

impl TrustVerifier {
    /// Build a verifier. CA bundles are read and parsed here, before any
    /// network I/O.
    pub async fn for_anchor(
        anchor: &TrustAnchor,
        provider: Arc<CryptoProvider>,
        monitor: TrustMonitor,
    ) -> VclibResult<Self> {
        let mode = match anchor {
            TrustAnchor::CaBundle(bundle) => {
                let roots = load_ca_bundle(bundle).await?;
                Mode::Chain(Some(webpki_verifier(roots, &provider)?))
            }
            TrustAnchor::PinnedFingerprint(expected) => Mode::Pinned(expected.clone()),
            TrustAnchor::SystemRoots => {
                let roots = system_roots();
                if roots.is_empty() {
                    warn!("No platform trust roots available; every certificate will be untrusted");
                    Mode::Chain(None)
                } else {
                    Mode::Chain(Some(webpki_verifier(roots, &provider)?))
                }
            }
        };
        Ok(Self { mode, provider, monitor })
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match &self.mode {
            Mode::Pinned(expected) => {
                let actual = Fingerprint::compute(end_entity.as_ref());
                if actual.matches(expected) {
                    debug!("Server certificate matches pinned thumbprint {actual}");
                    Ok(ServerCertVerified::assertion())
                } else {
                    self.monitor.record(TrustFailure::ThumbprintMismatch {
                        expected: expected.clone(),
                        actual: actual.to_string(),
                    });
                    Err(rustls::Error::General("thumbprint does not match".into()))
                }
            }
            Mode::Chain(None) => {
                self.monitor
                    .record(TrustFailure::Untrusted("no trusted roots available".into()));
                Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
            }
            Mode::Chain(Some(inner)) => {
                match inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
                    Ok(verified) => Ok(verified),
                    Err(e @ rustls::Error::InvalidCertificate(_)) => {
                        self.monitor.record(TrustFailure::Untrusted(e.to_string()));
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Client TLS configuration enforcing `anchor`, reporting into `monitor`.
pub async fn client_config(anchor: &TrustAnchor, monitor: TrustMonitor) -> VclibResult<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = TrustVerifier::for_anchor(anchor, provider.clone(), monitor).await?;

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| VclibError::configuration(format!("TLS setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Read and parse a PEM CA bundle. Read failures surface as filesystem
/// errors; unusable contents as invalid-certificate errors.
pub async fn load_ca_bundle(bundle: &CaBundle) -> VclibResult<RootCertStore> {
    let pem = match bundle {
        CaBundle::Path(path) => tokio::fs::read(path).await.map_err(|e| {
            let mut err = VclibError::from(e);
            err.message = format!("Failed to read CA bundle {}: {}", path.display(), err.message);
            err
        })?,
        CaBundle::Pem(bytes) => bytes.clone(),
    };

    let certs = rustls_pemfile::certs(&mut Cursor::new(&pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VclibError::invalid_certificate(format!("invalid certificate in CA bundle: {e}")))?;
    if certs.is_empty() {
        return Err(VclibError::invalid_certificate(
            "invalid certificate: no PEM certificate found in CA bundle",
        ));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| VclibError::invalid_certificate(format!("invalid certificate in CA bundle: {e}")))?;
    }
    debug!("Loaded {} CA certificate(s)", roots.len());
    Ok(roots)
}

fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    for e in &result.errors {
        warn!("Skipping unreadable platform certificate: {e}");
    }
    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    debug!("Loaded {added} platform root(s), ignored {ignored}");
    roots
}

fn webpki_verifier(
    roots: RootCertStore,
    provider: &Arc<CryptoProvider>,
) -> VclibResult<Arc<WebPkiServerVerifier>> {
    WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| VclibError::invalid_certificate(format!("invalid certificate trust store: {e}")))
}
