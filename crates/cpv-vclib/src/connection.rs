//! Trusted, authenticated sessions to a vCenter endpoint.

use crate::config::VcenterConfig;
use crate::error::{VclibError, VclibResult};
use crate::soap::SoapClient;
use crate::trust::{self, TrustMonitor};
use crate::types::{AboutInfo, Credentials, Endpoint, TrustAnchor};
use crate::vim::VimClient;

use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// An authenticated vim25 session. Only ever handed out fully logged in.
///
/// The caller owns the session and passes it by reference to every
/// resolver and checker call. It is `Send + Sync`; concurrent calls share
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Session {
    endpoint: Endpoint,
    username: String,
    about: AboutInfo,
    client: Arc<dyn VimClient>,
}

impl Session {
    /// Wrap an already authenticated client.
    pub(crate) fn from_client(
        endpoint: Endpoint,
        username: impl Into<String>,
        about: AboutInfo,
        client: Arc<dyn VimClient>,
    ) -> Self {
        Self {
            endpoint,
            username: username.into(),
            about,
            client,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Product / API description reported at connect time.
    pub fn about(&self) -> &AboutInfo {
        &self.about
    }

    pub fn client(&self) -> &dyn VimClient {
        self.client.as_ref()
    }

    /// End the remote session and drop the transport.
    pub async fn logout(self) -> VclibResult<()> {
        info!("Logging out of {} as {}", self.endpoint, self.username);
        self.client.logout().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("about", &self.about)
            .finish_non_exhaustive()
    }
}

/// Negotiates trust and logs in.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    timeout: Duration,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Per-request timeout applied to every round trip of the session.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect using the endpoint, credentials and trust anchor of a config.
    pub async fn connect_with_config(config: &VcenterConfig) -> VclibResult<Session> {
        let trust = config.trust_anchor()?;
        Self::new()
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .connect(&config.endpoint(), &config.credentials(), &trust)
            .await
    }

    /// Establish a trusted TLS channel to `endpoint`, then log in.
    ///
    /// CA bundle problems are reported before any network I/O. Trust
    /// failures come back as `CertificateUntrusted` / `ThumbprintMismatch`,
    /// never as plain connection errors. On any failure the transport is
    /// dropped before returning.
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        trust: &TrustAnchor,
    ) -> VclibResult<Session> {
        let url = endpoint.sdk_url()?;
        info!(
            "Connecting to {} as {} ({})",
            endpoint,
            credentials.username,
            trust_mode(trust)
        );

        let monitor = TrustMonitor::new();
        let tls = trust::client_config(trust, monitor.clone()).await?;

        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .cookie_store(true)
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(self.timeout))
            .build()
            .map_err(|e| VclibError::connection(format!("Failed to build HTTP client: {e}")))?;

        let classify = |e: VclibError| match monitor.take() {
            Some(failure) => {
                warn!("TLS trust check against {endpoint} failed: {failure:?}");
                failure.into_error(&endpoint.hostname)
            }
            None => e,
        };

        let client = SoapClient::new(http, url).await.map_err(classify)?;
        let username = match client.login(credentials).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Login to {endpoint} as {} failed: {e}", credentials.username);
                drop(client);
                return Err(classify(e));
            }
        };

        let about = client.about().clone();
        info!("Logged in to {} ({} {})", endpoint, about.full_name, about.api_version);
        Ok(Session::from_client(endpoint.clone(), username, about, Arc::new(client)))
    }
}

fn trust_mode(trust: &TrustAnchor) -> &'static str {
    match trust {
        TrustAnchor::CaBundle(_) => "CA bundle",
        TrustAnchor::PinnedFingerprint(_) => "pinned thumbprint",
        TrustAnchor::SystemRoots => "system roots",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VclibErrorKind;
    use crate::types::CaBundle;
    use std::path::PathBuf;

    #[tokio::test]
    async fn empty_hostname_is_rejected_before_io() {
        let err = ConnectionManager::new()
            .connect(
                &Endpoint::new("", 443),
                &Credentials::new("u", "p"),
                &TrustAnchor::SystemRoots,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, VclibErrorKind::Configuration);
    }

    #[tokio::test]
    async fn missing_ca_file_is_a_filesystem_error() {
        let err = ConnectionManager::new()
            .connect(
                &Endpoint::new("should-not-matter", 27015),
                &Credentials::new("u", "p"),
                &TrustAnchor::CaBundle(CaBundle::Path(PathBuf::from("invalid-path"))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.kind, VclibErrorKind::Filesystem(_)));
    }

    #[test]
    fn trust_mode_names() {
        assert_eq!(trust_mode(&TrustAnchor::SystemRoots), "system roots");
        assert_eq!(
            trust_mode(&TrustAnchor::PinnedFingerprint("AA".into())),
            "pinned thumbprint"
        );
    }
}
