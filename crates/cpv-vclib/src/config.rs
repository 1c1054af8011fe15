//! vCenter connection configuration.

use crate::error::{VclibError, VclibResult};
use crate::types::{CaBundle, Credentials, Endpoint, TrustAnchor};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Connection settings for one vCenter, as read from YAML.
///
/// At most one of `caFile`, `caPem` and `thumbprint` may be set; with none
/// the platform trust store is used.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcenterConfig {
    /// vCenter hostname / IP (e.g. "vcenter.lab.local")
    pub host: String,
    /// Port (default 443)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (e.g. "administrator@vsphere.local")
    pub username: String,
    /// Password
    pub password: String,
    /// PEM CA bundle on disk
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Inline PEM CA bundle
    #[serde(default)]
    pub ca_pem: Option<String>,
    /// Pinned SHA-256 thumbprint of the server certificate (colon-hex)
    #[serde(default)]
    pub thumbprint: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Datacenter paths or references this vCenter serves
    #[serde(default)]
    pub datacenters: Vec<String>,
}

fn default_port() -> u16 { 443 }
fn default_timeout() -> u64 { 30 }

impl Default for VcenterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            username: String::new(),
            password: String::new(),
            ca_file: None,
            ca_pem: None,
            thumbprint: None,
            timeout_secs: 30,
            datacenters: Vec::new(),
        }
    }
}

impl fmt::Debug for VcenterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcenterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("ca_file", &self.ca_file)
            .field("ca_pem", &self.ca_pem.as_ref().map(|_| "<pem>"))
            .field("thumbprint", &self.thumbprint)
            .field("timeout_secs", &self.timeout_secs)
            .field("datacenters", &self.datacenters)
            .finish_non_exhaustive()
    }
}

impl VcenterConfig {
    pub fn from_yaml_str(yaml: &str) -> VclibResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.endpoint().validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> VclibResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            let mut err = VclibError::from(e);
            err.message = format!("Failed to read {}: {}", path.display(), err.message);
            err
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// The single trust anchor this config names.
    pub fn trust_anchor(&self) -> VclibResult<TrustAnchor> {
        let thumbprint = self.thumbprint.as_deref().map(str::trim).filter(|t| !t.is_empty());
        match (&self.ca_file, &self.ca_pem, thumbprint) {
            (None, None, None) => Ok(TrustAnchor::SystemRoots),
            (Some(path), None, None) => Ok(TrustAnchor::CaBundle(CaBundle::Path(path.clone()))),
            (None, Some(pem), None) => Ok(TrustAnchor::CaBundle(CaBundle::Pem(pem.clone().into_bytes()))),
            (None, None, Some(t)) => Ok(TrustAnchor::PinnedFingerprint(t.to_string())),
            _ => Err(VclibError::configuration(format!(
                "{}: set at most one of caFile, caPem and thumbprint",
                self.host
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VclibErrorKind;

    #[test]
    fn yaml_defaults() {
        let cfg = VcenterConfig::from_yaml_str(
            "host: vc.lab\nusername: administrator@vsphere.local\npassword: secret\n",
        )
        .unwrap();
        assert_eq!(cfg.port, 443);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.trust_anchor().unwrap(), TrustAnchor::SystemRoots);
        assert!(!format!("{cfg:?}").contains("secret"));
    }

    #[test]
    fn yaml_with_thumbprint_and_datacenters() {
        let cfg = VcenterConfig::from_yaml_str(
            "host: vc.lab\nport: 8443\nusername: u\npassword: p\n\
             thumbprint: 'AA:BB'\ndatacenters: [dc1, 'Datacenter:datacenter-3']\n",
        )
        .unwrap();
        assert_eq!(cfg.endpoint(), Endpoint::new("vc.lab", 8443));
        assert_eq!(
            cfg.trust_anchor().unwrap(),
            TrustAnchor::PinnedFingerprint("AA:BB".into())
        );
        assert_eq!(cfg.datacenters.len(), 2);
    }

    #[test]
    fn conflicting_anchors_are_rejected() {
        let cfg = VcenterConfig {
            host: "vc.lab".into(),
            ca_file: Some("/etc/ssl/vc.pem".into()),
            thumbprint: Some("AA:BB".into()),
            ..Default::default()
        };
        assert_eq!(cfg.trust_anchor().unwrap_err().kind, VclibErrorKind::Configuration);
    }

    #[test]
    fn blank_thumbprint_means_none() {
        let cfg = VcenterConfig {
            host: "vc.lab".into(),
            ca_file: Some("/etc/ssl/vc.pem".into()),
            thumbprint: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(cfg.trust_anchor().unwrap(), TrustAnchor::CaBundle(CaBundle::Path(_))));
    }

    #[test]
    fn empty_host_is_a_configuration_error() {
        let err = VcenterConfig::from_yaml_str("host: ''\nusername: u\npassword: p\n").unwrap_err();
        assert_eq!(err.kind, VclibErrorKind::Configuration);
    }

    #[test]
    fn missing_file_is_a_filesystem_error() {
        let err = VcenterConfig::from_file("/nonexistent/vcenter.yaml").unwrap_err();
        assert!(matches!(err.kind, VclibErrorKind::Filesystem(_)));
    }
}
