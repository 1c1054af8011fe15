//! Error types for the vCenter client library.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VclibErrorKind {
    /// Bad input the caller must fix (conflicting trust anchors, empty hostname)
    Configuration,
    /// CA bundle could not be read from disk
    Filesystem(std::io::ErrorKind),
    /// CA bundle was read but holds no usable certificate
    InvalidCertificate,
    /// Server certificate does not chain to a trusted root
    CertificateUntrusted,
    /// Server leaf certificate does not match the pinned thumbprint
    ThumbprintMismatch,
    /// Endpoint unreachable or transport dropped
    ConnectionError,
    /// Timeout
    Timeout,
    /// Login rejected or session no longer valid
    AuthenticationError,
    /// Inventory object not found
    NotFound,
    /// No virtual machine owns the requested UUID
    VmNotFound,
    /// Malformed inventory path or managed-object reference
    InvalidIdentifier,
    /// Disk path is not of the `[datastore] path` form
    InvalidDiskPath,
    /// Bulk property fetch called without objects
    EmptyObjectList,
    /// Server rejected a property path
    InvalidProperty,
    /// Any other vim25 fault, carrying the fault type name
    Fault(String),
    /// HTTP error with status code
    Http(u16),
    /// XML parse / unexpected response shape
    ParseError,
    /// Generic
    Other,
}

/// Crate error type carrying a kind + human-readable message.
#[derive(Debug, Clone)]
pub struct VclibError {
    pub kind: VclibErrorKind,
    pub message: String,
}

impl VclibError {
    pub fn new(kind: VclibErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::Configuration, msg)
    }

    pub fn invalid_certificate(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::InvalidCertificate, msg)
    }

    pub fn untrusted(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::CertificateUntrusted, msg)
    }

    pub fn thumbprint_mismatch(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::ThumbprintMismatch, msg)
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::ConnectionError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::Timeout, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::AuthenticationError, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::NotFound, msg)
    }

    /// The sentinel returned by UUID lookups that match no VM.
    pub fn no_vm_found() -> Self {
        Self::new(VclibErrorKind::VmNotFound, "No VM found")
    }

    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::InvalidIdentifier, msg)
    }

    pub fn invalid_disk_path(path: &str) -> Self {
        Self::new(
            VclibErrorKind::InvalidDiskPath,
            format!("Failed to parse vmDiskPath: {path}"),
        )
    }

    pub fn empty_object_list(type_name: &str) -> Self {
        Self::new(
            VclibErrorKind::EmptyObjectList,
            format!("{type_name} Object list is empty"),
        )
    }

    pub fn fault(fault_type: &str, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match fault_type {
            "InvalidLogin" | "NotAuthenticated" => Self::auth(format!("{fault_type}: {msg}")),
            "InvalidProperty" => Self::new(
                VclibErrorKind::InvalidProperty,
                format!("InvalidProperty: {msg}"),
            ),
            "ManagedObjectNotFound" | "FileNotFound" => {
                Self::not_found(format!("{fault_type}: {msg} not found"))
            }
            other => Self::new(
                VclibErrorKind::Fault(other.to_string()),
                format!("{other}: {msg}"),
            ),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(VclibErrorKind::ParseError, msg)
    }

    /// Not-found conditions callers are expected to recover from.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, VclibErrorKind::NotFound | VclibErrorKind::VmNotFound)
    }

    /// The attempt was refused because the server's identity could not be established.
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self.kind,
            VclibErrorKind::CertificateUntrusted | VclibErrorKind::ThumbprintMismatch
        )
    }

    pub fn is_certificate_untrusted(&self) -> bool {
        self.kind == VclibErrorKind::CertificateUntrusted
    }
}

impl fmt::Display for VclibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for VclibError {}

impl From<reqwest::Error> for VclibError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("HTTP timeout: {e}"))
        } else if e.is_connect() {
            Self::connection(format!("Connection failed: {e}"))
        } else {
            Self::new(VclibErrorKind::Other, format!("HTTP error: {e}"))
        }
    }
}

impl From<std::io::Error> for VclibError {
    fn from(e: std::io::Error) -> Self {
        Self::new(VclibErrorKind::Filesystem(e.kind()), e.to_string())
    }
}

impl From<quick_xml::Error> for VclibError {
    fn from(e: quick_xml::Error) -> Self {
        Self::parse(format!("XML parse error: {e}"))
    }
}

impl From<serde_yaml::Error> for VclibError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::configuration(format!("Invalid configuration: {e}"))
    }
}

/// Convenience alias.
pub type VclibResult<T> = Result<T, VclibError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_mapping_by_type() {
        assert_eq!(
            VclibError::fault("InvalidLogin", "bad password").kind,
            VclibErrorKind::AuthenticationError
        );
        let e = VclibError::fault("InvalidProperty", "enoent");
        assert_eq!(e.kind, VclibErrorKind::InvalidProperty);
        assert!(e.message.contains("InvalidProperty"));
        assert!(VclibError::fault("FileNotFound", "[ds] x.vmdk").is_not_found());
        assert_eq!(
            VclibError::fault("NoPermission", "denied").kind,
            VclibErrorKind::Fault("NoPermission".into())
        );
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let e: VclibError = io.into();
        assert_eq!(e.kind, VclibErrorKind::Filesystem(std::io::ErrorKind::NotFound));
        assert!(!e.is_not_found());
        assert!(!e.is_trust_failure());
    }

    #[test]
    fn sentinel_and_messages() {
        assert!(VclibError::no_vm_found().is_not_found());
        assert!(VclibError::invalid_disk_path("enoent")
            .message
            .contains("Failed to parse vmDiskPath"));
        assert_eq!(
            VclibError::empty_object_list("Datastore").message,
            "Datastore Object list is empty"
        );
        assert!(VclibError::untrusted("x").is_certificate_untrusted());
        assert!(VclibError::thumbprint_mismatch("x").is_trust_failure());
    }
}
