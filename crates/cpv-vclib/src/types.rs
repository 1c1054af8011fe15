//! Shared types: connection inputs, inventory handles and vim25 values.

use crate::error::{VclibError, VclibResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use url::Url;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A vCenter management endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self { hostname: hostname.into(), port }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`. Port defaults to 443.
    pub fn parse(target: &str) -> VclibResult<Self> {
        let target = target.trim();
        let (host, port) = if let Some(rest) = target.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| VclibError::configuration(format!("Invalid endpoint '{target}'")))?;
            let port = match rest[close + 1..].strip_prefix(':') {
                Some(p) => Some(p),
                None if rest[close + 1..].is_empty() => None,
                None => {
                    return Err(VclibError::configuration(format!(
                        "Invalid endpoint '{target}'"
                    )))
                }
            };
            (&rest[..close], port)
        } else {
            match target.rsplit_once(':') {
                // more than one colon without brackets is a bare IPv6 address
                Some((h, _)) if h.contains(':') => (target, None),
                Some((h, p)) => (h, Some(p)),
                None => (target, None),
            }
        };

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| VclibError::configuration(format!("Invalid port '{p}' in '{target}'")))?,
            None => 443,
        };

        let endpoint = Self::new(host, port);
        endpoint.validate()?;
        Ok(endpoint)
    }

    pub fn validate(&self) -> VclibResult<()> {
        if self.hostname.trim().is_empty() {
            return Err(VclibError::configuration("vCenter hostname must not be empty"));
        }
        if self.port == 0 {
            return Err(VclibError::configuration("vCenter port must not be 0"));
        }
        Ok(())
    }

    /// The vim25 SOAP endpoint, `https://host:port/sdk`.
    pub fn sdk_url(&self) -> VclibResult<Url> {
        self.validate()?;
        let host = if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        Url::parse(&format!("https://{}:{}/sdk", host, self.port))
            .map_err(|e| VclibError::configuration(format!("Invalid endpoint '{self}': {e}")))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.contains(':') {
            write!(f, "[{}]:{}", self.hostname, self.port)
        } else {
            write!(f, "{}:{}", self.hostname, self.port)
        }
    }
}

/// Login credentials. The password never appears in `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a CA bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaBundle {
    /// PEM file on disk
    Path(PathBuf),
    /// PEM bytes held in memory
    Pem(Vec<u8>),
}

/// Basis on which the server certificate is judged trustworthy.
/// Exactly one applies per connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustAnchor {
    /// Verify the chain against these roots only.
    CaBundle(CaBundle),
    /// Accept exactly the leaf whose SHA-256 thumbprint matches (colon-hex).
    PinnedFingerprint(String),
    /// Verify the chain against the platform trust store.
    SystemRoots,
}

impl Default for TrustAnchor {
    fn default() -> Self {
        Self::SystemRoots
    }
}

/// Product description reported by the endpoint at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub full_name: String,
    pub api_type: String,
    pub api_version: String,
    #[serde(default)]
    pub instance_uuid: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Managed-object references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DATACENTER_TYPE: &str = "Datacenter";
pub const VIRTUAL_MACHINE_TYPE: &str = "VirtualMachine";
pub const DATASTORE_TYPE: &str = "Datastore";
pub const FOLDER_TYPE: &str = "Folder";

/// Server-assigned identifier of an inventory object, rendered `Kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedObjectReference {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: String,
}

impl ManagedObjectReference {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), value: value.into() }
    }

    /// Whether `s` is shaped like a reference (`Kind:id`) rather than an inventory path.
    pub fn looks_like_reference(s: &str) -> bool {
        s.contains(':') && !s.contains('/')
    }

    /// Parse `Kind:id`. The kind must start with an upper-case letter and be
    /// alphanumeric; the id must be non-empty.
    pub fn parse(s: &str) -> VclibResult<Self> {
        let invalid = || VclibError::invalid_identifier(format!("Invalid managed object reference '{s}'"));
        let (kind, id) = s.trim().split_once(':').ok_or_else(invalid)?;
        let kind_ok = kind.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && kind.chars().all(|c| c.is_ascii_alphanumeric());
        if !kind_ok || id.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(kind, id))
    }

    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }
}

impl fmt::Display for ManagedObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.value)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Inventory handles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A resolved datacenter. `path` is absolute, e.g. `/dc1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub reference: ManagedObjectReference,
    pub path: String,
}

impl Datacenter {
    pub fn name(&self) -> &str {
        last_segment(&self.path)
    }

    /// Absolute path of a child of this datacenter, e.g. `/dc1/vm/worker-1`.
    pub fn child_path(&self, folder: &str, name: &str) -> String {
        format!("{}/{}/{}", self.path.trim_end_matches('/'), folder, name)
    }
}

/// A resolved virtual machine. `path` is unknown when resolved by UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub reference: ManagedObjectReference,
    pub path: Option<String>,
}

/// A resolved datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub reference: ManagedObjectReference,
    pub name: String,
    pub path: String,
}

impl Datastore {
    /// A `[name] relative` path on this datastore.
    pub fn file_path(&self, relative: &str) -> DatastorePath {
        DatastorePath::new(self.name.clone(), relative)
    }
}

/// A resolved inventory folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub reference: ManagedObjectReference,
    pub path: String,
}

pub(crate) fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Datastore paths / disk identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A `[datastore] relative/path` file location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatastorePath {
    pub datastore: String,
    pub path: String,
}

impl DatastorePath {
    pub fn new(datastore: impl Into<String>, path: impl Into<String>) -> Self {
        Self { datastore: datastore.into(), path: path.into() }
    }

    pub fn parse(s: &str) -> VclibResult<Self> {
        let trimmed = s.trim();
        let rest = trimmed
            .strip_prefix('[')
            .ok_or_else(|| VclibError::invalid_disk_path(s))?;
        let close = rest.find(']').ok_or_else(|| VclibError::invalid_disk_path(s))?;
        let datastore = rest[..close].trim();
        if datastore.is_empty() {
            return Err(VclibError::invalid_disk_path(s));
        }
        Ok(Self::new(datastore, rest[close + 1..].trim()))
    }
}

impl fmt::Display for DatastorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "[{}]", self.datastore)
        } else {
            write!(f, "[{}] {}", self.datastore, self.path)
        }
    }
}

/// SCSI page 83 identifier of a virtual disk: 32 lower-case hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiskPage83Id(String);

impl DiskPage83Id {
    /// Normalise a disk UUID as reported by vCenter, either
    /// `60 00 C2 9a ...` (VirtualDiskManager) or `6000C29a-...` (device backing).
    pub fn from_uuid(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect::<String>()
                .to_ascii_lowercase(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiskPage83Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Property values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A vim25 property value, decoded loosely: scalars stay text, data objects
/// keep their `xsi:type` and fields in document order (arrays are objects
/// with repeated field names).
#[derive(Debug, Clone, PartialEq)]
pub enum VimValue {
    Text(String),
    Reference(ManagedObjectReference),
    Object {
        type_name: Option<String>,
        fields: Vec<(String, VimValue)>,
    },
}

impl VimValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn object(type_name: &str, fields: Vec<(&str, VimValue)>) -> Self {
        Self::Object {
            type_name: Some(type_name.to_string()),
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ManagedObjectReference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Object { type_name, .. } => type_name.as_deref(),
            Self::Reference(_) => Some("ManagedObjectReference"),
            Self::Text(_) => None,
        }
    }

    /// First field called `name`.
    pub fn field(&self, name: &str) -> Option<&VimValue> {
        match self {
            Self::Object { fields, .. } => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Follow a dotted property path, e.g. `config.uuid`.
    pub fn lookup(&self, path: &str) -> Option<&VimValue> {
        path.split('.').try_fold(self, |v, part| v.field(part))
    }

    /// All field values in order (array elements for `ArrayOf*` values).
    pub fn items(&self) -> impl Iterator<Item = &VimValue> {
        let fields: &[(String, VimValue)] = match self {
            Self::Object { fields, .. } => fields.as_slice(),
            _ => &[],
        };
        fields.iter().map(|(_, v)| v)
    }
}

/// Properties fetched for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectContent {
    pub obj: ManagedObjectReference,
    pub properties: BTreeMap<String, VimValue>,
}

impl ObjectContent {
    pub fn new(obj: ManagedObjectReference) -> Self {
        Self { obj, properties: BTreeMap::new() }
    }

    pub fn get(&self, property: &str) -> Option<&VimValue> {
        self.properties.get(property)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(VimValue::as_str)
    }
}

/// A virtual disk device as found in `config.hardware.device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDiskDevice {
    pub key: Option<i32>,
    pub file_name: String,
    pub uuid: Option<String>,
}

impl VirtualDiskDevice {
    /// Pick the `VirtualDisk` entries out of an `ArrayOfVirtualDevice`.
    pub fn from_devices(devices: &VimValue) -> Vec<Self> {
        devices
            .items()
            .filter(|d| d.type_name() == Some("VirtualDisk"))
            .filter_map(|d| {
                let backing = d.field("backing")?;
                Some(Self {
                    key: d.field("key").and_then(VimValue::as_str).and_then(|k| k.parse().ok()),
                    file_name: backing.field("fileName")?.as_str()?.to_string(),
                    uuid: backing.field("uuid").and_then(VimValue::as_str).map(str::to_string),
                })
            })
            .collect()
    }

    pub fn page83_id(&self) -> Option<DiskPage83Id> {
        self.uuid.as_deref().map(DiskPage83Id::from_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parse_forms() {
        assert_eq!(Endpoint::parse("vc.lab:8443").unwrap(), Endpoint::new("vc.lab", 8443));
        assert_eq!(Endpoint::parse("vc.lab").unwrap(), Endpoint::new("vc.lab", 443));
        assert_eq!(Endpoint::parse("[::1]:9443").unwrap(), Endpoint::new("::1", 9443));
        assert_eq!(Endpoint::parse("fe80::1").unwrap(), Endpoint::new("fe80::1", 443));
        assert!(Endpoint::parse(":443").is_err());
        assert!(Endpoint::parse("vc.lab:notaport").is_err());
    }

    #[test]
    fn sdk_url_brackets_ipv6() {
        let url = Endpoint::new("::1", 443).sdk_url().unwrap();
        assert_eq!(url.as_str(), "https://[::1]/sdk");
        let url = Endpoint::new("vc.lab", 8443).sdk_url().unwrap();
        assert_eq!(url.as_str(), "https://vc.lab:8443/sdk");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let dbg = format!("{:?}", Credentials::new("admin", "s3cret"));
        assert!(dbg.contains("admin"));
        assert!(!dbg.contains("s3cret"));
    }

    #[test]
    fn reference_parsing() {
        let r = ManagedObjectReference::parse("VirtualMachine:vm-42").unwrap();
        assert_eq!(r, ManagedObjectReference::new("VirtualMachine", "vm-42"));
        assert_eq!(r.to_string(), "VirtualMachine:vm-42");
        assert!(ManagedObjectReference::parse("Datacenter:").is_err());
        assert!(ManagedObjectReference::parse("datacenter:dc-1").is_err());
        assert!(ManagedObjectReference::looks_like_reference("Datacenter:datacenter-2"));
        assert!(!ManagedObjectReference::looks_like_reference("/dc1/vm/worker-1"));
        assert!(!ManagedObjectReference::looks_like_reference("dc1"));
    }

    #[test]
    fn datastore_path_parsing() {
        let p = DatastorePath::parse("[LocalDS_0] vm0/disk1.vmdk").unwrap();
        assert_eq!(p.datastore, "LocalDS_0");
        assert_eq!(p.path, "vm0/disk1.vmdk");
        assert_eq!(p.to_string(), "[LocalDS_0] vm0/disk1.vmdk");
        assert_eq!(DatastorePath::parse("[ds]").unwrap().path, "");

        let err = DatastorePath::parse("enoent").unwrap_err();
        assert_eq!(err.kind, crate::error::VclibErrorKind::InvalidDiskPath);
        assert!(DatastorePath::parse("[ds vm.vmdk").is_err());
        assert!(DatastorePath::parse("[] vm.vmdk").is_err());
    }

    #[test]
    fn page83_normalisation_matches_both_forms() {
        let from_vdm = DiskPage83Id::from_uuid("60 00 C2 9a 3b 1f 2e 4d-8c 9d 0e 1f 2a 3b 4c 5d");
        let from_backing = DiskPage83Id::from_uuid("6000C29a-3b1f-2e4d-8c9d-0e1f2a3b4c5d");
        assert_eq!(from_vdm, from_backing);
        assert_eq!(from_vdm.as_str(), "6000c29a3b1f2e4d8c9d0e1f2a3b4c5d");
    }

    #[test]
    fn virtual_disks_from_device_array() {
        let devices = VimValue::object(
            "ArrayOfVirtualDevice",
            vec![
                ("VirtualDevice", VimValue::object("VirtualIDEController", vec![("key", VimValue::text("200"))])),
                (
                    "VirtualDevice",
                    VimValue::object(
                        "VirtualDisk",
                        vec![
                            ("key", VimValue::text("2000")),
                            (
                                "backing",
                                VimValue::object(
                                    "VirtualDiskFlatVer2BackingInfo",
                                    vec![
                                        ("fileName", VimValue::text("[ds] vm/disk1.vmdk")),
                                        ("uuid", VimValue::text("6000C29a-0000-0000-0000-000000000001")),
                                    ],
                                ),
                            ),
                        ],
                    ),
                ),
            ],
        );
        let disks = VirtualDiskDevice::from_devices(&devices);
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].key, Some(2000));
        assert_eq!(disks[0].file_name, "[ds] vm/disk1.vmdk");
        assert_eq!(
            disks[0].page83_id().unwrap().as_str(),
            "6000c29a000000000000000000000001"
        );
    }

    #[test]
    fn value_lookup_follows_dotted_paths() {
        let v = VimValue::object(
            "VirtualMachineSummary",
            vec![("config", VimValue::object("VirtualMachineConfigSummary", vec![("uuid", VimValue::text("abc"))]))],
        );
        assert_eq!(v.lookup("config.uuid").and_then(VimValue::as_str), Some("abc"));
        assert!(v.lookup("config.missing").is_none());
    }
}
