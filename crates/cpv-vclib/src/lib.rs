//! # cpv-vclib – vCenter trust & inventory layer
//!
//! Trusted vim25 sessions to a vCenter endpoint, inventory resolution by
//! path or managed-object reference, and disk attachment checks for the
//! vSphere cloud provider.
//!
//! ## Modules
//!
//! - **types** — Connection inputs, inventory handles, property values
//! - **error** — Crate-specific error types
//! - **config** — YAML-backed vCenter connection settings
//! - **fingerprint** — SHA-256 certificate thumbprints
//! - **trust** — rustls verifier for CA bundle / pinned thumbprint / system roots
//! - **xml** — Minimal XML element tree over quick-xml
//! - **vim** — The vim25 RPC seam
//! - **soap** — vim25 SOAP client over reqwest
//! - **connection** — Trust negotiation + login, `Session`
//! - **inventory** — Datacenter / VM / datastore / folder resolution
//! - **disk** — Page83 lookups and attachment checks
//! - **simulator** — In-memory vCenter implementing the RPC seam

pub mod types;
pub mod error;
pub mod config;
pub mod fingerprint;
pub mod trust;
pub mod xml;
pub mod vim;
pub mod soap;
pub mod connection;
pub mod inventory;
pub mod disk;
pub mod simulator;

pub use config::VcenterConfig;
pub use connection::{ConnectionManager, Session};
pub use disk::{AttachmentMap, DiskAttachmentChecker};
pub use error::{VclibError, VclibErrorKind, VclibResult};
pub use fingerprint::Fingerprint;
pub use inventory::InventoryResolver;
pub use types::{
    CaBundle, Credentials, Datacenter, Datastore, DatastorePath, DiskPage83Id, Endpoint, Folder,
    ManagedObjectReference, TrustAnchor, VirtualMachine,
};
pub use vim::VimClient;
