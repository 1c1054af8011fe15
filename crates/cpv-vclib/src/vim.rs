//! The vim25 round trips inventory resolution is built on.
//!
//! [`crate::soap::SoapClient`] implements this against a live vCenter;
//! [`crate::simulator::Simulator`] implements it in memory.

use crate::error::VclibResult;
use crate::types::{ManagedObjectReference, ObjectContent};

use async_trait::async_trait;

#[async_trait]
pub trait VimClient: Send + Sync {
    /// SearchIndex.FindByInventoryPath. `Ok(None)` when nothing lives at `path`.
    async fn find_by_inventory_path(&self, path: &str) -> VclibResult<Option<ManagedObjectReference>>;

    /// SearchIndex.FindByUuid, scoped to one datacenter.
    async fn find_by_uuid(
        &self,
        datacenter: &ManagedObjectReference,
        uuid: &str,
        vm_search: bool,
    ) -> VclibResult<Option<ManagedObjectReference>>;

    /// PropertyCollector.RetrievePropertiesEx for all `objects` in one request.
    /// Unknown property paths fail the whole call with `InvalidProperty`.
    async fn retrieve_properties(
        &self,
        objects: &[ManagedObjectReference],
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>>;

    /// PropertyCollector.RetrievePropertiesEx over a datacenter's VM folder
    /// tree: its `vmFolder` and every Folder and VirtualMachine reachable
    /// through `childEntity`, in one request.
    async fn retrieve_vm_folder_tree(
        &self,
        datacenter: &ManagedObjectReference,
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>>;

    /// VirtualDiskManager.QueryVirtualDiskUuid. `NotFound` when no disk exists at `disk_path`.
    async fn query_virtual_disk_uuid(
        &self,
        datacenter: &ManagedObjectReference,
        disk_path: &str,
    ) -> VclibResult<String>;

    /// SessionManager.Logout.
    async fn logout(&self) -> VclibResult<()>;
}
