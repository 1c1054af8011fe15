//! Inventory resolution: datacenters, folders, VMs and datastores by
//! inventory path or by managed-object reference.
//!
//! Paths and references are resolved by separate code paths. An identifier
//! shaped like `Kind:id` is always treated as a reference; anything else is
//! an inventory path. Both produce identical handles for the same object.

use crate::connection::Session;
use crate::error::{VclibError, VclibResult};
use crate::types::*;
use crate::vim::VimClient;

use log::debug;
use std::collections::HashMap;

/// Property holding a datastore's `DatastoreInfo`.
pub const DATASTORE_INFO_PROPERTY: &str = "info";
/// Property holding a VM's device list.
pub const VM_DEVICES_PROPERTY: &str = "config.hardware.device";
pub const NAME_PROPERTY: &str = "name";
pub const PARENT_PROPERTY: &str = "parent";

const VM_FOLDER: &str = "vm";
const DATASTORE_FOLDER: &str = "datastore";

/// Inventory lookups over a borrowed session.
pub struct InventoryResolver<'a> {
    session: &'a Session,
}

impl<'a> InventoryResolver<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn client(&self) -> &dyn VimClient {
        self.session.client()
    }

    // ── Datacenters ─────────────────────────────────────────────────

    /// Resolve a datacenter by path (`dc1`, `/folder/dc1`) or reference
    /// (`Datacenter:datacenter-2`).
    pub async fn datacenter(&self, path_or_reference: &str) -> VclibResult<Datacenter> {
        let id = non_empty(path_or_reference, "datacenter")?;
        if ManagedObjectReference::looks_like_reference(id) {
            let (reference, path) = self.resolve_reference(id, DATACENTER_TYPE).await?;
            return Ok(Datacenter { reference, path });
        }

        let path = absolute_path(id);
        let reference = self.find_path(&path, DATACENTER_TYPE, "datacenter").await?;
        Ok(Datacenter { reference, path })
    }

    /// Resolve every datacenter in `ids`, failing on the first error.
    pub async fn datacenters(&self, ids: &[String]) -> VclibResult<Vec<Datacenter>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.datacenter(id).await?);
        }
        Ok(out)
    }

    // ── Virtual machines ────────────────────────────────────────────

    /// Find the VM owning a BIOS UUID in `dc`. Returns the `VmNotFound`
    /// sentinel when no VM does.
    pub async fn vm_by_uuid(&self, dc: &Datacenter, uuid: &str) -> VclibResult<VirtualMachine> {
        let uuid = non_empty(uuid, "VM UUID")?.to_lowercase();
        match self.client().find_by_uuid(&dc.reference, &uuid, true).await? {
            Some(reference) if reference.is_type(VIRTUAL_MACHINE_TYPE) => {
                Ok(VirtualMachine { reference, path: None })
            }
            _ => {
                debug!("No VM with UUID {uuid} in {}", dc.path);
                Err(VclibError::no_vm_found())
            }
        }
    }

    /// Find a VM by inventory path. A bare name is looked up in the
    /// datacenter's `vm` folder.
    pub async fn vm_by_path(&self, dc: &Datacenter, path: &str) -> VclibResult<VirtualMachine> {
        let path = scoped_path(dc, non_empty(path, "VM path")?, VM_FOLDER);
        let reference = self.find_path(&path, VIRTUAL_MACHINE_TYPE, "virtual machine").await?;
        Ok(VirtualMachine { reference, path: Some(path) })
    }

    /// Resolve many VM paths, as accepted by [`Self::vm_by_path`], from a
    /// single listing of the datacenter's VM folder tree. Results are in
    /// input order, `None` where no VM lives at the path.
    pub async fn vms_by_paths(&self, dc: &Datacenter, paths: &[&str]) -> VclibResult<Vec<Option<VirtualMachine>>> {
        let wanted = paths
            .iter()
            .map(|p| Ok(scoped_path(dc, non_empty(p, "VM path")?, VM_FOLDER)))
            .collect::<VclibResult<Vec<_>>>()?;
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let tree = self
            .client()
            .retrieve_vm_folder_tree(&dc.reference, &[NAME_PROPERTY, PARENT_PROPERTY])
            .await?;
        let vms = vm_paths(dc, &tree);
        debug!("Listed {} VM(s) below {}/{VM_FOLDER}", vms.len(), dc.path);

        Ok(wanted
            .into_iter()
            .map(|path| {
                vms.get(&path)
                    .map(|reference| VirtualMachine { reference: reference.clone(), path: Some(path) })
            })
            .collect())
    }

    pub async fn vm_by_reference(&self, reference: &str) -> VclibResult<VirtualMachine> {
        let (reference, path) = self.resolve_reference(reference, VIRTUAL_MACHINE_TYPE).await?;
        Ok(VirtualMachine { reference, path: Some(path) })
    }

    /// Fetch `properties` for all `vms` in one round trip.
    pub async fn vm_properties(
        &self,
        vms: &[VirtualMachine],
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        let refs: Vec<_> = vms.iter().map(|vm| vm.reference.clone()).collect();
        self.bulk_properties(VIRTUAL_MACHINE_TYPE, &refs, properties).await
    }

    // ── Datastores ──────────────────────────────────────────────────

    /// Find the datastore holding a `[datastore] relative/path` file.
    pub async fn datastore_by_path(&self, dc: &Datacenter, disk_path: &str) -> VclibResult<Datastore> {
        let parsed = DatastorePath::parse(disk_path)?;
        self.datastore_by_name(dc, &parsed.datastore).await
    }

    pub async fn datastore_by_name(&self, dc: &Datacenter, name: &str) -> VclibResult<Datastore> {
        let name = non_empty(name, "datastore name")?;
        let path = dc.child_path(DATASTORE_FOLDER, &escape_segment(name));
        let reference = self.find_path(&path, DATASTORE_TYPE, "datastore").await?;
        Ok(Datastore { reference, name: name.to_string(), path })
    }

    pub async fn datastore_by_reference(&self, reference: &str) -> VclibResult<Datastore> {
        let (reference, path) = self.resolve_reference(reference, DATASTORE_TYPE).await?;
        let name = unescape_segment(last_segment(&path));
        Ok(Datastore { reference, name, path })
    }

    /// Fetch `properties` for all `datastores` in one round trip.
    pub async fn datastore_properties(
        &self,
        datastores: &[Datastore],
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        let refs: Vec<_> = datastores.iter().map(|ds| ds.reference.clone()).collect();
        self.bulk_properties(DATASTORE_TYPE, &refs, properties).await
    }

    // ── Folders ─────────────────────────────────────────────────────

    /// Find a folder by inventory path. A bare name is looked up directly
    /// under the datacenter.
    pub async fn folder_by_path(&self, dc: &Datacenter, path: &str) -> VclibResult<Folder> {
        let id = non_empty(path, "folder path")?;
        let path = if id.contains('/') {
            absolute_path(id)
        } else {
            format!("{}/{}", dc.path.trim_end_matches('/'), escape_segment(id))
        };
        let reference = self.find_path(&path, FOLDER_TYPE, "folder").await?;
        Ok(Folder { reference, path })
    }

    pub async fn folder_by_reference(&self, reference: &str) -> VclibResult<Folder> {
        let (reference, path) = self.resolve_reference(reference, FOLDER_TYPE).await?;
        Ok(Folder { reference, path })
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn find_path(&self, path: &str, type_name: &str, label: &str) -> VclibResult<ManagedObjectReference> {
        match self.client().find_by_inventory_path(path).await? {
            Some(r) if r.is_type(type_name) => Ok(r),
            Some(r) => Err(VclibError::not_found(format!(
                "{label} '{path}' not found ({r} is not a {type_name})"
            ))),
            None => Err(VclibError::not_found(format!("{label} '{path}' not found"))),
        }
    }

    /// Parse and verify a `Kind:id` reference; returns it with its inventory path.
    async fn resolve_reference(
        &self,
        id: &str,
        type_name: &str,
    ) -> VclibResult<(ManagedObjectReference, String)> {
        let reference = ManagedObjectReference::parse(id)?;
        if !reference.is_type(type_name) {
            return Err(VclibError::not_found(format!(
                "{type_name} '{id}' not found (reference is of kind {})",
                reference.type_name
            )));
        }
        let path = self.inventory_path(&reference).await?;
        Ok((reference, path))
    }

    /// Walk `parent` links up to (excluding) the root folder.
    async fn inventory_path(&self, reference: &ManagedObjectReference) -> VclibResult<String> {
        let mut segments = Vec::new();
        let mut current = Some(reference.clone());
        let mut first = true;

        while let Some(obj) = current.take() {
            let content = self
                .client()
                .retrieve_properties(std::slice::from_ref(&obj), &[NAME_PROPERTY, PARENT_PROPERTY])
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        VclibError::not_found(format!("{obj} not found"))
                    } else {
                        e
                    }
                })?
                .into_iter()
                .next()
                .ok_or_else(|| VclibError::not_found(format!("{obj} not found")))?;

            let parent = content.get(PARENT_PROPERTY).and_then(VimValue::as_reference).cloned();
            // the root folder has no parent and is not part of inventory paths
            if parent.is_none() && !first {
                break;
            }
            let name = content
                .name()
                .ok_or_else(|| VclibError::parse(format!("{obj} has no name")))?;
            segments.push(escape_segment(name));
            current = parent;
            first = false;
        }

        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    async fn bulk_properties(
        &self,
        type_label: &str,
        refs: &[ManagedObjectReference],
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        if refs.is_empty() {
            return Err(VclibError::empty_object_list(type_label));
        }
        debug!("Fetching {:?} for {} {type_label} object(s)", properties, refs.len());
        self.client().retrieve_properties(refs, properties).await
    }
}

/// Inventory path of every VM in a VM folder tree listing, rebuilt from
/// `name` and `parent`. VMs whose chain does not lead back to `dc` are left out.
fn vm_paths(dc: &Datacenter, tree: &[ObjectContent]) -> HashMap<String, ManagedObjectReference> {
    let nodes: HashMap<&ManagedObjectReference, (&str, Option<&ManagedObjectReference>)> = tree
        .iter()
        .filter_map(|c| Some((&c.obj, (c.name()?, c.get(PARENT_PROPERTY).and_then(VimValue::as_reference)))))
        .collect();

    let path_of = |vm: &ManagedObjectReference| -> Option<String> {
        let mut segments = Vec::new();
        let mut current = vm;
        while current != &dc.reference {
            let (name, parent) = nodes.get(current)?;
            segments.push(escape_segment(name));
            if segments.len() > nodes.len() {
                return None;
            }
            current = (*parent)?;
        }
        segments.reverse();
        Some(format!("{}/{}", dc.path.trim_end_matches('/'), segments.join("/")))
    };

    nodes
        .keys()
        .filter(|r| r.is_type(VIRTUAL_MACHINE_TYPE))
        .filter_map(|vm| Some((path_of(vm)?, (*vm).clone())))
        .collect()
}

fn non_empty<'s>(s: &'s str, what: &str) -> VclibResult<&'s str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(VclibError::invalid_identifier(format!("Empty {what}")));
    }
    Ok(trimmed)
}

/// `a/b/` → `/a/b`.
fn absolute_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Paths containing `/` are absolute; bare names live in `dc/<folder>`.
fn scoped_path(dc: &Datacenter, id: &str, folder: &str) -> String {
    if id.contains('/') {
        absolute_path(id)
    } else {
        dc.child_path(folder, &escape_segment(id))
    }
}

/// Inventory paths escape `/` and `%` inside object names.
pub fn escape_segment(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2f")
}

pub fn unescape_segment(segment: &str) -> String {
    segment.replace("%2f", "/").replace("%2F", "/").replace("%25", "%")
}
