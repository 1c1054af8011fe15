//! Which candidate disks are attached to which node VMs.

use crate::connection::Session;
use crate::error::{VclibError, VclibResult};
use crate::inventory::{InventoryResolver, NAME_PROPERTY, VM_DEVICES_PROPERTY};
use crate::types::{
    Datacenter, DatastorePath, DiskPage83Id, ManagedObjectReference, ObjectContent, VirtualDiskDevice,
    VirtualMachine,
};

use futures::future::join_all;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// node name → (candidate disk path → attached)
pub type AttachmentMap = HashMap<String, HashMap<String, bool>>;

/// Disks currently attached to one VM.
#[derive(Debug, Default)]
struct AttachedDisks {
    files: HashSet<String>,
    ids: HashSet<DiskPage83Id>,
}

impl AttachedDisks {
    fn from_devices(devices: &[VirtualDiskDevice]) -> Self {
        let mut attached = Self::default();
        for disk in devices {
            // normalise "[ds]  path" spacing so it compares equal to parsed candidates
            match DatastorePath::parse(&disk.file_name) {
                Ok(p) => attached.files.insert(p.to_string()),
                Err(_) => attached.files.insert(disk.file_name.clone()),
            };
            if let Some(id) = disk.page83_id() {
                attached.ids.insert(id);
            }
        }
        attached
    }
}

/// Attachment checks over a borrowed session.
pub struct DiskAttachmentChecker<'a> {
    session: &'a Session,
}

impl<'a> DiskAttachmentChecker<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// SCSI page 83 identifier of the disk at `disk_path` (`[ds] dir/disk.vmdk`).
    pub async fn virtual_disk_page83_data(&self, dc: &Datacenter, disk_path: &str) -> VclibResult<DiskPage83Id> {
        let parsed = DatastorePath::parse(disk_path)?;
        let raw = self
            .session
            .client()
            .query_virtual_disk_uuid(&dc.reference, &parsed.to_string())
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    VclibError::not_found(format!("virtual disk '{disk_path}' not found"))
                } else {
                    e
                }
            })?;
        Ok(DiskPage83Id::from_uuid(&raw))
    }

    /// For each node VM in `dc`, report which of its candidate disk paths are
    /// attached. Every node and every candidate appears in the result.
    ///
    /// Nodes whose VM no longer exists, and candidates that are malformed or
    /// do not exist, report `false`. Any other failure aborts the call.
    pub async fn check_disks_attached(
        &self,
        dc: &Datacenter,
        node_volumes: &HashMap<String, Vec<String>>,
    ) -> VclibResult<AttachmentMap> {
        let resolver = InventoryResolver::new(self.session);
        let mut result: AttachmentMap = node_volumes
            .iter()
            .map(|(node, volumes)| (node.clone(), volumes.iter().map(|v| (v.clone(), false)).collect()))
            .collect();

        let names: Vec<&str> = node_volumes.keys().map(String::as_str).collect();
        let resolved = resolver.vms_by_paths(dc, &names).await?;
        let mut nodes: Vec<(&str, VirtualMachine)> = Vec::with_capacity(names.len());
        for (node, vm) in names.into_iter().zip(resolved) {
            match vm {
                Some(vm) => nodes.push((node, vm)),
                None => warn!("Node VM {node} not found in {}; reporting its disks as detached", dc.path),
            }
        }
        if nodes.is_empty() {
            return Ok(result);
        }

        let vms: Vec<VirtualMachine> = nodes.iter().map(|(_, vm)| vm.clone()).collect();
        let contents = self.node_devices(&resolver, &vms).await?;
        let attached: HashMap<ManagedObjectReference, AttachedDisks> = contents
            .iter()
            .map(|c| {
                let devices = c
                    .get(VM_DEVICES_PROPERTY)
                    .map(VirtualDiskDevice::from_devices)
                    .unwrap_or_default();
                (c.obj.clone(), AttachedDisks::from_devices(&devices))
            })
            .collect();

        // Candidates that did not match a backing file name by path need a
        // page83 lookup: the same disk can be reachable under another path.
        let mut pending: Vec<(&str, &str)> = Vec::new();
        for (node, vm) in &nodes {
            let Some(disks) = attached.get(&vm.reference) else {
                warn!("No device list returned for node VM {node}");
                continue;
            };
            let Some(volumes) = node_volumes.get(*node) else { continue };
            let entry = result.entry(node.to_string()).or_default();

            for volume in volumes {
                let parsed = match DatastorePath::parse(volume) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("{e}; treating as detached from {node}");
                        continue;
                    }
                };
                if disks.files.contains(&parsed.to_string()) {
                    entry.insert(volume.clone(), true);
                } else if !disks.ids.is_empty() {
                    pending.push((*node, volume.as_str()));
                }
            }
        }
        if pending.is_empty() {
            return Ok(result);
        }

        let mut unique: Vec<&str> = pending.iter().map(|(_, v)| *v).collect();
        unique.sort_unstable();
        unique.dedup();
        debug!("Resolving page83 ids of {} candidate disk(s)", unique.len());

        let lookups = join_all(unique.iter().map(|path| self.virtual_disk_page83_data(dc, path))).await;
        let mut ids: HashMap<&str, DiskPage83Id> = HashMap::with_capacity(unique.len());
        for (path, lookup) in unique.iter().zip(lookups) {
            match lookup {
                Ok(id) => {
                    ids.insert(*path, id);
                }
                Err(e) if e.is_not_found() => warn!("Candidate disk {path} does not exist: {e}"),
                Err(e) => return Err(e),
            }
        }

        for (node, volume) in pending {
            let Some(id) = ids.get(volume) else { continue };
            let is_attached = nodes
                .iter()
                .find(|(n, _)| *n == node)
                .and_then(|(_, vm)| attached.get(&vm.reference))
                .is_some_and(|disks| disks.ids.contains(id));
            if is_attached {
                if let Some(entry) = result.get_mut(node) {
                    entry.insert(volume.to_string(), true);
                }
            }
        }

        Ok(result)
    }

    /// Device lists of `vms` in one round trip. A VM removed since it was
    /// resolved fails the whole fetch; in that case each VM is fetched on
    /// its own and the vanished ones are left out.
    async fn node_devices(
        &self,
        resolver: &InventoryResolver<'_>,
        vms: &[VirtualMachine],
    ) -> VclibResult<Vec<ObjectContent>> {
        const PROPERTIES: [&str; 2] = [NAME_PROPERTY, VM_DEVICES_PROPERTY];

        match resolver.vm_properties(vms, &PROPERTIES).await {
            Err(e) if e.is_not_found() && vms.len() > 1 => {
                warn!("{e}; fetching device lists of {} node VM(s) one by one", vms.len());
            }
            Err(e) if e.is_not_found() => {
                warn!("{e}; reporting its disks as detached");
                return Ok(Vec::new());
            }
            other => return other,
        }

        let fetches = join_all(
            vms.iter()
                .map(|vm| resolver.vm_properties(std::slice::from_ref(vm), &PROPERTIES)),
        )
        .await;
        let mut contents = Vec::with_capacity(vms.len());
        for (vm, fetched) in vms.iter().zip(fetches) {
            match fetched {
                Ok(c) => contents.extend(c),
                Err(e) if e.is_not_found() => warn!("Node VM {} vanished: {e}", vm.reference),
                Err(e) => return Err(e),
            }
        }
        Ok(contents)
    }
}
