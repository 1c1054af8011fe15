//! An in-memory vCenter for tests and offline development.
//!
//! [`Simulator::new`] builds a small inventory modelled on a single-host
//! VPX setup:
//!
//! ```text
//! /                                   Folder        (root, not part of paths)
//! /DC0                                Datacenter
//! /DC0/vm/DC0_H0_VM0 .. DC0_C0_RP0_VM1 VirtualMachine (one disk each)
//! /DC0/datastore/LocalDS_0            Datastore
//! /DC0/host                           Folder
//! ```
//!
//! Every VM has `[LocalDS_0] <vm>/disk1.vmdk` attached. The builder methods
//! extend or alter the model before [`Simulator::session`] hands it out.

use crate::connection::Session;
use crate::error::{VclibError, VclibResult};
use crate::inventory::escape_segment;
use crate::types::*;
use crate::vim::VimClient;

use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const SIM_DATACENTER: &str = "DC0";
pub const SIM_DATASTORE: &str = "LocalDS_0";
pub const SIM_VMS: [&str; 4] = ["DC0_H0_VM0", "DC0_H0_VM1", "DC0_C0_RP0_VM0", "DC0_C0_RP0_VM1"];
pub const SIM_USERNAME: &str = "user";

const DEVICES_PROPERTY: &str = "config.hardware.device";

/// References to a simulated datacenter and its default folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDatacenter {
    pub reference: ManagedObjectReference,
    pub vm_folder: ManagedObjectReference,
    pub datastore_folder: ManagedObjectReference,
    pub host_folder: ManagedObjectReference,
}

#[derive(Debug, Clone)]
struct SimObject {
    name: String,
    parent: Option<ManagedObjectReference>,
    properties: BTreeMap<String, VimValue>,
    /// Attached disk paths, VMs only.
    disks: Vec<String>,
}

/// In-memory [`VimClient`].
#[derive(Debug)]
pub struct Simulator {
    objects: BTreeMap<ManagedObjectReference, SimObject>,
    root: ManagedObjectReference,
    default_datacenter: Option<SimDatacenter>,
    /// normalised `[ds] path` → page83 id
    disks: BTreeMap<String, DiskPage83Id>,
    /// method name → fault type raised by every call to it
    faults: HashMap<String, String>,
    next_id: u64,
    logged_out: AtomicBool,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// The default single-datacenter model.
    pub fn new() -> Self {
        let mut sim = Self::empty();
        let dc = sim.add_datacenter(SIM_DATACENTER);
        sim.add_datastore(&dc.datastore_folder, SIM_DATASTORE);
        for name in SIM_VMS {
            let vm = sim.add_vm(&dc.vm_folder, name);
            sim.attach_disk(&vm, &format!("[{SIM_DATASTORE}] {name}/disk1.vmdk"));
        }
        sim.default_datacenter = Some(dc);
        sim
    }

    /// Only the root folder.
    pub fn empty() -> Self {
        let root = ManagedObjectReference::new(FOLDER_TYPE, "group-d1");
        let mut objects = BTreeMap::new();
        objects.insert(
            root.clone(),
            SimObject {
                name: "Datacenters".into(),
                parent: None,
                properties: BTreeMap::new(),
                disks: Vec::new(),
            },
        );
        Self {
            objects,
            root,
            default_datacenter: None,
            disks: BTreeMap::new(),
            faults: HashMap::new(),
            next_id: 1,
            logged_out: AtomicBool::new(false),
        }
    }

    /// `DC0` and its folders, when built by [`Simulator::new`].
    pub fn default_datacenter(&self) -> Option<&SimDatacenter> {
        self.default_datacenter.as_ref()
    }

    pub fn root_folder(&self) -> &ManagedObjectReference {
        &self.root
    }

    // ── Builders ────────────────────────────────────────────────────

    pub fn add_datacenter(&mut self, name: &str) -> SimDatacenter {
        let root = self.root.clone();
        let reference = self.insert(DATACENTER_TYPE, "datacenter-", name, &root, BTreeMap::new());
        let vm_folder = self.add_folder(&reference, "vm");
        let host_folder = self.add_folder(&reference, "host");
        let datastore_folder = self.add_folder(&reference, "datastore");

        if let Some(dc) = self.objects.get_mut(&reference) {
            dc.properties.insert("vmFolder".into(), VimValue::Reference(vm_folder.clone()));
            dc.properties.insert("hostFolder".into(), VimValue::Reference(host_folder.clone()));
            dc.properties
                .insert("datastoreFolder".into(), VimValue::Reference(datastore_folder.clone()));
        }
        SimDatacenter { reference, vm_folder, datastore_folder, host_folder }
    }

    pub fn add_folder(&mut self, parent: &ManagedObjectReference, name: &str) -> ManagedObjectReference {
        self.insert(FOLDER_TYPE, "group-", name, parent, BTreeMap::new())
    }

    pub fn add_datastore(&mut self, folder: &ManagedObjectReference, name: &str) -> ManagedObjectReference {
        let url = format!("ds:///vmfs/volumes/{name}/");
        let mut properties = BTreeMap::new();
        properties.insert(
            "info".to_string(),
            VimValue::object(
                "LocalDatastoreInfo",
                vec![
                    ("name", VimValue::text(name)),
                    ("url", VimValue::text(url.clone())),
                    ("freeSpace", VimValue::text("107374182400")),
                    ("maxFileSize", VimValue::text("70368744177664")),
                    ("path", VimValue::text(format!("/vmfs/volumes/{name}"))),
                ],
            ),
        );
        let reference = self.insert(DATASTORE_TYPE, "datastore-", name, folder, properties);
        if let Some(ds) = self.objects.get_mut(&reference) {
            ds.properties.insert(
                "summary".into(),
                VimValue::object(
                    "DatastoreSummary",
                    vec![
                        ("datastore", VimValue::Reference(reference.clone())),
                        ("name", VimValue::text(name)),
                        ("url", VimValue::text(url)),
                        ("capacity", VimValue::text("214748364800")),
                        ("freeSpace", VimValue::text("107374182400")),
                        ("accessible", VimValue::text("true")),
                        ("type", VimValue::text("VMFS")),
                    ],
                ),
            );
        }
        reference
    }

    /// Add a powered-on VM without disks.
    pub fn add_vm(&mut self, folder: &ManagedObjectReference, name: &str) -> ManagedObjectReference {
        let n = self.next_id;
        let uuid = format!("4216{n:04x}-1c2d-4e5f-8a9b-{n:012x}");
        let mut properties = BTreeMap::new();
        properties.insert("config.uuid".to_string(), VimValue::text(uuid.clone()));
        properties.insert("runtime.powerState".to_string(), VimValue::text("poweredOn"));
        properties.insert(
            "summary".to_string(),
            VimValue::object(
                "VirtualMachineSummary",
                vec![
                    (
                        "config",
                        VimValue::object(
                            "VirtualMachineConfigSummary",
                            vec![
                                ("name", VimValue::text(name)),
                                ("uuid", VimValue::text(uuid)),
                                ("vmPathName", VimValue::text(format!("[{SIM_DATASTORE}] {name}/{name}.vmx"))),
                            ],
                        ),
                    ),
                    (
                        "runtime",
                        VimValue::object(
                            "VirtualMachineRuntimeInfo",
                            vec![("powerState", VimValue::text("poweredOn"))],
                        ),
                    ),
                ],
            ),
        );
        self.insert(VIRTUAL_MACHINE_TYPE, "vm-", name, folder, properties)
    }

    /// Create a detached disk at `path` (no-op if one exists) and return its id.
    pub fn create_disk(&mut self, path: &str) -> DiskPage83Id {
        let key = normalise_disk_path(path);
        if let Some(id) = self.disks.get(&key) {
            return id.clone();
        }
        let n = self.next_id;
        self.next_id += 1;
        let id = DiskPage83Id::from_uuid(&format!("6000c29{n:025x}"));
        self.disks.insert(key, id.clone());
        id
    }

    /// Make `link` a second path to the disk at `target` (a symlinked
    /// directory or renamed datastore). `None` if `target` does not exist.
    pub fn link_disk(&mut self, target: &str, link: &str) -> Option<DiskPage83Id> {
        let id = self.disks.get(&normalise_disk_path(target))?.clone();
        self.disks.insert(normalise_disk_path(link), id.clone());
        Some(id)
    }

    /// Attach the disk at `path` to `vm`, creating it first if needed.
    pub fn attach_disk(&mut self, vm: &ManagedObjectReference, path: &str) -> DiskPage83Id {
        let id = self.create_disk(path);
        if let Some(obj) = self.objects.get_mut(vm) {
            obj.disks.push(path.to_string());
        }
        id
    }

    /// Remove an object (and anything below it) from the inventory.
    pub fn remove(&mut self, reference: &ManagedObjectReference) {
        let doomed: Vec<_> = self
            .objects
            .keys()
            .filter(|r| self.ancestors(r).any(|a| &a == reference))
            .cloned()
            .collect();
        for r in doomed {
            self.objects.remove(&r);
        }
        self.objects.remove(reference);
    }

    /// Make every call to `method` (e.g. `QueryVirtualDiskUuid`) fail with `fault_type`.
    pub fn inject_fault(&mut self, method: &str, fault_type: &str) {
        self.faults.insert(method.to_string(), fault_type.to_string());
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Synchronous FindByInventoryPath.
    pub fn find(&self, path: &str) -> Option<ManagedObjectReference> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self.root.clone(), |current, segment| {
                self.objects
                    .iter()
                    .find(|(_, o)| o.parent.as_ref() == Some(&current) && escape_segment(&o.name) == segment)
                    .map(|(r, _)| r.clone())
            })
    }

    pub fn vm_uuid(&self, vm: &ManagedObjectReference) -> Option<&str> {
        self.objects.get(vm)?.properties.get("config.uuid")?.as_str()
    }

    pub fn disk_id(&self, path: &str) -> Option<&DiskPage83Id> {
        self.disks.get(&normalise_disk_path(path))
    }

    /// Hand the model out as a logged-in session.
    pub fn session(self) -> Session {
        let about = AboutInfo {
            full_name: "VMware vCenter Server 7.0.3 build-0 (simulator)".into(),
            api_type: "VirtualCenter".into(),
            api_version: "7.0.3.0".into(),
            instance_uuid: Some("dbed6e0c-bd88-4ef6-b594-21283e1c677f".into()),
        };
        Session::from_client(Endpoint::new("127.0.0.1", 443), SIM_USERNAME, about, Arc::new(self))
    }

    // ── Internals ───────────────────────────────────────────────────

    fn insert(
        &mut self,
        type_name: &str,
        id_prefix: &str,
        name: &str,
        parent: &ManagedObjectReference,
        properties: BTreeMap<String, VimValue>,
    ) -> ManagedObjectReference {
        let reference = ManagedObjectReference::new(type_name, format!("{id_prefix}{}", self.next_id));
        self.next_id += 1;
        self.objects.insert(
            reference.clone(),
            SimObject {
                name: name.to_string(),
                parent: Some(parent.clone()),
                properties,
                disks: Vec::new(),
            },
        );
        reference
    }

    fn ancestors<'s>(&'s self, reference: &ManagedObjectReference) -> impl Iterator<Item = ManagedObjectReference> + 's {
        let mut current = self.objects.get(reference).and_then(|o| o.parent.clone());
        std::iter::from_fn(move || {
            let next = current.take()?;
            current = self.objects.get(&next).and_then(|o| o.parent.clone());
            Some(next)
        })
    }

    fn check(&self, method: &str) -> VclibResult<()> {
        if self.logged_out.load(Ordering::SeqCst) {
            return Err(VclibError::fault("NotAuthenticated", "The session is not authenticated"));
        }
        match self.faults.get(method) {
            Some(fault) => Err(VclibError::fault(fault, format!("injected into {method}"))),
            None => Ok(()),
        }
    }

    fn require_datacenter(&self, dc: &ManagedObjectReference) -> VclibResult<()> {
        match self.objects.get(dc) {
            Some(_) if dc.is_type(DATACENTER_TYPE) => Ok(()),
            _ => Err(VclibError::fault("ManagedObjectNotFound", dc.to_string())),
        }
    }

    fn property(&self, reference: &ManagedObjectReference, obj: &SimObject, property: &str) -> VclibResult<Option<VimValue>> {
        match property {
            "name" => Ok(Some(VimValue::text(obj.name.clone()))),
            "parent" => Ok(obj.parent.clone().map(VimValue::Reference)),
            DEVICES_PROPERTY if reference.is_type(VIRTUAL_MACHINE_TYPE) => Ok(Some(self.devices(obj))),
            other => obj
                .properties
                .get(other)
                .cloned()
                .map(Some)
                .ok_or_else(|| VclibError::fault("InvalidProperty", other)),
        }
    }

    fn devices(&self, vm: &SimObject) -> VimValue {
        let mut fields = vec![(
            "VirtualDevice".to_string(),
            VimValue::object(
                "VirtualLsiLogicController",
                vec![("key", VimValue::text("1000")), ("busNumber", VimValue::text("0"))],
            ),
        )];
        for (unit, path) in vm.disks.iter().enumerate() {
            let uuid = self
                .disks
                .get(&normalise_disk_path(path))
                .map(backing_uuid)
                .unwrap_or_default();
            fields.push((
                "VirtualDevice".to_string(),
                VimValue::object(
                    "VirtualDisk",
                    vec![
                        ("key", VimValue::text((2000 + unit).to_string())),
                        ("controllerKey", VimValue::text("1000")),
                        ("unitNumber", VimValue::text(unit.to_string())),
                        ("capacityInKB", VimValue::text("1048576")),
                        (
                            "backing",
                            VimValue::object(
                                "VirtualDiskFlatVer2BackingInfo",
                                vec![
                                    ("fileName", VimValue::text(path.clone())),
                                    ("diskMode", VimValue::text("persistent")),
                                    ("thinProvisioned", VimValue::text("true")),
                                    ("uuid", VimValue::text(uuid)),
                                ],
                            ),
                        ),
                    ],
                ),
            ));
        }
        VimValue::Object {
            type_name: Some("ArrayOfVirtualDevice".into()),
            fields,
        }
    }
}

#[async_trait]
impl VimClient for Simulator {
    async fn find_by_inventory_path(&self, path: &str) -> VclibResult<Option<ManagedObjectReference>> {
        self.check("FindByInventoryPath")?;
        Ok(self.find(path))
    }

    async fn find_by_uuid(
        &self,
        datacenter: &ManagedObjectReference,
        uuid: &str,
        vm_search: bool,
    ) -> VclibResult<Option<ManagedObjectReference>> {
        self.check("FindByUuid")?;
        self.require_datacenter(datacenter)?;
        if !vm_search {
            return Ok(None);
        }
        Ok(self
            .objects
            .iter()
            .filter(|(r, _)| r.is_type(VIRTUAL_MACHINE_TYPE))
            .filter(|(_, o)| {
                o.properties
                    .get("config.uuid")
                    .and_then(VimValue::as_str)
                    .is_some_and(|u| u.eq_ignore_ascii_case(uuid))
            })
            .find(|(r, _)| self.ancestors(r).any(|a| &a == datacenter))
            .map(|(r, _)| r.clone()))
    }

    async fn retrieve_properties(
        &self,
        objects: &[ManagedObjectReference],
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        self.check("RetrievePropertiesEx")?;
        let mut out = Vec::with_capacity(objects.len());
        for reference in objects {
            let obj = self
                .objects
                .get(reference)
                .ok_or_else(|| VclibError::fault("ManagedObjectNotFound", reference.to_string()))?;
            let mut content = ObjectContent::new(reference.clone());
            for property in properties {
                if let Some(value) = self.property(reference, obj, property)? {
                    content.properties.insert(property.to_string(), value);
                }
            }
            out.push(content);
        }
        debug!("simulator: {} object(s), properties {:?}", out.len(), properties);
        Ok(out)
    }

    async fn retrieve_vm_folder_tree(
        &self,
        datacenter: &ManagedObjectReference,
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        self.check("RetrievePropertiesEx")?;
        self.require_datacenter(datacenter)?;
        let Some(vm_folder) = self
            .objects
            .get(datacenter)
            .and_then(|dc| dc.properties.get("vmFolder"))
            .and_then(VimValue::as_reference)
        else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (reference, obj) in &self.objects {
            if !(reference.is_type(FOLDER_TYPE) || reference.is_type(VIRTUAL_MACHINE_TYPE)) {
                continue;
            }
            if reference != vm_folder && !self.ancestors(reference).any(|a| &a == vm_folder) {
                continue;
            }
            let mut content = ObjectContent::new(reference.clone());
            for property in properties {
                if let Some(value) = self.property(reference, obj, property)? {
                    content.properties.insert(property.to_string(), value);
                }
            }
            out.push(content);
        }
        debug!("simulator: {} object(s) below {vm_folder}", out.len());
        Ok(out)
    }

    async fn query_virtual_disk_uuid(
        &self,
        datacenter: &ManagedObjectReference,
        disk_path: &str,
    ) -> VclibResult<String> {
        self.check("QueryVirtualDiskUuid")?;
        self.require_datacenter(datacenter)?;
        if DatastorePath::parse(disk_path).is_err() {
            return Err(VclibError::fault("InvalidDatastorePath", disk_path));
        }
        self.disks
            .get(&normalise_disk_path(disk_path))
            .map(manager_uuid)
            .ok_or_else(|| VclibError::fault("FileNotFound", disk_path))
    }

    async fn logout(&self) -> VclibResult<()> {
        self.check("Logout")?;
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn normalise_disk_path(path: &str) -> String {
    DatastorePath::parse(path)
        .map(|p| p.to_string())
        .unwrap_or_else(|_| path.trim().to_string())
}

/// `6000C29A-0000-...` as found in device backings.
fn backing_uuid(id: &DiskPage83Id) -> String {
    let hex = id.as_str().to_ascii_uppercase();
    let mut out = String::with_capacity(36);
    for (i, c) in hex.chars().enumerate() {
        if matches!(i, 8 | 12 | 16 | 20) {
            out.push('-');
        }
        out.push(c);
    }
    out
}

/// `60 00 c2 9a ... 00-00 ...` as returned by QueryVirtualDiskUuid.
fn manager_uuid(id: &DiskPage83Id) -> String {
    let bytes: Vec<&str> = id
        .as_str()
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect();
    let (head, tail) = bytes.split_at(bytes.len().min(8));
    format!("{}-{}", head.join(" "), tail.join(" "))
}
