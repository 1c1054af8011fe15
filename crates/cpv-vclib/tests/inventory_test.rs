//! Inventory resolution against the in-memory simulator.

use cpv_vclib::inventory::{DATASTORE_INFO_PROPERTY, NAME_PROPERTY};
use cpv_vclib::simulator::{Simulator, SIM_DATACENTER, SIM_DATASTORE, SIM_VMS};
use cpv_vclib::types::{DATACENTER_TYPE, FOLDER_TYPE};
use cpv_vclib::{InventoryResolver, Session, VclibErrorKind, VimClient};

const TEST_NAME_NOT_FOUND: &str = "enoent";

fn session() -> Session {
    Simulator::new().session()
}

#[tokio::test]
async fn datacenter_by_path_and_reference() {
    let session = session();
    let resolver = InventoryResolver::new(&session);

    let by_path = resolver.datacenter(SIM_DATACENTER).await.unwrap();
    assert_eq!(by_path.path, "/DC0");
    assert_eq!(by_path.name(), SIM_DATACENTER);
    assert!(by_path.reference.is_type(DATACENTER_TYPE));

    let by_ref = resolver
        .datacenter(&by_path.reference.to_string())
        .await
        .unwrap();
    assert_eq!(by_ref, by_path);

    let err = resolver.datacenter(TEST_NAME_NOT_FOUND).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
    assert!(err.message.contains(TEST_NAME_NOT_FOUND));
}

#[tokio::test]
async fn datacenter_reference_errors() {
    let session = session();
    let resolver = InventoryResolver::new(&session);

    let err = resolver.datacenter("datacenter:broken").await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::InvalidIdentifier);

    let err = resolver.datacenter("Datacenter:datacenter-999").await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);

    // well-formed reference of the wrong kind
    let err = resolver.datacenter("Folder:group-d1").await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);

    let err = resolver.datacenter("   ").await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::InvalidIdentifier);
}

#[tokio::test]
async fn datacenters_resolves_mixed_identifiers() {
    let session = session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter("/DC0").await.unwrap();

    let all = resolver
        .datacenters(&["DC0".to_string(), dc.reference.to_string()])
        .await
        .unwrap();
    assert_eq!(all, vec![dc.clone(), dc]);

    assert!(resolver
        .datacenters(&["DC0".to_string(), TEST_NAME_NOT_FOUND.to_string()])
        .await
        .is_err());
}

#[tokio::test]
async fn vm_by_uuid() {
    let mut sim = Simulator::new();
    let dc_ref = sim.default_datacenter().unwrap().reference.clone();
    let vm_ref = sim.find("/DC0/vm/DC0_H0_VM0").unwrap();
    let uuid = sim.vm_uuid(&vm_ref).unwrap().to_uppercase();
    // a second datacenter must not see DC0's VMs
    let other = sim.add_datacenter("DC1");
    let session = sim.session();
    let resolver = InventoryResolver::new(&session);

    let dc = resolver.datacenter("DC0").await.unwrap();
    assert_eq!(dc.reference, dc_ref);
    let vm = resolver.vm_by_uuid(&dc, &uuid).await.unwrap();
    assert_eq!(vm.reference, vm_ref);
    assert!(vm.path.is_none());

    // the handle is usable for a property fetch
    let props = resolver.vm_properties(&[vm], &[NAME_PROPERTY]).await.unwrap();
    assert_eq!(props[0].name(), Some("DC0_H0_VM0"));

    let err = resolver.vm_by_uuid(&dc, TEST_NAME_NOT_FOUND).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::VmNotFound);
    assert_eq!(err.message, "No VM found");
    assert!(err.is_not_found());

    let dc1 = resolver.datacenter(&other.reference.to_string()).await.unwrap();
    let err = resolver.vm_by_uuid(&dc1, &uuid).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::VmNotFound);
}

#[tokio::test]
async fn vm_by_path_and_reference_agree() {
    let session = session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();

    let by_name = resolver.vm_by_path(&dc, SIM_VMS[0]).await.unwrap();
    let by_path = resolver.vm_by_path(&dc, "/DC0/vm/DC0_H0_VM0").await.unwrap();
    assert_eq!(by_name, by_path);
    assert_eq!(by_path.path.as_deref(), Some("/DC0/vm/DC0_H0_VM0"));

    let by_ref = resolver
        .vm_by_reference(&by_path.reference.to_string())
        .await
        .unwrap();
    assert_eq!(by_ref, by_path);

    let err = resolver.vm_by_path(&dc, TEST_NAME_NOT_FOUND).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
    assert!(err.message.contains("/DC0/vm/enoent"));

    // a folder sitting at a VM path is the wrong kind
    let err = resolver.vm_by_path(&dc, "/DC0/vm").await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
    assert!(err.message.contains("/DC0/vm"));

    let err = resolver.vm_by_reference(&dc.reference.to_string()).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
}

#[tokio::test]
async fn vm_in_nested_folder() {
    let mut sim = Simulator::new();
    let vm_folder = sim.default_datacenter().unwrap().vm_folder.clone();
    let k8s = sim.add_folder(&vm_folder, "k8s");
    sim.add_vm(&k8s, "worker/1");
    let session = sim.session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();

    let vm = resolver.vm_by_path(&dc, "/DC0/vm/k8s/worker%2f1").await.unwrap();
    let by_ref = resolver.vm_by_reference(&vm.reference.to_string()).await.unwrap();
    assert_eq!(by_ref.path.as_deref(), Some("/DC0/vm/k8s/worker%2f1"));
}

#[tokio::test]
async fn vms_by_paths_matches_single_lookups() {
    let mut sim = Simulator::new();
    let vm_folder = sim.default_datacenter().unwrap().vm_folder.clone();
    let k8s = sim.add_folder(&vm_folder, "k8s");
    sim.add_vm(&k8s, "worker/1");
    let session = sim.session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();

    let paths = [SIM_VMS[0], "/DC0/vm/k8s/worker%2f1", TEST_NAME_NOT_FOUND, "DC0/vm/k8s"];
    let found = resolver.vms_by_paths(&dc, &paths).await.unwrap();
    assert_eq!(found.len(), paths.len());
    assert_eq!(found[0].as_ref(), Some(&resolver.vm_by_path(&dc, paths[0]).await.unwrap()));
    assert_eq!(found[1].as_ref(), Some(&resolver.vm_by_path(&dc, paths[1]).await.unwrap()));
    assert!(found[2].is_none());
    // a folder is not a VM
    assert!(found[3].is_none());

    assert!(resolver.vms_by_paths(&dc, &[]).await.unwrap().is_empty());
    let err = resolver.vms_by_paths(&dc, &[" "]).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::InvalidIdentifier);
}

#[tokio::test]
async fn vm_properties_errors() {
    let session = session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();

    let err = resolver.vm_properties(&[], &[NAME_PROPERTY]).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::EmptyObjectList);
    assert_eq!(err.message, "VirtualMachine Object list is empty");

    let mut vms = Vec::new();
    for name in SIM_VMS {
        vms.push(resolver.vm_by_path(&dc, name).await.unwrap());
    }
    let props = resolver.vm_properties(&vms, &[NAME_PROPERTY, "summary"]).await.unwrap();
    assert_eq!(props.len(), SIM_VMS.len());
    for (content, name) in props.iter().zip(SIM_VMS) {
        assert_eq!(content.name(), Some(name));
        let summary_name = content
            .get("summary")
            .and_then(|s| s.lookup("config.name"))
            .and_then(|v| v.as_str());
        assert_eq!(summary_name, Some(name));
    }

    let err = resolver.vm_properties(&vms, &[TEST_NAME_NOT_FOUND]).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::InvalidProperty);
    assert!(err.message.contains("InvalidProperty"));
}

#[tokio::test]
async fn datastore_by_path_name_and_reference() {
    let session = session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();

    let disk_path = format!("[{SIM_DATASTORE}] DC0_H0_VM0/disk1.vmdk");
    let by_path = resolver.datastore_by_path(&dc, &disk_path).await.unwrap();
    assert_eq!(by_path.name, SIM_DATASTORE);
    assert_eq!(by_path.path, "/DC0/datastore/LocalDS_0");

    let by_name = resolver.datastore_by_name(&dc, SIM_DATASTORE).await.unwrap();
    assert_eq!(by_name, by_path);
    let by_ref = resolver
        .datastore_by_reference(&by_name.reference.to_string())
        .await
        .unwrap();
    assert_eq!(by_ref, by_name);
    assert_eq!(by_ref.file_path("DC0_H0_VM0/disk1.vmdk").to_string(), disk_path);

    let err = resolver.datastore_by_path(&dc, TEST_NAME_NOT_FOUND).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::InvalidDiskPath);
    assert_eq!(err.message, "Failed to parse vmDiskPath: enoent");

    let err = resolver
        .datastore_by_path(&dc, "[enoent] DC0_H0_VM0/disk1.vmdk")
        .await
        .unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
    assert!(err.message.contains(TEST_NAME_NOT_FOUND));

    let err = resolver.datastore_by_name(&dc, TEST_NAME_NOT_FOUND).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
}

#[tokio::test]
async fn datastore_properties() {
    let session = session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();
    let ds = resolver.datastore_by_name(&dc, SIM_DATASTORE).await.unwrap();

    let props = resolver
        .datastore_properties(&[ds.clone()], &[DATASTORE_INFO_PROPERTY])
        .await
        .unwrap();
    let info_name = props[0]
        .get(DATASTORE_INFO_PROPERTY)
        .and_then(|i| i.field("name"))
        .and_then(|v| v.as_str());
    assert_eq!(info_name, Some(SIM_DATASTORE));

    let err = resolver.datastore_properties(&[], &[NAME_PROPERTY]).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::EmptyObjectList);
    assert_eq!(err.message, "Datastore Object list is empty");

    let err = resolver
        .datastore_properties(&[ds], &[TEST_NAME_NOT_FOUND])
        .await
        .unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::InvalidProperty);
}

#[tokio::test]
async fn folder_by_path_and_reference() {
    let session = session();
    let resolver = InventoryResolver::new(&session);
    let dc = resolver.datacenter(SIM_DATACENTER).await.unwrap();

    let folder = resolver.folder_by_path(&dc, "/DC0/vm").await.unwrap();
    assert!(folder.reference.is_type(FOLDER_TYPE));
    assert_eq!(resolver.folder_by_path(&dc, "vm").await.unwrap(), folder);
    assert_eq!(resolver.folder_by_path(&dc, "DC0/vm/").await.unwrap(), folder);

    let by_ref = resolver
        .folder_by_reference(&folder.reference.to_string())
        .await
        .unwrap();
    assert_eq!(by_ref, folder);

    let err = resolver.folder_by_path(&dc, TEST_NAME_NOT_FOUND).await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
    assert!(err.message.contains(TEST_NAME_NOT_FOUND));

    // a VM is not a folder
    let err = resolver.folder_by_path(&dc, "/DC0/vm/DC0_H0_VM0").await.unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::NotFound);
}

#[tokio::test]
async fn session_logout_ends_the_session() {
    let session = session();
    let client_view = session.clone();
    session.logout().await.unwrap();

    let err = client_view
        .client()
        .find_by_inventory_path("/DC0")
        .await
        .unwrap_err();
    assert_eq!(err.kind, VclibErrorKind::AuthenticationError);
}
