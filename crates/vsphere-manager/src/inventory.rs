//! Server-wide operations: listing, creating, cloning and deleting VMs.

use tracing::{info, warn};

use crate::disk;
use crate::error::{Result, VsphereError};
use crate::host::Host;
use crate::property::PropertySet;
use crate::session::Session;
use crate::task;
use crate::types::{DiskFormat, ManagedObjectRef, PowerState, Record};
use crate::vm::{NEW_CONTROLLER_KEY, NEW_DISK_KEY, VirtualMachine};
use crate::xml::Element;

const LIST_PATHS: &[&str] = &[
    "name",
    "runtime.powerState",
    "summary.config.guestFullName",
    "config.template",
];

/// One row of `list_vms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSummary {
    pub moref: ManagedObjectRef,
    pub name: String,
    pub power_state: Option<PowerState>,
    pub guest: String,
    pub template: bool,
}

impl VmSummary {
    fn from_properties(props: &PropertySet) -> Self {
        Self {
            moref: props.obj.clone(),
            name: props.string("name").unwrap_or_default(),
            power_state: props.parse("runtime.powerState"),
            guest: props
                .string("summary.config.guestFullName")
                .unwrap_or_default(),
            template: props.flag("config.template"),
        }
    }
}

/// Server clock and product identification.
pub async fn server_info(session: &Session) -> Result<Record> {
    let about = &session.content().about;
    let mut rec = Record::new();
    rec.push("time", session.current_time().await?);
    rec.push("fullName", &about.full_name);
    rec.push("apiVersion", &about.api_version);
    rec.push_opt("instanceUuid", about.instance_uuid.as_deref());
    Ok(rec)
}

/// Every VM in the inventory whose name contains `filter` (case-insensitive), sorted by name.
pub async fn list_vms(session: &Session, filter: Option<&str>) -> Result<Vec<VmSummary>> {
    let root = &session.content().root_folder;
    let sets = session
        .properties_in_container(root, "VirtualMachine", LIST_PATHS)
        .await?;

    let mut vms: Vec<VmSummary> = sets
        .iter()
        .map(VmSummary::from_properties)
        .filter(|vm| matches_filter(&vm.name, filter))
        .collect();
    vms.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(vms)
}

fn matches_filter(name: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) => name.to_lowercase().contains(&f.to_lowercase()),
        None => true,
    }
}

/// Parameters of a new, empty VM.
#[derive(Debug, Clone)]
pub struct VmCreateSpec {
    pub name: String,
    /// Inventory path of the datacenter, e.g. `Engineering`.
    pub datacenter: String,
    pub host_ip: String,
    pub datastore: String,
    pub guest_id: String,
    pub num_cpus: u32,
    pub memory_mb: u64,
    pub disk_bytes: u64,
    pub disk_format: DiskFormat,
}

/// Create a VM with one SCSI controller and one disk. Returns the new VM.
pub async fn create_vm(session: &Session, spec: &VmCreateSpec) -> Result<ManagedObjectRef> {
    let datacenter = session
        .find_by_inventory_path(&spec.datacenter)
        .await?
        .filter(|m| m.kind == "Datacenter")
        .ok_or_else(|| VsphereError::not_found("datacenter", &spec.datacenter))?;
    let vm_folder = session
        .properties(&datacenter, &["vmFolder"])
        .await?
        .moref("vmFolder")
        .ok_or_else(|| VsphereError::not_found("VM folder of datacenter", &spec.datacenter))?;

    let host = Host::find_by_ip(session, &spec.host_ip).await?;
    let pool = host.resource_pool(session).await?;
    let datastore = host.datastore_by_name(session, &spec.datastore).await?;

    let config = new_vm_config(spec, &datastore.name);

    info!(
        name = %spec.name,
        host = %host.name,
        datastore = %datastore.name,
        cpus = spec.num_cpus,
        memory_mb = spec.memory_mb,
        "creating VM"
    );
    let task = session
        .invoke_for_ref(
            "CreateVM_Task",
            &vm_folder,
            vec![
                config,
                pool.to_element("pool"),
                host.moref.to_element("host"),
            ],
        )
        .await?;
    task::wait_for_task(session, &task)
        .await?
        .result_ref()
        .ok_or_else(|| VsphereError::unexpected("CreateVM_Task", "task returned no VM"))
}

/// `VirtualMachineConfigSpec` for `create_vm`, children in schema order.
fn new_vm_config(spec: &VmCreateSpec, datastore: &str) -> Element {
    Element::new("config")
        .with_child(Element::leaf("name", &spec.name))
        .with_child(Element::leaf("guestId", &spec.guest_id))
        .with_child(
            Element::new("files").with_child(Element::leaf("vmPathName", format!("[{datastore}]"))),
        )
        .with_child(Element::leaf("numCPUs", spec.num_cpus))
        .with_child(Element::leaf("memoryMB", spec.memory_mb))
        .with_child(disk::add_scsi_controller_change(NEW_CONTROLLER_KEY, 0))
        .with_child(disk::add_disk_change(
            NEW_DISK_KEY,
            NEW_CONTROLLER_KEY,
            0,
            spec.disk_bytes,
            spec.disk_format,
        ))
}

/// Where a clone lands.
#[derive(Debug, Clone)]
pub struct VmCloneSpec {
    pub name: String,
    pub host_ip: String,
    /// Defaults to the template's datastore.
    pub datastore: Option<String>,
    pub power_on: bool,
}

/// Clone `template` into the template's folder. Returns the new VM.
pub async fn clone_vm(
    session: &Session,
    template: &VirtualMachine,
    spec: &VmCloneSpec,
) -> Result<ManagedObjectRef> {
    let folder = template
        .parent_folder()
        .ok_or_else(|| VsphereError::not_found("parent folder of VM", &template.name))?;
    let host = Host::find_by_ip(session, &spec.host_ip).await?;
    let pool = host.resource_pool(session).await?;
    let datastore = match &spec.datastore {
        Some(name) => Some(host.datastore_by_name(session, name).await?),
        None => None,
    };

    let location = Element::new("location")
        .with_opt_child(datastore.as_ref().map(|ds| ds.moref.to_element("datastore")))
        .with_child(pool.to_element("pool"))
        .with_child(host.moref.to_element("host"));
    let clone_spec = Element::new("spec")
        .with_child(location)
        .with_child(Element::leaf("template", false))
        .with_child(Element::leaf("powerOn", spec.power_on));

    info!(
        template = %template.name,
        name = %spec.name,
        host = %host.name,
        power_on = spec.power_on,
        "cloning VM"
    );
    let task = session
        .invoke_for_ref(
            "CloneVM_Task",
            &template.moref,
            vec![
                folder.moref.to_element("folder"),
                Element::leaf("name", &spec.name),
                clone_spec,
            ],
        )
        .await?;
    task::wait_for_task(session, &task)
        .await?
        .result_ref()
        .ok_or_else(|| VsphereError::unexpected("CloneVM_Task", "task returned no VM"))
}

/// Destroy `vm`. A powered-on VM is refused unless `force`, which powers it off first.
pub async fn delete_vm(session: &Session, vm: &VirtualMachine, force: bool) -> Result<()> {
    if vm.power_state() == Some(PowerState::PoweredOn) {
        if !force {
            return Err(VsphereError::InvalidPowerState {
                vm: vm.name.clone(),
                state: PowerState::PoweredOn.to_string(),
            });
        }
        warn!(vm = %vm.name, "VM is powered on, powering off before delete");
        vm.power_off(session).await?;
    }
    vm.destroy(session).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_case_insensitive_substring() {
        assert!(matches_filter("Web-Prod-01", Some("prod")));
        assert!(matches_filter("web-prod-01", Some("PROD")));
        assert!(!matches_filter("db01", Some("web")));
        assert!(matches_filter("anything", None));
    }

    #[test]
    fn summary_from_properties() {
        let el = Element::parse(
            r#"<objects xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                 <obj type="VirtualMachine">vm-42</obj>
                 <propSet><name>name</name><val xsi:type="xsd:string">web01</val></propSet>
                 <propSet><name>runtime.powerState</name><val xsi:type="VirtualMachinePowerState">poweredOff</val></propSet>
                 <propSet><name>config.template</name><val xsi:type="xsd:boolean">true</val></propSet>
               </objects>"#,
        )
        .unwrap();
        let props = PropertySet::from_object_content(&el).unwrap();
        let vm = VmSummary::from_properties(&props);
        assert_eq!(vm.moref, ManagedObjectRef::new("VirtualMachine", "vm-42"));
        assert_eq!(vm.name, "web01");
        assert_eq!(vm.power_state, Some(PowerState::PoweredOff));
        assert!(vm.template);
        assert_eq!(vm.guest, "");
    }

    #[test]
    fn new_vm_config_follows_schema_order() {
        let spec = VmCreateSpec {
            name: "web01".into(),
            datacenter: "Engineering".into(),
            host_ip: "10.0.0.10".into(),
            datastore: "ds1".into(),
            guest_id: "otherGuest64".into(),
            num_cpus: 2,
            memory_mb: 2048,
            disk_bytes: 1 << 30,
            disk_format: DiskFormat::Thin,
        };
        let config = new_vm_config(&spec, "ds1");

        let names: Vec<&str> = config.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "name",
                "guestId",
                "files",
                "numCPUs",
                "memoryMB",
                "deviceChange",
                "deviceChange"
            ]
        );
        assert_eq!(config.text_of("files.vmPathName"), Some("[ds1]"));

        let changes: Vec<&Element> = config.children_named("deviceChange").collect();
        assert_eq!(changes[0].text_of("device.key"), Some("-100"));
        assert_eq!(changes[1].text_of("device.controllerKey"), Some("-100"));
        assert_eq!(changes[1].text_of("device.capacityInKB"), Some("1048576"));
    }
}
