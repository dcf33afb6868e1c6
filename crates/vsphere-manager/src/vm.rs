use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::datastore::DatastorePath;
use crate::disk::{self, VirtualDisk};
use crate::error::{Result, VsphereError};
use crate::property::PropertySet;
use crate::question::{self, QuestionPrompt};
use crate::session::Session;
use crate::snapshot::{self, Snapshot, SnapshotNode};
use crate::task;
use crate::types::{DiskFormat, ManagedObjectRef, PowerState, Record, VmIdentity};
use crate::xml::Element;

const VM_PATHS: &[&str] = &[
    "name",
    "parent",
    "parentVApp",
    "resourcePool",
    "snapshot",
    "config.guestFullName",
    "config.uuid",
    "config.instanceUuid",
    "config.changeTrackingEnabled",
    "config.hardware.device",
    "summary.config.vmPathName",
    "summary.config.memorySizeMB",
    "summary.config.numVirtualDisks",
    "summary.guest.ipAddress",
    "summary.guest.hostName",
    "summary.guest.toolsVersionStatus2",
    "runtime.powerState",
    "runtime.host",
];

/// Temporary device keys used inside a single config spec.
pub(crate) const NEW_CONTROLLER_KEY: i32 = -100;
pub(crate) const NEW_DISK_KEY: i32 = -1;

/// A named object on the path from a VM up to the root folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub moref: ManagedObjectRef,
    pub name: String,
}

/// Options for `CreateSnapshot_Task`.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub description: String,
    /// Include the VM's memory state.
    pub memory: bool,
    /// Quiesce the guest file system through VMware Tools.
    pub quiesce: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            description: String::new(),
            memory: false,
            quiesce: true,
        }
    }
}

/// A virtual machine with its commonly used properties loaded.
#[derive(Debug, Clone)]
pub struct VirtualMachine {
    pub moref: ManagedObjectRef,
    pub name: String,
    /// Parents from the immediate one up to the root folder.
    pub ancestors: Vec<Ancestor>,
    host_name: Option<String>,
    resource_pool_name: Option<String>,
    props: PropertySet,
}

impl VirtualMachine {
    /// Resolve `identity` in the inventory and load the VM.
    pub async fn find(session: &Session, identity: &VmIdentity) -> Result<Self> {
        let moref = match identity {
            VmIdentity::Ip(ip) => session
                .find_by_ip(ip, true)
                .await?
                .ok_or_else(|| VsphereError::not_found("virtual machine with IP", ip))?,
            VmIdentity::InventoryPath(path) => session
                .find_by_inventory_path(path)
                .await?
                .filter(|m| m.kind == "VirtualMachine")
                .ok_or_else(|| {
                    VsphereError::not_found("virtual machine with inventory path", path)
                })?,
            VmIdentity::Uuid(uuid) => {
                let by_bios = session.find_by_uuid(uuid, true, false).await?;
                let found = match by_bios {
                    Some(m) => Some(m),
                    None => session.find_by_uuid(uuid, true, true).await?,
                };
                found.ok_or_else(|| VsphereError::not_found("virtual machine with UUID", uuid))?
            }
        };
        debug!(identity = %identity, moref = %moref, "resolved virtual machine");
        Self::load(session, moref).await
    }

    pub async fn load(session: &Session, moref: ManagedObjectRef) -> Result<Self> {
        let props = session.properties(&moref, VM_PATHS).await?;

        let mut ancestors = Vec::new();
        let mut next = props.moref("parent").or_else(|| props.moref("parentVApp"));
        while let Some(parent) = next {
            let p = session.properties(&parent, &["name", "parent"]).await?;
            next = p.moref("parent");
            ancestors.push(Ancestor {
                name: p.string("name").unwrap_or_default(),
                moref: parent,
            });
        }

        let power_state: Option<PowerState> = props.parse("runtime.powerState");
        let host_name = match props.moref("runtime.host") {
            Some(host) if power_state == Some(PowerState::PoweredOn) => {
                session.properties(&host, &["name"]).await?.string("name")
            }
            _ => None,
        };
        let resource_pool_name = match props.moref("resourcePool") {
            Some(pool) => session.properties(&pool, &["name"]).await?.string("name"),
            None => None,
        };

        Ok(Self {
            name: props.string("name").unwrap_or_default(),
            moref,
            ancestors,
            host_name,
            resource_pool_name,
            props,
        })
    }

    pub fn power_state(&self) -> Option<PowerState> {
        self.props.parse("runtime.powerState")
    }

    pub fn vmx_path(&self) -> Option<&str> {
        self.props.text("summary.config.vmPathName")
    }

    pub fn resource_pool(&self) -> Option<ManagedObjectRef> {
        self.props.moref("resourcePool")
    }

    pub fn datacenter(&self) -> Option<&Ancestor> {
        self.ancestors.iter().find(|a| a.moref.kind == "Datacenter")
    }

    pub fn parent_folder(&self) -> Option<&Ancestor> {
        self.ancestors.iter().find(|a| a.moref.kind == "Folder")
    }

    pub fn inventory_path(&self) -> String {
        inventory_path(&self.name, &self.ancestors)
    }

    pub fn info(&self) -> Record {
        let p = &self.props;
        let mut rec = Record::new();
        rec.push("name", &self.name);
        rec.push("moref", &self.moref.value);
        rec.push_opt("guestFullName", p.text("config.guestFullName"));
        rec.push_opt("pathToVm", self.vmx_path());
        rec.push_opt("datacenter", self.datacenter().map(|a| &a.name));
        rec.push_opt("parentFolder", self.parent_folder().map(|a| &a.name));
        rec.push("inventoryPath", self.inventory_path());
        rec.push_opt("instanceUuid", p.text("config.instanceUuid"));
        rec.push(
            "cbtEnabled",
            if p.flag("config.changeTrackingEnabled") {
                "True"
            } else {
                "False"
            },
        );
        rec.push_opt("uuid", p.text("config.uuid"));
        rec.push_opt("powerState", self.power_state());
        rec.push_opt("host", self.host_name.as_deref());
        rec.push_opt("memoryMB", p.text("summary.config.memorySizeMB"));
        rec.push_opt("numDisks", p.text("summary.config.numVirtualDisks"));
        rec.push_opt("ip", p.text("summary.guest.ipAddress"));
        rec.push_opt("hostName", p.text("summary.guest.hostName"));
        rec.push_opt("toolsStatus", p.text("summary.guest.toolsVersionStatus2"));
        rec.push_opt("resourcePool", self.resource_pool_name.as_deref());
        rec
    }

    fn devices(&self) -> Option<&Element> {
        self.props.get("config.hardware.device")
    }

    pub fn disks(&self) -> Vec<VirtualDisk> {
        VirtualDisk::from_devices(self.devices(), None)
    }

    pub fn disk(&self, key: i32) -> Result<VirtualDisk> {
        self.disks()
            .into_iter()
            .find(|d| d.key == key)
            .ok_or_else(|| VsphereError::not_found("disk with key", key.to_string()))
    }

    pub fn snapshot_tree(&self) -> Vec<SnapshotNode> {
        snapshot::roots_from_info(self.props.get("snapshot"))
    }

    /// Every snapshot, in tree pre-order, with its configuration loaded.
    pub async fn snapshots(&self, session: &Session) -> Result<Vec<Snapshot>> {
        let tree = self.snapshot_tree();
        let mut out = Vec::new();
        for node in snapshot::flatten(&tree) {
            out.push(Snapshot::load(session, &self.moref, node).await?);
        }
        Ok(out)
    }

    pub async fn snapshot(&self, session: &Session, name: &str) -> Result<Snapshot> {
        let tree = self.snapshot_tree();
        let node = snapshot::find_by_name(&tree, name)?;
        Snapshot::load(session, &self.moref, node).await
    }

    pub async fn create_snapshot(
        &self,
        session: &Session,
        name: &str,
        opts: &SnapshotOptions,
    ) -> Result<Option<ManagedObjectRef>> {
        info!(vm = %self.name, snapshot = %name, memory = opts.memory, quiesce = opts.quiesce, "creating snapshot");
        let task = session
            .invoke_for_ref(
                "CreateSnapshot_Task",
                &self.moref,
                vec![
                    Element::leaf("name", name),
                    Element::leaf("description", &opts.description),
                    Element::leaf("memory", opts.memory),
                    Element::leaf("quiesce", opts.quiesce),
                ],
            )
            .await?;
        Ok(task::wait_for_task(session, &task).await?.result_ref())
    }

    pub async fn delete_all_snapshots(&self, session: &Session) -> Result<()> {
        info!(vm = %self.name, "removing all snapshots");
        self.run_task(session, "RemoveAllSnapshots_Task", vec![]).await?;
        Ok(())
    }

    /// Enable or disable change block tracking.
    pub async fn set_change_tracking(&self, session: &Session, enabled: bool) -> Result<()> {
        info!(vm = %self.name, enabled, "setting change block tracking");
        self.reconfigure(
            session,
            Element::new("spec").with_child(Element::leaf("changeTrackingEnabled", enabled)),
        )
        .await
    }

    pub async fn rename(&self, session: &Session, new_name: &str) -> Result<()> {
        info!(vm = %self.name, new_name, "renaming VM");
        self.reconfigure(
            session,
            Element::new("spec").with_child(Element::leaf("name", new_name)),
        )
        .await
    }

    /// Add a disk of `capacity_in_bytes` on the first SCSI controller.
    pub async fn add_disk(
        &self,
        session: &Session,
        capacity_in_bytes: u64,
        format: DiskFormat,
    ) -> Result<()> {
        let controller = disk::scsi_controllers(self.devices())
            .into_iter()
            .next()
            .ok_or_else(|| VsphereError::NoScsiController {
                vm: self.name.clone(),
            })?;
        let unit = disk::next_unit_number(self.devices(), controller.key)?;

        info!(
            vm = %self.name,
            controller = controller.key,
            unit,
            capacity_in_bytes,
            format = %format,
            "adding disk"
        );
        self.reconfigure(
            session,
            Element::new("spec").with_child(disk::add_disk_change(
                NEW_DISK_KEY,
                controller.key,
                unit,
                capacity_in_bytes,
                format,
            )),
        )
        .await
    }

    pub async fn delete_disk(&self, session: &Session, key: i32, destroy_file: bool) -> Result<()> {
        let disk = self.disk(key)?;
        info!(vm = %self.name, disk = key, label = %disk.label, destroy_file, "removing disk");
        self.reconfigure(
            session,
            Element::new("spec").with_child(disk.remove_change(destroy_file)),
        )
        .await
    }

    pub async fn resize_disk(&self, session: &Session, key: i32, capacity_in_bytes: u64) -> Result<()> {
        let disk = self.disk(key)?;
        info!(vm = %self.name, disk = key, capacity_in_bytes, "resizing disk");
        self.reconfigure(
            session,
            Element::new("spec").with_child(disk.resize_change(capacity_in_bytes)),
        )
        .await
    }

    pub async fn add_scsi_controller(&self, session: &Session) -> Result<()> {
        let bus = disk::scsi_controllers(self.devices())
            .iter()
            .map(|c| c.bus_number + 1)
            .max()
            .unwrap_or(0);
        info!(vm = %self.name, bus, "adding SCSI controller");
        self.reconfigure(
            session,
            Element::new("spec").with_child(disk::add_scsi_controller_change(NEW_CONTROLLER_KEY, bus)),
        )
        .await
    }

    /// Download the VM's `.vmx` file through the datastore HTTP file service.
    pub async fn download_vmx(&self, session: &Session, output: &Path) -> Result<()> {
        let vmx = self.vmx_path().unwrap_or_default();
        let ds_path: DatastorePath = vmx.parse()?;
        let datacenter = self
            .datacenter()
            .ok_or_else(|| VsphereError::not_found("datacenter of VM", &self.name))?;

        let config = session.config();
        let url = format!("https://{}/folder/{}", config.host, ds_path.path);
        info!(vm = %self.name, url = %url, dest = %output.display(), "downloading VMX");

        let resp = session
            .http()
            .get(&url)
            .query(&[
                ("dcPath", datacenter.name.as_str()),
                ("dsName", ds_path.datastore.as_str()),
            ])
            .basic_auth(&config.username, Some(&config.password))
            .send()
            .await
            .map_err(|source| VsphereError::Http {
                url: url.clone(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(VsphereError::DownloadFailed {
                url,
                status: resp.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(output).await?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| VsphereError::Http {
                url: url.clone(),
                source,
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(dest = %output.display(), bytes = written, "VMX downloaded");
        Ok(())
    }

    /// Register the VM at `vmx_path` into this VM's folder and resource pool.
    pub async fn register(
        &self,
        session: &Session,
        vmx_path: &str,
        name: Option<&str>,
    ) -> Result<Option<ManagedObjectRef>> {
        let folder = self
            .parent_folder()
            .ok_or_else(|| VsphereError::not_found("parent folder of VM", &self.name))?;

        info!(vmx = %vmx_path, name = ?name, folder = %folder.name, "registering VM");
        let task = session
            .invoke_for_ref(
                "RegisterVM_Task",
                &folder.moref,
                vec![Element::leaf("path", vmx_path)]
                    .into_iter()
                    .chain(name.map(|n| Element::leaf("name", n)))
                    .chain([Element::leaf("asTemplate", false)])
                    .chain(self.resource_pool().map(|p| p.to_element("pool")))
                    .collect(),
            )
            .await?;
        Ok(task::wait_for_task(session, &task).await?.result_ref())
    }

    pub async fn unregister(&self, session: &Session) -> Result<()> {
        info!(vm = %self.name, "unregistering VM");
        session.invoke("UnregisterVM", &self.moref, vec![]).await?;
        Ok(())
    }

    pub async fn power_on<P: QuestionPrompt>(&self, session: &Session, prompt: &P) -> Result<()> {
        question::power_on(session, &self.moref, prompt).await
    }

    pub async fn power_off(&self, session: &Session) -> Result<()> {
        info!(vm = %self.name, "powering off");
        self.run_task(session, "PowerOffVM_Task", vec![]).await?;
        Ok(())
    }

    /// Delete the VM and its files.
    pub async fn destroy(&self, session: &Session) -> Result<()> {
        info!(vm = %self.name, moref = %self.moref, "destroying VM");
        self.run_task(session, "Destroy_Task", vec![]).await?;
        Ok(())
    }

    async fn reconfigure(&self, session: &Session, spec: Element) -> Result<()> {
        self.run_task(session, "ReconfigVM_Task", vec![spec]).await?;
        Ok(())
    }

    async fn run_task(
        &self,
        session: &Session,
        method: &str,
        args: Vec<Element>,
    ) -> Result<task::CompletedTask> {
        let task = session.invoke_for_ref(method, &self.moref, args).await?;
        task::wait_for_task(session, &task).await
    }
}

/// `Datacenter/vm/folder/name` for a VM called `name` with the given ancestors.
/// The root folder (last ancestor) is not part of the path.
pub fn inventory_path(name: &str, ancestors: &[Ancestor]) -> String {
    let mut comps: Vec<&str> = std::iter::once(name)
        .chain(ancestors.iter().map(|a| a.name.as_str()))
        .collect();
    comps.pop();
    comps.reverse();
    comps.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ancestor(kind: &str, value: &str, name: &str) -> Ancestor {
        Ancestor {
            moref: ManagedObjectRef::new(kind, value),
            name: name.into(),
        }
    }

    #[test]
    fn inventory_path_drops_root_folder() {
        let ancestors = vec![
            ancestor("Folder", "group-v10", "Raghu"),
            ancestor("Folder", "group-v3", "vm"),
            ancestor("Datacenter", "datacenter-2", "Engineering"),
            ancestor("Folder", "group-d1", "Datacenters"),
        ];
        assert_eq!(
            inventory_path("testvm", &ancestors),
            "Engineering/vm/Raghu/testvm"
        );
    }

    #[test]
    fn inventory_path_of_orphan_is_empty() {
        assert_eq!(inventory_path("lonely", &[]), "");
    }

    #[test]
    fn snapshot_defaults_quiesce_without_memory() {
        let opts = SnapshotOptions::default();
        assert!(opts.quiesce);
        assert!(!opts.memory);
        assert!(opts.description.is_empty());
    }
}
