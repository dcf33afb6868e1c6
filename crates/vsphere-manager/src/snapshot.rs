use tracing::info;

use crate::disk::VirtualDisk;
use crate::error::{Result, VsphereError};
use crate::session::Session;
use crate::task;
use crate::types::{ManagedObjectRef, Record};
use crate::xml::Element;

/// One node of a VM's `snapshot.rootSnapshotList` tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNode {
    pub name: String,
    pub snapshot: ManagedObjectRef,
    pub id: Option<i32>,
    pub description: String,
    pub create_time: Option<String>,
    pub state: Option<String>,
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    /// Decode a `VirtualMachineSnapshotTree`.
    pub fn from_element(el: &Element) -> Option<Self> {
        Some(Self {
            name: el.text_of("name")?.to_string(),
            snapshot: ManagedObjectRef::from_element(el.child("snapshot")?)?,
            id: el.value_of("id"),
            description: el.text_of("description").unwrap_or_default().to_string(),
            create_time: el.text_of("createTime").map(str::to_string),
            state: el.text_of("state").map(str::to_string),
            children: el
                .children_named("childSnapshotList")
                .filter_map(SnapshotNode::from_element)
                .collect(),
        })
    }
}

/// Decode `VirtualMachineSnapshotInfo` (the VM's `snapshot` property) into its root trees.
pub fn roots_from_info(info: Option<&Element>) -> Vec<SnapshotNode> {
    info.map(|i| {
        i.children_named("rootSnapshotList")
            .filter_map(SnapshotNode::from_element)
            .collect()
    })
    .unwrap_or_default()
}

/// Depth-first, pre-order search for the first snapshot called `name`.
///
/// Snapshot names are not unique on the server; with duplicates the first one in
/// pre-order wins.
pub fn find_by_name<'a>(roots: &'a [SnapshotNode], name: &str) -> Result<&'a SnapshotNode> {
    fn walk<'a>(nodes: &'a [SnapshotNode], name: &str) -> Option<&'a SnapshotNode> {
        nodes.iter().find_map(|node| {
            if node.name == name {
                Some(node)
            } else {
                walk(&node.children, name)
            }
        })
    }

    walk(roots, name).ok_or_else(|| VsphereError::not_found("snapshot", name))
}

/// All snapshots in pre-order.
pub fn flatten(roots: &[SnapshotNode]) -> Vec<&SnapshotNode> {
    fn walk<'a>(nodes: &'a [SnapshotNode], out: &mut Vec<&'a SnapshotNode>) {
        for node in nodes {
            out.push(node);
            walk(&node.children, out);
        }
    }

    let mut out = Vec::new();
    walk(roots, &mut out);
    out
}

/// A snapshot with its configuration loaded.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub moref: ManagedObjectRef,
    pub vm: ManagedObjectRef,
    pub cbt_enabled: bool,
    pub disks: Vec<VirtualDisk>,
}

impl Snapshot {
    pub async fn load(session: &Session, vm: &ManagedObjectRef, node: &SnapshotNode) -> Result<Self> {
        let props = session
            .properties(
                &node.snapshot,
                &["config.changeTrackingEnabled", "config.hardware.device"],
            )
            .await?;

        Ok(Self {
            name: node.name.clone(),
            moref: node.snapshot.clone(),
            vm: vm.clone(),
            cbt_enabled: props.flag("config.changeTrackingEnabled"),
            disks: VirtualDisk::from_devices(props.get("config.hardware.device"), Some(&node.snapshot)),
        })
    }

    pub fn info(&self) -> Record {
        let mut rec = Record::new();
        rec.push("name", &self.name);
        rec.push("moref", &self.moref.value);
        rec.push("cbtEnabled", if self.cbt_enabled { "True" } else { "False" });
        rec
    }

    pub fn disk(&self, key: i32) -> Result<&VirtualDisk> {
        self.disks
            .iter()
            .find(|d| d.key == key)
            .ok_or_else(|| VsphereError::not_found("disk with key", key.to_string()))
    }

    pub async fn delete(&self, session: &Session, remove_children: bool) -> Result<()> {
        info!(snapshot = %self.name, moref = %self.moref, remove_children, "removing snapshot");
        let task = session
            .invoke_for_ref(
                "RemoveSnapshot_Task",
                &self.moref,
                vec![Element::leaf("removeChildren", remove_children)],
            )
            .await?;
        task::wait_for_task(session, &task).await?;
        Ok(())
    }
}
