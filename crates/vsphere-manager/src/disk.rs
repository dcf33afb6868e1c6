use tracing::debug;

use crate::error::{Result, VsphereError};
use crate::session::Session;
use crate::types::{DiskFormat, ManagedObjectRef, Record};
use crate::units::bytes_to_readable_units;
use crate::xml::Element;

/// Unit number a SCSI controller reserves for itself.
const SCSI_CONTROLLER_UNIT: i32 = 7;
/// Unit numbers available on a SCSI controller.
const SCSI_UNITS_PER_CONTROLLER: i32 = 16;

const SCSI_CONTROLLER_TYPES: &[&str] = &[
    "VirtualLsiLogicController",
    "VirtualLsiLogicSASController",
    "VirtualBusLogicController",
    "ParaVirtualSCSIController",
];

/// A `VirtualDisk` device of a VM or of one of its snapshots.
#[derive(Debug, Clone)]
pub struct VirtualDisk {
    pub key: i32,
    pub label: String,
    pub summary: String,
    pub backing_type: String,
    pub capacity_in_bytes: u64,
    pub uuid: Option<String>,
    pub path: Option<String>,
    /// File of the last backing in the parent chain (the base disk under any delta disks).
    pub root_path: Option<String>,
    pub change_id: Option<String>,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
    /// Set when the disk was read from a snapshot's configuration.
    pub snapshot: Option<ManagedObjectRef>,
    device: Element,
}

impl VirtualDisk {
    pub fn from_device(device: &Element, snapshot: Option<&ManagedObjectRef>) -> Option<Self> {
        if device.xsi_type.as_deref() != Some("VirtualDisk") {
            return None;
        }
        let backing = device.child("backing");

        let capacity_in_bytes = device
            .value_of::<u64>("capacityInBytes")
            .or_else(|| device.value_of::<u64>("capacityInKB").map(|kb| kb * 1024))
            .unwrap_or(0);

        Some(Self {
            key: device.value_of("key")?,
            label: device.text_of("deviceInfo.label").unwrap_or_default().to_string(),
            summary: device.text_of("deviceInfo.summary").unwrap_or_default().to_string(),
            backing_type: backing
                .and_then(|b| b.xsi_type.clone())
                .unwrap_or_default(),
            capacity_in_bytes,
            uuid: backing.and_then(|b| b.text_of("uuid")).map(str::to_string),
            path: backing.and_then(|b| b.text_of("fileName")).map(str::to_string),
            root_path: backing
                .map(root_backing)
                .and_then(|b| b.text_of("fileName"))
                .map(str::to_string),
            change_id: backing
                .and_then(|b| b.text_of("changeId"))
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            controller_key: device.value_of("controllerKey"),
            unit_number: device.value_of("unitNumber"),
            snapshot: snapshot.cloned(),
            device: device.clone(),
        })
    }

    /// All disks in an `ArrayOfVirtualDevice`.
    pub fn from_devices(devices: Option<&Element>, snapshot: Option<&ManagedObjectRef>) -> Vec<Self> {
        devices
            .map(|arr| {
                arr.children
                    .iter()
                    .filter_map(|d| VirtualDisk::from_device(d, snapshot))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn info(&self) -> Record {
        let mut rec = Record::new();
        rec.push("key", self.key);
        rec.push("label", &self.label);
        rec.push("backingType", &self.backing_type);
        rec.push("capacityInBytes", self.capacity_in_bytes);
        rec.push("capacity", bytes_to_readable_units(self.capacity_in_bytes));
        rec.push_opt("uuid", self.uuid.as_deref());
        rec.push_opt("path", self.path.as_deref());
        rec.push_opt("rootPath", self.root_path.as_deref());
        rec.push_opt("changeId", self.change_id.as_deref());
        rec
    }

    /// Changed extents since `change_id` (`"*"` for every allocated area), as
    /// `(start, length)` pairs. Only valid for disks read from a snapshot.
    pub async fn changed_areas(
        &self,
        session: &Session,
        vm: &ManagedObjectRef,
        change_id: &str,
    ) -> Result<Vec<(u64, u64)>> {
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or(VsphereError::SnapshotDiskRequired)?;

        let mut areas = Vec::new();
        let mut start: u64 = 0;

        while start < self.capacity_in_bytes {
            let resp = session
                .invoke(
                    "QueryChangedDiskAreas",
                    vm,
                    vec![
                        snapshot.to_element("snapshot"),
                        Element::leaf("deviceKey", self.key),
                        Element::leaf("startOffset", start),
                        Element::leaf("changeId", change_id),
                    ],
                )
                .await?;
            let info = resp
                .child("returnval")
                .ok_or_else(|| VsphereError::unexpected("QueryChangedDiskAreas", "no returnval"))?;

            let next = fold_change_info(info, start, &mut areas);
            debug!(disk = self.key, start, ?next, total = areas.len(), "queried changed areas");

            match next {
                Some(offset) => start = offset,
                None => break,
            }
        }

        Ok(areas)
    }

    /// `deviceChange` detaching this disk; with `destroy_file` the backing file is deleted too.
    pub fn remove_change(&self, destroy_file: bool) -> Element {
        Element::new("deviceChange")
            .with_child(Element::leaf("operation", "remove"))
            .with_opt_child(destroy_file.then(|| Element::leaf("fileOperation", "destroy")))
            .with_child(self.device.clone().renamed("device"))
    }

    /// `deviceChange` setting a new capacity on this disk.
    pub fn resize_change(&self, capacity_in_bytes: u64) -> Element {
        let mut device = self.device.clone().renamed("device");
        device.set_child_text("capacityInKB", capacity_in_bytes.div_ceil(1024));
        if device.child("capacityInBytes").is_some() {
            device.set_child_text("capacityInBytes", capacity_in_bytes);
        }
        Element::new("deviceChange")
            .with_child(Element::leaf("operation", "edit"))
            .with_child(device)
    }
}

/// Follow `backing.parent` to the end of the chain.
fn root_backing(backing: &Element) -> &Element {
    let mut current = backing;
    while let Some(parent) = current.child("parent") {
        current = parent;
    }
    current
}

/// A SCSI controller device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiController {
    pub key: i32,
    pub bus_number: i32,
}

pub fn scsi_controllers(devices: Option<&Element>) -> Vec<ScsiController> {
    devices
        .map(|arr| {
            arr.children
                .iter()
                .filter(|d| {
                    d.xsi_type
                        .as_deref()
                        .is_some_and(|t| SCSI_CONTROLLER_TYPES.contains(&t))
                })
                .filter_map(|d| {
                    Some(ScsiController {
                        key: d.value_of("key")?,
                        bus_number: d.value_of("busNumber").unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Smallest unit number free on `controller_key`, skipping the controller's own unit.
pub fn next_unit_number(devices: Option<&Element>, controller_key: i32) -> Result<i32> {
    let used: Vec<i32> = devices
        .map(|arr| {
            arr.children
                .iter()
                .filter(|d| d.value_of::<i32>("controllerKey") == Some(controller_key))
                .filter_map(|d| d.value_of::<i32>("unitNumber"))
                .collect()
        })
        .unwrap_or_default();

    (0..SCSI_UNITS_PER_CONTROLLER)
        .filter(|u| *u != SCSI_CONTROLLER_UNIT)
        .find(|u| !used.contains(u))
        .ok_or(VsphereError::TooManyDisks { controller_key })
}

/// Append the extents of one `DiskChangeInfo` to `areas` and return the offset
/// of the next query, or `None` when the reply covered no bytes.
pub(crate) fn fold_change_info(
    info: &Element,
    start: u64,
    areas: &mut Vec<(u64, u64)>,
) -> Option<u64> {
    areas.extend(info.children_named("changedArea").filter_map(|a| {
        Some((a.value_of::<u64>("start")?, a.value_of::<u64>("length")?))
    }));
    match info.value_of::<u64>("length").unwrap_or(0) {
        0 => None,
        length => Some(start.saturating_add(length)),
    }
}

/// `deviceChange` creating a new flat disk on `controller_key`.
///
/// `temp_key` must be negative and unique within one config spec.
pub fn add_disk_change(
    temp_key: i32,
    controller_key: i32,
    unit_number: i32,
    capacity_in_bytes: u64,
    format: DiskFormat,
) -> Element {
    let backing = Element::typed("backing", "VirtualDiskFlatVer2BackingInfo")
        .with_child(Element::leaf("fileName", ""))
        .with_child(Element::leaf("diskMode", "persistent"))
        .with_child(Element::leaf("thinProvisioned", format == DiskFormat::Thin));

    let device = Element::typed("device", "VirtualDisk")
        .with_child(Element::leaf("key", temp_key))
        .with_child(backing)
        .with_child(Element::leaf("controllerKey", controller_key))
        .with_child(Element::leaf("unitNumber", unit_number))
        .with_child(Element::leaf("capacityInKB", capacity_in_bytes.div_ceil(1024)));

    Element::new("deviceChange")
        .with_child(Element::leaf("operation", "add"))
        .with_child(Element::leaf("fileOperation", "create"))
        .with_child(device)
}

/// `deviceChange` adding an LSI Logic SAS controller on `bus_number`.
pub fn add_scsi_controller_change(temp_key: i32, bus_number: i32) -> Element {
    let device = Element::typed("device", "VirtualLsiLogicSASController")
        .with_child(Element::leaf("key", temp_key))
        .with_child(Element::leaf("busNumber", bus_number))
        .with_child(Element::leaf("sharedBus", "noSharing"));

    Element::new("deviceChange")
        .with_child(Element::leaf("operation", "add"))
        .with_child(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Element {
        Element::parse(
            r#"<val xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="ArrayOfVirtualDevice">
                 <VirtualDevice xsi:type="VirtualLsiLogicSASController">
                   <key>1000</key><deviceInfo><label>SCSI controller 0</label></deviceInfo>
                   <controllerKey>100</controllerKey><unitNumber>3</unitNumber>
                   <busNumber>0</busNumber><sharedBus>noSharing</sharedBus>
                   <scsiCtlrUnitNumber>7</scsiCtlrUnitNumber>
                 </VirtualDevice>
                 <VirtualDevice xsi:type="VirtualDisk">
                   <key>2000</key>
                   <deviceInfo><label>Hard disk 1</label><summary>16,777,216 KB</summary></deviceInfo>
                   <backing xsi:type="VirtualDiskFlatVer2BackingInfo">
                     <fileName>[ds1] web01/web01-000002.vmdk</fileName>
                     <diskMode>persistent</diskMode>
                     <uuid>6000C29a-1111-2222-3333-444455556666</uuid>
                     <changeId>52 1d 7e 4f/12</changeId>
                     <parent xsi:type="VirtualDiskFlatVer2BackingInfo">
                       <fileName>[ds1] web01/web01-000001.vmdk</fileName>
                       <parent xsi:type="VirtualDiskFlatVer2BackingInfo">
                         <fileName>[ds1] web01/web01.vmdk</fileName>
                       </parent>
                     </parent>
                   </backing>
                   <controllerKey>1000</controllerKey>
                   <unitNumber>0</unitNumber>
                   <capacityInKB>16777216</capacityInKB>
                   <capacityInBytes>17179869184</capacityInBytes>
                 </VirtualDevice>
                 <VirtualDevice xsi:type="VirtualDisk">
                   <key>2001</key>
                   <deviceInfo><label>Hard disk 2</label><summary>1,048,576 KB</summary></deviceInfo>
                   <backing xsi:type="VirtualDiskFlatVer2BackingInfo">
                     <fileName>[ds1] web01/web01_1.vmdk</fileName>
                     <changeId></changeId>
                   </backing>
                   <controllerKey>1000</controllerKey>
                   <unitNumber>1</unitNumber>
                   <capacityInKB>1048576</capacityInKB>
                 </VirtualDevice>
                 <VirtualDevice xsi:type="VirtualCdrom">
                   <key>3002</key><controllerKey>201</controllerKey><unitNumber>0</unitNumber>
                 </VirtualDevice>
               </val>"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_disks_and_follows_backing_chain() {
        let arr = devices();
        let disks = VirtualDisk::from_devices(Some(&arr), None);
        assert_eq!(disks.len(), 2);

        let d = &disks[0];
        assert_eq!(d.key, 2000);
        assert_eq!(d.label, "Hard disk 1");
        assert_eq!(d.backing_type, "VirtualDiskFlatVer2BackingInfo");
        assert_eq!(d.capacity_in_bytes, 17_179_869_184);
        assert_eq!(d.path.as_deref(), Some("[ds1] web01/web01-000002.vmdk"));
        assert_eq!(d.root_path.as_deref(), Some("[ds1] web01/web01.vmdk"));
        assert_eq!(d.change_id.as_deref(), Some("52 1d 7e 4f/12"));

        let info = d.info();
        assert_eq!(info.get("capacity"), Some("16.00 GB"));
        assert_eq!(info.get("rootPath"), Some("[ds1] web01/web01.vmdk"));
    }

    #[test]
    fn capacity_falls_back_to_kb_and_empty_change_id_is_unset() {
        let arr = devices();
        let disks = VirtualDisk::from_devices(Some(&arr), None);
        let d = &disks[1];
        assert_eq!(d.capacity_in_bytes, 1 << 30);
        assert_eq!(d.root_path, d.path);
        assert_eq!(d.change_id, None);
        assert_eq!(d.info().get("changeId"), None);
    }

    #[test]
    fn finds_scsi_controllers_and_next_unit() {
        let arr = devices();
        assert_eq!(
            scsi_controllers(Some(&arr)),
            vec![ScsiController {
                key: 1000,
                bus_number: 0
            }]
        );
        assert_eq!(next_unit_number(Some(&arr), 1000).unwrap(), 2);
        assert_eq!(next_unit_number(Some(&arr), 1001).unwrap(), 0);
    }

    #[test]
    fn unit_seven_is_skipped_and_full_controller_errors() {
        let used = |units: &[i32]| {
            Element::new("val").with_children(units.iter().map(|u| {
                Element::typed("VirtualDevice", "VirtualDisk")
                    .with_child(Element::leaf("controllerKey", 1000))
                    .with_child(Element::leaf("unitNumber", u))
            }))
        };

        let arr = used(&[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(next_unit_number(Some(&arr), 1000).unwrap(), 8);

        let all: Vec<i32> = (0..16).filter(|u| *u != 7).collect();
        let arr = used(&all[..]);
        assert!(matches!(
            next_unit_number(Some(&arr), 1000),
            Err(VsphereError::TooManyDisks { controller_key: 1000 })
        ));
    }

    #[test]
    fn add_disk_change_is_in_schema_order() {
        let change = add_disk_change(-1, 1000, 2, 10 * (1 << 30), DiskFormat::Thin);
        assert_eq!(
            change.to_xml().unwrap(),
            "<deviceChange><operation>add</operation><fileOperation>create</fileOperation>\
             <device xsi:type=\"VirtualDisk\"><key>-1</key>\
             <backing xsi:type=\"VirtualDiskFlatVer2BackingInfo\"><fileName/>\
             <diskMode>persistent</diskMode><thinProvisioned>true</thinProvisioned></backing>\
             <controllerKey>1000</controllerKey><unitNumber>2</unitNumber>\
             <capacityInKB>10485760</capacityInKB></device></deviceChange>"
        );
    }

    #[test]
    fn remove_and_resize_reuse_the_device() {
        let arr = devices();
        let disk = VirtualDisk::from_devices(Some(&arr), None).remove(0);

        let remove = disk.remove_change(true);
        assert_eq!(remove.text_of("operation"), Some("remove"));
        assert_eq!(remove.text_of("fileOperation"), Some("destroy"));
        assert_eq!(remove.text_of("device.key"), Some("2000"));
        assert_eq!(
            remove.child("device").unwrap().xsi_type.as_deref(),
            Some("VirtualDisk")
        );
        assert!(disk.remove_change(false).child("fileOperation").is_none());

        let resize = disk.resize_change(32 * (1 << 30));
        assert_eq!(resize.text_of("operation"), Some("edit"));
        assert_eq!(resize.text_of("device.capacityInKB"), Some("33554432"));
        assert_eq!(resize.text_of("device.capacityInBytes"), Some("34359738368"));
    }

    fn change_info(start: u64, length: u64, extents: &[(u64, u64)]) -> Element {
        Element::new("returnval")
            .with_child(Element::leaf("startOffset", start))
            .with_child(Element::leaf("length", length))
            .with_children(extents.iter().map(|(s, l)| {
                Element::new("changedArea")
                    .with_child(Element::leaf("start", s))
                    .with_child(Element::leaf("length", l))
            }))
    }

    #[test]
    fn changed_areas_advance_by_reply_length_until_capacity() {
        let capacity: u64 = 4096;
        let pages = [
            change_info(0, 2048, &[(0, 512), (1024, 512)]),
            change_info(2048, 2048, &[(3584, 512)]),
        ];

        let mut areas = Vec::new();
        let mut start = 0;
        let mut queries = 0;
        while start < capacity {
            let page = &pages[queries];
            queries += 1;
            match fold_change_info(page, start, &mut areas) {
                Some(next) => start = next,
                None => break,
            }
        }

        assert_eq!(queries, 2);
        assert_eq!(start, capacity);
        assert_eq!(areas, vec![(0, 512), (1024, 512), (3584, 512)]);
    }

    #[test]
    fn zero_length_reply_stops_the_query() {
        let mut areas = Vec::new();
        assert_eq!(fold_change_info(&change_info(0, 0, &[]), 0, &mut areas), None);
        assert!(areas.is_empty());

        let partial = Element::parse(
            r#"<returnval><startOffset>0</startOffset><length>1024</length>
                 <changedArea><start>0</start><length>64</length></changedArea>
                 <changedArea><start>128</start></changedArea>
               </returnval>"#,
        )
        .unwrap();
        assert_eq!(fold_change_info(&partial, 0, &mut areas), Some(1024));
        assert_eq!(areas, vec![(0, 64)]);
    }
}
