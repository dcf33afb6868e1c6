use std::path::PathBuf;

use clap::{Args, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use tracing::info;
use vsphere_manager::units::convert_to_bytes;
use vsphere_manager::{
    Session, SizeUnit, SnapshotOptions, VirtualMachine, VmIdentity, VsphereError, snapshot,
};

use super::DiskFormatArg;
use super::output::{print_record, print_separator};
use super::prompt::StdinPrompt;

/// Selects a VM. Exactly one option must be given.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct VmTarget {
    /// Guest IP address of the VM
    #[arg(long)]
    ip: Option<String>,

    /// Inventory path of the VM (e.g. Datacenter/vm/folder/name)
    #[arg(long)]
    ipath: Option<String>,

    /// BIOS or instance UUID of the VM
    #[arg(long)]
    uuid: Option<String>,
}

impl VmTarget {
    pub fn identity(&self) -> Result<VmIdentity> {
        match (&self.ip, &self.ipath, &self.uuid) {
            (Some(ip), None, None) => Ok(VmIdentity::Ip(ip.clone())),
            (None, Some(path), None) => Ok(VmIdentity::InventoryPath(path.clone())),
            (None, None, Some(uuid)) => Ok(VmIdentity::Uuid(uuid.clone())),
            _ => Err(miette!("exactly one of --ip, --ipath or --uuid is required")),
        }
    }
}

#[derive(Args)]
pub struct VmCommand {
    #[command(flatten)]
    target: VmTarget,

    #[command(subcommand)]
    action: VmAction,
}

#[derive(Subcommand)]
enum VmAction {
    /// Show VM details with its disks and snapshots
    Info,
    /// Take a snapshot
    CreateSnapshot {
        /// Snapshot name
        name: String,
        /// Snapshot description
        #[arg(long, default_value = "")]
        description: String,
        /// Include the VM's memory
        #[arg(long)]
        memory: bool,
        /// Do not quiesce the guest file system
        #[arg(long)]
        no_quiesce: bool,
    },
    /// Remove a snapshot by name
    DeleteSnapshot {
        /// Snapshot name
        name: String,
        /// Also remove the snapshot's children
        #[arg(long)]
        remove_children: bool,
    },
    /// Remove every snapshot of the VM
    DeleteAllSnapshots,
    /// List snapshot names
    ListSnapshots,
    /// Show a snapshot and its disks
    Snapinfo {
        /// Snapshot name
        name: String,
    },
    /// Enable change block tracking
    EnableCbt,
    /// Disable change block tracking
    DisableCbt,
    /// Download the VM's .vmx file
    DownloadVmx {
        /// Output file (defaults to a new temp file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show a disk, optionally as seen by a snapshot with its changed areas
    Diskinfo {
        /// Device key of the disk
        key: i32,
        /// Read the disk from this snapshot
        #[arg(long)]
        snapname: Option<String>,
        /// Change ID to query changed areas from
        #[arg(long)]
        from_changeid: Option<String>,
        /// Query changed areas (requires --snapname)
        #[arg(long)]
        ca: bool,
    },
    /// Add a disk on the first SCSI controller
    AddDisk {
        /// Size in GB
        #[arg(long)]
        size_gb: u64,
        /// Disk provisioning
        #[arg(long, value_enum, default_value_t)]
        format: DiskFormatArg,
    },
    /// Remove a disk
    DeleteDisk {
        /// Device key of the disk
        key: i32,
        /// Also delete the disk file from the datastore
        #[arg(long)]
        destroy_file: bool,
    },
    /// Change the capacity of a disk
    ResizeDisk {
        /// Device key of the disk
        key: i32,
        /// New size in GB
        #[arg(long)]
        size_gb: u64,
    },
    /// Add an LSI Logic SAS controller
    AddScsiController,
    /// Register a .vmx file into this VM's folder and resource pool
    Register {
        /// Datastore path of the .vmx file, e.g. "[datastore1] web01/web01.vmx"
        vmx_path: String,
        /// Name for the registered VM
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove the VM from the inventory, keeping its files
    Unregister,
    /// Power the VM on, answering any question it asks
    Poweron,
    /// Power the VM off
    Poweroff,
    /// Rename the VM
    ChangeName {
        /// New VM name
        new_name: String,
    },
}

pub async fn run(session: &Session, args: VmCommand) -> Result<()> {
    let vm = VirtualMachine::find(session, &args.target.identity()?).await?;

    match args.action {
        VmAction::Info => {
            print_record(&vm.info());
            for disk in vm.disks() {
                print_separator();
                print_record(&disk.info());
            }
            for snap in vm.snapshots(session).await? {
                print_separator();
                print_record(&snap.info());
            }
        }
        VmAction::CreateSnapshot {
            name,
            description,
            memory,
            no_quiesce,
        } => {
            let opts = SnapshotOptions {
                description,
                memory,
                quiesce: !no_quiesce,
            };
            let moref = vm.create_snapshot(session, &name, &opts).await?;
            match moref {
                Some(m) => println!("Snapshot '{name}' created ({})", m.value),
                None => println!("Snapshot '{name}' created"),
            }
        }
        VmAction::DeleteSnapshot {
            name,
            remove_children,
        } => {
            vm.snapshot(session, &name)
                .await?
                .delete(session, remove_children)
                .await?;
            println!("Snapshot '{name}' removed");
        }
        VmAction::DeleteAllSnapshots => {
            vm.delete_all_snapshots(session).await?;
            println!("All snapshots of '{}' removed", vm.name);
        }
        VmAction::ListSnapshots => {
            let tree = vm.snapshot_tree();
            let nodes = snapshot::flatten(&tree);
            if nodes.is_empty() {
                println!("No snapshots found...");
                return Ok(());
            }
            for node in nodes {
                println!("{}", node.name);
            }
        }
        VmAction::Snapinfo { name } => {
            let snap = vm.snapshot(session, &name).await?;
            print_record(&snap.info());
            for disk in &snap.disks {
                print_separator();
                print_record(&disk.info());
            }
        }
        VmAction::EnableCbt => {
            vm.set_change_tracking(session, true).await?;
            println!("Change block tracking enabled on '{}'", vm.name);
        }
        VmAction::DisableCbt => {
            vm.set_change_tracking(session, false).await?;
            println!("Change block tracking disabled on '{}'", vm.name);
        }
        VmAction::DownloadVmx { output } => {
            let path = match output {
                Some(p) => p,
                None => {
                    let (_, path) = tempfile::Builder::new()
                        .prefix(&format!("vm_{}", vm.name))
                        .suffix(".vmx")
                        .tempfile()
                        .into_diagnostic()?
                        .keep()
                        .into_diagnostic()?;
                    path
                }
            };
            vm.download_vmx(session, &path).await?;
            println!("VMX downloaded to {}", path.display());
        }
        VmAction::Diskinfo {
            key,
            snapname,
            from_changeid,
            ca,
        } => match snapname {
            Some(snapname) => {
                let snap = vm.snapshot(session, &snapname).await?;
                let disk = snap.disk(key)?;
                print_record(&disk.info());
                if ca {
                    let change_id = from_changeid.as_deref().unwrap_or("*");
                    info!(disk = key, snapshot = %snapname, change_id, "querying changed areas");
                    let areas = disk.changed_areas(session, &vm.moref, change_id).await?;
                    print_separator();
                    println!("{:>20}  {:>20}", "START", "LENGTH");
                    for (start, length) in &areas {
                        println!("{start:>20}  {length:>20}");
                    }
                    println!("{} changed area(s)", areas.len());
                }
            }
            None => {
                let disk = vm.disk(key)?;
                print_record(&disk.info());
                if ca {
                    return Err(VsphereError::SnapshotDiskRequired.into());
                }
            }
        },
        VmAction::AddDisk { size_gb, format } => {
            let bytes = convert_to_bytes(size_gb, Some(SizeUnit::GB))?;
            vm.add_disk(session, bytes, format.into()).await?;
            println!("Added {size_gb} GB disk to '{}'", vm.name);
        }
        VmAction::DeleteDisk { key, destroy_file } => {
            vm.delete_disk(session, key, destroy_file).await?;
            println!("Disk {key} removed from '{}'", vm.name);
        }
        VmAction::ResizeDisk { key, size_gb } => {
            let bytes = convert_to_bytes(size_gb, Some(SizeUnit::GB))?;
            vm.resize_disk(session, key, bytes).await?;
            println!("Disk {key} of '{}' resized to {size_gb} GB", vm.name);
        }
        VmAction::AddScsiController => {
            vm.add_scsi_controller(session).await?;
            println!("SCSI controller added to '{}'", vm.name);
        }
        VmAction::Register { vmx_path, name } => {
            let moref = vm.register(session, &vmx_path, name.as_deref()).await?;
            match moref {
                Some(m) => println!("Registered {vmx_path} ({})", m.value),
                None => println!("Registered {vmx_path}"),
            }
        }
        VmAction::Unregister => {
            vm.unregister(session).await?;
            println!("VM '{}' unregistered", vm.name);
        }
        VmAction::Poweron => {
            let prompt = StdinPrompt::default();
            let result = vm.power_on(session, &prompt).await;
            prompt.finish();
            result?;
            println!("VM '{}' powered on", vm.name);
        }
        VmAction::Poweroff => {
            vm.power_off(session).await?;
            println!("VM '{}' powered off", vm.name);
        }
        VmAction::ChangeName { new_name } => {
            vm.rename(session, &new_name).await?;
            println!("VM '{}' renamed to '{new_name}'", vm.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TargetOnly {
        #[command(flatten)]
        target: VmTarget,
    }

    #[test]
    fn exactly_one_target_is_accepted() {
        let t = TargetOnly::try_parse_from(["t", "--ipath", "DC/vm/web01"]).unwrap();
        assert_eq!(
            t.target.identity().unwrap(),
            VmIdentity::InventoryPath("DC/vm/web01".into())
        );

        let t = TargetOnly::try_parse_from(["t", "--ip", "10.0.0.5"]).unwrap();
        assert_eq!(t.target.identity().unwrap(), VmIdentity::Ip("10.0.0.5".into()));
    }

    #[test]
    fn missing_or_conflicting_targets_are_rejected() {
        assert!(TargetOnly::try_parse_from(["t"]).is_err());
        assert!(
            TargetOnly::try_parse_from(["t", "--ip", "10.0.0.5", "--uuid", "4211-aa"]).is_err()
        );
    }
}
