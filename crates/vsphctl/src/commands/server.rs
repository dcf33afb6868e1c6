use clap::{Args, Subcommand};
use miette::Result;
use vsphere_manager::units::convert_to_bytes;
use vsphere_manager::{
    Session, SizeUnit, VirtualMachine, VmCloneSpec, VmCreateSpec, VmIdentity, inventory,
};

use super::DiskFormatArg;
use super::output::print_record;
use super::vm::VmTarget;

#[derive(Args)]
pub struct ServerCommand {
    #[command(subcommand)]
    action: ServerAction,
}

#[derive(Subcommand)]
enum ServerAction {
    /// Show server time and product version
    Info,
    /// List virtual machines
    ListVms {
        /// Only VMs whose name contains this text (case-insensitive)
        #[arg(long)]
        filter: Option<String>,
    },
    /// Create an empty VM with one disk
    CreateVm(CreateVmArgs),
    /// Clone a VM from a template
    CloneVm(CloneVmArgs),
    /// Delete a VM and its files
    DeleteVm(DeleteVmArgs),
}

#[derive(Args)]
struct CreateVmArgs {
    /// Name of the new VM
    #[arg(long)]
    name: String,

    /// Inventory path of the datacenter
    #[arg(long)]
    datacenter: String,

    /// Management IP of the host to place the VM on
    #[arg(long)]
    host_ip: String,

    /// Datastore for the VM files
    #[arg(long)]
    datastore: String,

    /// Guest OS identifier
    #[arg(long, default_value = "otherGuest64")]
    guest_id: String,

    /// Number of virtual CPUs
    #[arg(long, default_value_t = 1)]
    cpus: u32,

    /// Memory in MB
    #[arg(long, default_value_t = 1024)]
    memory_mb: u64,

    /// Size of the disk in GB
    #[arg(long, default_value_t = 16)]
    disk_gb: u64,

    /// Disk provisioning
    #[arg(long, value_enum, default_value_t)]
    format: DiskFormatArg,
}

#[derive(Args)]
struct CloneVmArgs {
    /// Inventory path of the template
    #[arg(long)]
    template: String,

    /// Name of the new VM
    #[arg(long)]
    name: String,

    /// Management IP of the host to place the clone on
    #[arg(long)]
    host_ip: String,

    /// Datastore for the clone (defaults to the template's)
    #[arg(long)]
    datastore: Option<String>,

    /// Power the clone on once created
    #[arg(long)]
    power_on: bool,
}

#[derive(Args)]
struct DeleteVmArgs {
    #[command(flatten)]
    target: VmTarget,

    /// Power the VM off first if it is running
    #[arg(long)]
    force: bool,
}

pub async fn run(session: &Session, args: ServerCommand) -> Result<()> {
    match args.action {
        ServerAction::Info => print_record(&inventory::server_info(session).await?),
        ServerAction::ListVms { filter } => {
            let vms = inventory::list_vms(session, filter.as_deref()).await?;
            if vms.is_empty() {
                println!("No VMs found...");
                return Ok(());
            }

            println!("{:<40} {:<12} {:<40} MOREF", "NAME", "STATE", "GUEST");
            println!("{}", "-".repeat(110));
            for vm in vms {
                let state = vm
                    .power_state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".into());
                let name = if vm.template {
                    format!("{} (template)", vm.name)
                } else {
                    vm.name
                };
                println!("{:<40} {:<12} {:<40} {}", name, state, vm.guest, vm.moref.value);
            }
        }
        ServerAction::CreateVm(create) => {
            let spec = VmCreateSpec {
                name: create.name,
                datacenter: create.datacenter,
                host_ip: create.host_ip,
                datastore: create.datastore,
                guest_id: create.guest_id,
                num_cpus: create.cpus,
                memory_mb: create.memory_mb,
                disk_bytes: convert_to_bytes(create.disk_gb, Some(SizeUnit::GB))?,
                disk_format: create.format.into(),
            };
            let moref = inventory::create_vm(session, &spec).await?;
            println!("VM '{}' created ({})", spec.name, moref.value);
        }
        ServerAction::CloneVm(clone) => {
            let template =
                VirtualMachine::find(session, &VmIdentity::InventoryPath(clone.template)).await?;
            let spec = VmCloneSpec {
                name: clone.name,
                host_ip: clone.host_ip,
                datastore: clone.datastore,
                power_on: clone.power_on,
            };
            let moref = inventory::clone_vm(session, &template, &spec).await?;
            println!(
                "VM '{}' cloned from '{}' ({})",
                spec.name, template.name, moref.value
            );
        }
        ServerAction::DeleteVm(delete) => {
            let vm = VirtualMachine::find(session, &delete.target.identity()?).await?;
            inventory::delete_vm(session, &vm, delete.force).await?;
            println!("VM '{}' deleted", vm.name);
        }
    }

    Ok(())
}
