use clap::{Args, Subcommand, ValueEnum};
use miette::Result;
use vsphere_manager::{Host, NasAccessMode, NasDatastoreSpec, NasType, Session};

use super::output::print_record;

#[derive(Args)]
pub struct HostCommand {
    /// Management IP of the host
    #[arg(long)]
    ip: String,

    #[command(subcommand)]
    action: HostAction,
}

#[derive(Subcommand)]
enum HostAction {
    /// Show host details
    Info,
    /// List datastores mounted on the host
    ListDatastores,
    /// Mount an NFS or CIFS share as a datastore
    CreateNasDatastore(CreateNasArgs),
    /// Remove a datastore from the host
    DeleteDatastore {
        /// Datastore name
        name: String,
    },
    /// List diagnostic log files available for the host
    ListLogs,
}

#[derive(Args)]
struct CreateNasArgs {
    /// Datastore name
    #[arg(long)]
    name: String,

    /// NAS server name or IP
    #[arg(long)]
    nashost: String,

    /// Exported share path on the NAS server
    #[arg(long)]
    share: String,

    /// Access mode
    #[arg(long, value_enum, default_value_t = AccessMode::Rw)]
    amode: AccessMode,

    /// Share protocol
    #[arg(long, value_enum, default_value_t = ShareType::Nfs)]
    dstype: ShareType,
}

#[derive(Clone, Copy, ValueEnum)]
enum AccessMode {
    Ro,
    Rw,
}

impl From<AccessMode> for NasAccessMode {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Ro => NasAccessMode::ReadOnly,
            AccessMode::Rw => NasAccessMode::ReadWrite,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ShareType {
    Nfs,
    Cifs,
}

impl From<ShareType> for NasType {
    fn from(t: ShareType) -> Self {
        match t {
            ShareType::Nfs => NasType::Nfs,
            ShareType::Cifs => NasType::Cifs,
        }
    }
}

pub async fn run(session: &Session, args: HostCommand) -> Result<()> {
    let host = Host::find_by_ip(session, &args.ip).await?;

    match args.action {
        HostAction::Info => print_record(&host.info()),
        HostAction::ListDatastores => {
            let datastores = host.datastores(session).await?;
            if datastores.is_empty() {
                println!("No datastores found...");
                return Ok(());
            }

            println!("{:<30} {:<8} {:>14} {:>14}", "NAME", "TYPE", "CAPACITY", "FREE");
            println!("{}", "-".repeat(70));
            for ds in datastores {
                println!(
                    "{:<30} {:<8} {:>14} {:>14}",
                    ds.name,
                    ds.dstype,
                    ds.capacity_readable(),
                    ds.free_space_readable()
                );
            }
        }
        HostAction::CreateNasDatastore(nas) => {
            let spec = NasDatastoreSpec {
                name: nas.name,
                remote_host: nas.nashost,
                remote_path: nas.share,
                access_mode: nas.amode.into(),
                nas_type: nas.dstype.into(),
            };
            let moref = host.create_nas_datastore(session, &spec).await?;
            println!("Datastore '{}' created ({})", spec.name, moref.value);
        }
        HostAction::DeleteDatastore { name } => {
            host.remove_datastore(session, &name).await?;
            println!("Datastore '{name}' removed");
        }
        HostAction::ListLogs => {
            let logs = host.list_logs(session).await?;
            if logs.is_empty() {
                println!("No logs found...");
                return Ok(());
            }

            println!("{:<20} {:<50} CREATOR", "KEY", "FILE");
            println!("{}", "-".repeat(90));
            for log in logs {
                println!("{:<20} {:<50} {}", log.key, log.file_name, log.creator);
            }
        }
    }

    Ok(())
}
