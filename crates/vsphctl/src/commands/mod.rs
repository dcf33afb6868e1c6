pub mod host;
pub mod output;
pub mod prompt;
pub mod server;
pub mod vm;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::Result;
use tracing::warn;
use vsphere_manager::{ConnectionConfig, DiskFormat, Session};

#[derive(Parser)]
#[command(
    name = "vsphctl",
    about = "Manage vSphere hosts and virtual machines",
    version
)]
pub struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConnectionArgs {
    /// vCenter or ESXi server address (name or name:port)
    #[arg(long, env = "VSPHCTL_HOST")]
    host: String,

    /// User name
    #[arg(long, env = "VSPHCTL_USERNAME")]
    username: String,

    /// Password
    #[arg(long, env = "VSPHCTL_PASSWORD", hide_env_values = true)]
    password: String,

    /// Ignore TLS certificate errors
    #[arg(
        short = 'k',
        long,
        env = "VSPHCTL_INSECURE",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    insecure: bool,
}

impl From<ConnectionArgs> for ConnectionConfig {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            host: args.host,
            username: args.username,
            password: args.password,
            insecure: args.insecure,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Host operations (selected by management IP)
    Host(host::HostCommand),
    /// Server-wide operations
    Server(server::ServerCommand),
    /// Virtual machine operations
    Vm(vm::VmCommand),
}

/// Provisioning of new disks.
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum DiskFormatArg {
    #[default]
    Thin,
    Thick,
}

impl From<DiskFormatArg> for DiskFormat {
    fn from(arg: DiskFormatArg) -> Self {
        match arg {
            DiskFormatArg::Thin => DiskFormat::Thin,
            DiskFormatArg::Thick => DiskFormat::Thick,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let session = Session::connect(self.connection.into()).await?;

        let result = match self.command {
            Command::Host(args) => host::run(&session, args).await,
            Command::Server(args) => server::run(&session, args).await,
            Command::Vm(args) => vm::run(&session, args).await,
        };

        if let Err(e) = session.logout().await {
            warn!(error = %e, "logout failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_insecure() -> bool {
        let cli = Cli::try_parse_from([
            "vsphctl",
            "--host",
            "vc01",
            "--username",
            "admin",
            "--password",
            "secret",
            "server",
            "info",
        ])
        .unwrap();
        cli.connection.insecure
    }

    #[test]
    fn insecure_accepts_common_env_values() {
        // Only this test touches VSPHCTL_INSECURE.
        for (value, expected) in [
            ("1", true),
            ("yes", true),
            ("true", true),
            ("0", false),
            ("no", false),
            ("false", false),
        ] {
            unsafe { std::env::set_var("VSPHCTL_INSECURE", value) };
            assert_eq!(parse_insecure(), expected, "VSPHCTL_INSECURE={value}");
        }
        unsafe { std::env::remove_var("VSPHCTL_INSECURE") };
        assert!(!parse_insecure());

        let cli = Cli::try_parse_from([
            "vsphctl", "--host", "vc01", "--username", "u", "--password", "p", "-k", "server",
            "info",
        ])
        .unwrap();
        assert!(cli.connection.insecure);
    }
}
