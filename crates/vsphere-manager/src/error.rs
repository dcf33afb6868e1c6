use miette::Diagnostic;
use thiserror::Error;

/// Errors produced while talking to a vSphere management server.
#[derive(Debug, Error, Diagnostic)]
pub enum VsphereError {
    #[error("HTTP request to {url} failed")]
    #[diagnostic(
        code(vsphere::http),
        help("check that the server address is reachable; pass -k for self-signed certificates")
    )]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(vsphere::io))]
    Io(#[from] std::io::Error),

    #[error("malformed XML in server response: {detail}")]
    #[diagnostic(code(vsphere::xml))]
    Xml { detail: String },

    #[error("{method} failed: {message} ({fault})")]
    #[diagnostic(code(vsphere::fault))]
    Fault {
        method: String,
        fault: String,
        message: String,
    },

    #[error("unexpected response to {method}: {detail}")]
    #[diagnostic(code(vsphere::unexpected_response))]
    UnexpectedResponse { method: String, detail: String },

    #[error("could not find {kind} ({key})")]
    #[diagnostic(code(vsphere::not_found))]
    NotFound { kind: &'static str, key: String },

    #[error("task {task} failed: {message}")]
    #[diagnostic(code(vsphere::task_failed))]
    TaskFailed { task: String, message: String },

    #[error("could not parse datastore path ({path})")]
    #[diagnostic(
        code(vsphere::datastore_path),
        help("datastore paths look like `[datastore1] dir/file.vmx`")
    )]
    InvalidDatastorePath { path: String },

    #[error("download of {url} failed with HTTP status {status}")]
    #[diagnostic(code(vsphere::download_failed))]
    DownloadFailed { url: String, status: u16 },

    #[error("too many disks on SCSI controller {controller_key}")]
    #[diagnostic(
        code(vsphere::too_many_disks),
        help("add another controller with `vm add-scsi-controller`")
    )]
    TooManyDisks { controller_key: i32 },

    #[error("VM '{vm}' has no SCSI controller")]
    #[diagnostic(
        code(vsphere::no_scsi_controller),
        help("add one with `vm add-scsi-controller`")
    )]
    NoScsiController { vm: String },

    #[error("VM '{vm}' is {state}")]
    #[diagnostic(
        code(vsphere::invalid_power_state),
        help("pass --force to power it off first")
    )]
    InvalidPowerState { vm: String, state: String },

    #[error("unknown size unit '{unit}'")]
    #[diagnostic(
        code(vsphere::unknown_unit),
        help("valid units are B, KB, MB, GB, TB, PB and EB")
    )]
    UnknownUnit { unit: String },

    #[error("{size} {unit} does not fit in a 64-bit byte count")]
    #[diagnostic(code(vsphere::size_overflow))]
    SizeOverflow { size: u64, unit: String },

    #[error("changed areas can only be queried for a disk taken from a snapshot")]
    #[diagnostic(code(vsphere::snapshot_disk_required), help("pass --snapname"))]
    SnapshotDiskRequired,
}

impl VsphereError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn unexpected(method: &str, detail: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            method: method.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VsphereError>;
