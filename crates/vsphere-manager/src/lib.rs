//! Client library for vSphere management servers (vCenter / ESXi) over the
//! vim25 SOAP endpoint.

pub mod datastore;
pub mod disk;
pub mod error;
pub mod host;
pub mod inventory;
pub mod property;
pub mod question;
pub mod session;
pub mod snapshot;
pub mod soap;
pub mod task;
pub mod types;
pub mod units;
pub mod vm;
pub mod xml;

pub use datastore::{Datastore, DatastorePath, NasDatastoreSpec};
pub use disk::VirtualDisk;
pub use error::{Result, VsphereError};
pub use host::{Host, LogDescriptor};
pub use inventory::{VmCloneSpec, VmCreateSpec, VmSummary};
pub use question::{Choice, QuestionPrompt, VmQuestion};
pub use session::Session;
pub use snapshot::{Snapshot, SnapshotNode};
pub use types::*;
pub use units::SizeUnit;
pub use vm::{SnapshotOptions, VirtualMachine};
