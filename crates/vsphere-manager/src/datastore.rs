use std::fmt;
use std::str::FromStr;

use crate::error::VsphereError;
use crate::property::PropertySet;
use crate::types::{ManagedObjectRef, NasAccessMode, NasType};
use crate::units::bytes_to_readable_units;

pub(crate) const DATASTORE_PATHS: &[&str] = &[
    "name",
    "summary.type",
    "summary.capacity",
    "summary.freeSpace",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datastore {
    pub moref: ManagedObjectRef,
    pub name: String,
    pub dstype: String,
    pub capacity: Option<u64>,
    pub free_space: Option<u64>,
}

impl Datastore {
    pub(crate) fn from_properties(props: &PropertySet) -> Self {
        Self {
            moref: props.obj.clone(),
            name: props.string("name").unwrap_or_default(),
            dstype: props.string("summary.type").unwrap_or_default(),
            capacity: props.parse("summary.capacity"),
            free_space: props.parse("summary.freeSpace"),
        }
    }

    pub fn capacity_readable(&self) -> String {
        self.capacity.map(bytes_to_readable_units).unwrap_or_default()
    }

    pub fn free_space_readable(&self) -> String {
        self.free_space.map(bytes_to_readable_units).unwrap_or_default()
    }
}

/// Parameters of a NAS (NFS / CIFS) datastore mount.
#[derive(Debug, Clone)]
pub struct NasDatastoreSpec {
    /// Local datastore name.
    pub name: String,
    pub remote_host: String,
    pub remote_path: String,
    pub access_mode: NasAccessMode,
    pub nas_type: NasType,
}

/// A datastore path such as `[datastore1] web01/web01.vmx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastorePath {
    pub datastore: String,
    pub path: String,
}

impl FromStr for DatastorePath {
    type Err = VsphereError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VsphereError::InvalidDatastorePath { path: s.to_string() };

        let rest = s.trim_start().strip_prefix('[').ok_or_else(invalid)?;
        let (datastore, path) = rest.split_once(']').ok_or_else(invalid)?;
        let datastore = datastore.trim();
        if datastore.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            datastore: datastore.to_string(),
            path: path.trim().to_string(),
        })
    }
}

impl fmt::Display for DatastorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.datastore, self.path)
    }
}
