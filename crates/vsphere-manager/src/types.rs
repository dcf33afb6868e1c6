use std::fmt;
use std::str::FromStr;

use crate::xml::Element;

/// Connection parameters for a vCenter or ESXi endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address, `name` or `name:port`.
    pub host: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed or otherwise invalid certificates.
    pub insecure: bool,
}

/// A handle to a server-side managed object, e.g. `VirtualMachine:vm-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedObjectRef {
    pub kind: String,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Read a reference from an element such as `<obj type="Task">task-17</obj>`.
    pub fn from_element(el: &Element) -> Option<Self> {
        let kind = el.attr("type")?;
        let value = el.text().trim();
        if value.is_empty() {
            return None;
        }
        Some(Self::new(kind, value))
    }

    pub fn to_element(&self, name: &str) -> Element {
        Element::leaf(name, &self.value).with_attr("type", self.kind.clone())
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// How a VM is looked up in the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmIdentity {
    /// Guest IP address as reported by VMware Tools.
    Ip(String),
    /// Inventory path, e.g. `Datacenter/vm/folder/name`.
    InventoryPath(String),
    /// BIOS UUID, falling back to the instance UUID.
    Uuid(String),
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmIdentity::Ip(ip) => write!(f, "IP: {ip}"),
            VmIdentity::InventoryPath(path) => write!(f, "inventory path: {path}"),
            VmIdentity::Uuid(uuid) => write!(f, "UUID: {uuid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::PoweredOn => write!(f, "poweredOn"),
            PowerState::PoweredOff => write!(f, "poweredOff"),
            PowerState::Suspended => write!(f, "suspended"),
        }
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poweredOn" => Ok(PowerState::PoweredOn),
            "poweredOff" => Ok(PowerState::PoweredOff),
            "suspended" => Ok(PowerState::Suspended),
            other => Err(format!("unknown power state '{other}'")),
        }
    }
}

/// `TaskInfo.state` of a server-side task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Success => write!(f, "success"),
            TaskState::Error => write!(f, "error"),
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "success" => Ok(TaskState::Success),
            "error" => Ok(TaskState::Error),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

/// Provisioning of a newly created virtual disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskFormat {
    #[default]
    Thin,
    Thick,
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskFormat::Thin => write!(f, "thin"),
            DiskFormat::Thick => write!(f, "thick"),
        }
    }
}

/// Access mode of a NAS datastore mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NasAccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl NasAccessMode {
    pub fn as_wire(self) -> &'static str {
        match self {
            NasAccessMode::ReadWrite => "readWrite",
            NasAccessMode::ReadOnly => "readOnly",
        }
    }
}

/// File system of a NAS datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NasType {
    #[default]
    Nfs,
    Cifs,
}

impl NasType {
    pub fn as_wire(self) -> &'static str {
        match self {
            NasType::Nfs => "NFS",
            NasType::Cifs => "CIFS",
        }
    }
}

/// An ordered list of labelled values, printed one per line by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(&'static str, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &'static str, value: impl fmt::Display) {
        self.fields.push((key, value.to_string()));
    }

    /// Push `value` only when it is set and non-empty.
    pub fn push_opt<T: fmt::Display>(&mut self, key: &'static str, value: Option<T>) {
        if let Some(value) = value {
            let value = value.to_string();
            if !value.is_empty() {
                self.fields.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
