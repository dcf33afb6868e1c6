use tracing::info;

use crate::datastore::{DATASTORE_PATHS, Datastore, NasDatastoreSpec};
use crate::error::{Result, VsphereError};
use crate::property::PropertySet;
use crate::session::Session;
use crate::types::{ManagedObjectRef, Record};
use crate::units::bytes_to_readable_units;
use crate::xml::Element;

const HOST_PATHS: &[&str] = &[
    "name",
    "parent",
    "datastore",
    "configManager.datastoreSystem",
    "summary.config.product.fullName",
    "summary.hardware",
    "runtime.connectionState",
    "runtime.powerState",
    "runtime.inMaintenanceMode",
];

/// A diagnostic log file offered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDescriptor {
    pub key: String,
    pub file_name: String,
    pub creator: String,
}

/// An ESXi host.
#[derive(Debug, Clone)]
pub struct Host {
    pub moref: ManagedObjectRef,
    pub name: String,
    props: PropertySet,
}

impl Host {
    pub async fn find_by_ip(session: &Session, ip: &str) -> Result<Self> {
        let moref = session
            .find_by_ip(ip, false)
            .await?
            .ok_or_else(|| VsphereError::not_found("host with IP", ip))?;
        Self::load(session, moref).await
    }

    pub async fn load(session: &Session, moref: ManagedObjectRef) -> Result<Self> {
        let props = session.properties(&moref, HOST_PATHS).await?;
        Ok(Self {
            name: props.string("name").unwrap_or_default(),
            moref,
            props,
        })
    }

    pub fn info(&self) -> Record {
        let p = &self.props;
        let mut rec = Record::new();
        rec.push("name", &self.name);
        rec.push("moref", &self.moref.value);
        rec.push_opt("product", p.text("summary.config.product.fullName"));
        rec.push_opt("vendor", p.text("summary.hardware.vendor"));
        rec.push_opt("model", p.text("summary.hardware.model"));
        rec.push_opt("cpuModel", p.text("summary.hardware.cpuModel"));
        rec.push_opt("numCpuCores", p.text("summary.hardware.numCpuCores"));
        rec.push_opt("numCpuThreads", p.text("summary.hardware.numCpuThreads"));
        rec.push_opt(
            "memory",
            p.parse::<u64>("summary.hardware.memorySize")
                .map(bytes_to_readable_units),
        );
        rec.push_opt("connectionState", p.text("runtime.connectionState"));
        rec.push_opt("powerState", p.text("runtime.powerState"));
        rec.push("inMaintenanceMode", p.flag("runtime.inMaintenanceMode"));
        rec
    }

    /// Datastores mounted on this host, sorted by name.
    pub async fn datastores(&self, session: &Session) -> Result<Vec<Datastore>> {
        let refs = self.props.morefs("datastore");
        let mut datastores: Vec<Datastore> = session
            .properties_of_many("Datastore", &refs, DATASTORE_PATHS)
            .await?
            .iter()
            .map(Datastore::from_properties)
            .collect();
        datastores.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datastores)
    }

    pub async fn datastore_by_name(&self, session: &Session, name: &str) -> Result<Datastore> {
        self.datastores(session)
            .await?
            .into_iter()
            .find(|ds| ds.name == name)
            .ok_or_else(|| VsphereError::not_found("datastore", name))
    }

    fn datastore_system(&self) -> Result<ManagedObjectRef> {
        self.props
            .moref("configManager.datastoreSystem")
            .ok_or_else(|| VsphereError::not_found("datastore system of host", &self.name))
    }

    pub async fn create_nas_datastore(
        &self,
        session: &Session,
        spec: &NasDatastoreSpec,
    ) -> Result<ManagedObjectRef> {
        let nas = Element::new("spec")
            .with_child(Element::leaf("remoteHost", &spec.remote_host))
            .with_child(Element::leaf("remotePath", &spec.remote_path))
            .with_child(Element::leaf("localPath", &spec.name))
            .with_child(Element::leaf("accessMode", spec.access_mode.as_wire()))
            .with_child(Element::leaf("type", spec.nas_type.as_wire()));

        info!(
            host = %self.name,
            name = %spec.name,
            remote = %format!("{}:{}", spec.remote_host, spec.remote_path),
            "creating NAS datastore"
        );
        session
            .invoke_for_ref("CreateNasDatastore", &self.datastore_system()?, vec![nas])
            .await
    }

    pub async fn remove_datastore(&self, session: &Session, name: &str) -> Result<()> {
        let ds = self.datastore_by_name(session, name).await?;
        info!(host = %self.name, datastore = %name, moref = %ds.moref, "removing datastore");
        session
            .invoke(
                "RemoveDatastore",
                &self.datastore_system()?,
                vec![ds.moref.to_element("datastore")],
            )
            .await?;
        Ok(())
    }

    /// Log files the diagnostic manager can serve for this host.
    pub async fn list_logs(&self, session: &Session) -> Result<Vec<LogDescriptor>> {
        let diag = session
            .content()
            .diagnostic_manager
            .as_ref()
            .ok_or_else(|| VsphereError::not_found("diagnostic manager", &session.config().host))?;

        let resp = session
            .invoke(
                "QueryDescriptions",
                diag,
                vec![self.moref.to_element("host")],
            )
            .await?;

        Ok(resp
            .children_named("returnval")
            .map(|d| LogDescriptor {
                key: d.text_of("key").unwrap_or_default().to_string(),
                file_name: d.text_of("fileName").unwrap_or_default().to_string(),
                creator: d.text_of("creator").unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// The root resource pool of the host's compute resource.
    pub async fn resource_pool(&self, session: &Session) -> Result<ManagedObjectRef> {
        let parent = self
            .props
            .moref("parent")
            .ok_or_else(|| VsphereError::not_found("compute resource of host", &self.name))?;
        session
            .properties(&parent, &["resourcePool"])
            .await?
            .moref("resourcePool")
            .ok_or_else(|| VsphereError::not_found("resource pool of host", &self.name))
    }
}
