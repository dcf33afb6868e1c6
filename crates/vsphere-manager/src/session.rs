use tracing::{debug, info, warn};

use crate::error::{Result, VsphereError};
use crate::property::{self, PropertySet};
use crate::soap::SoapClient;
use crate::types::{ConnectionConfig, ManagedObjectRef};
use crate::xml::Element;

/// `ServiceInstance.about`.
#[derive(Debug, Clone, Default)]
pub struct AboutInfo {
    pub full_name: String,
    pub api_version: String,
    pub instance_uuid: Option<String>,
}

/// The service-level managers used by this crate.
#[derive(Debug, Clone)]
pub struct ServiceContent {
    pub root_folder: ManagedObjectRef,
    pub property_collector: ManagedObjectRef,
    pub view_manager: ManagedObjectRef,
    pub session_manager: ManagedObjectRef,
    pub search_index: ManagedObjectRef,
    pub diagnostic_manager: Option<ManagedObjectRef>,
    pub about: AboutInfo,
}

impl ServiceContent {
    fn from_element(el: &Element) -> Result<Self> {
        let moref = |name: &str| {
            el.child(name)
                .and_then(ManagedObjectRef::from_element)
                .ok_or_else(|| {
                    VsphereError::unexpected(
                        "RetrieveServiceContent",
                        format!("service content has no {name}"),
                    )
                })
        };

        Ok(Self {
            root_folder: moref("rootFolder")?,
            property_collector: moref("propertyCollector")?,
            view_manager: moref("viewManager")?,
            session_manager: moref("sessionManager")?,
            search_index: moref("searchIndex")?,
            diagnostic_manager: el
                .child("diagnosticManager")
                .and_then(ManagedObjectRef::from_element),
            about: AboutInfo {
                full_name: el.text_of("about.fullName").unwrap_or_default().to_string(),
                api_version: el.text_of("about.apiVersion").unwrap_or_default().to_string(),
                instance_uuid: el.text_of("about.instanceUuid").map(str::to_string),
            },
        })
    }
}

fn service_instance() -> ManagedObjectRef {
    ManagedObjectRef::new("ServiceInstance", "ServiceInstance")
}

/// An authenticated session with a vCenter or ESXi server.
pub struct Session {
    soap: SoapClient,
    content: ServiceContent,
    config: ConnectionConfig,
}

impl Session {
    /// Retrieve the service content and log in.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        info!(host = %config.host, user = %config.username, "connecting to vSphere server");

        let soap = SoapClient::new(&config.host, config.insecure)?;
        let resp = soap
            .invoke("RetrieveServiceContent", &service_instance(), vec![])
            .await?;
        let content = resp
            .child("returnval")
            .ok_or_else(|| VsphereError::unexpected("RetrieveServiceContent", "no returnval"))
            .and_then(ServiceContent::from_element)?;

        soap.invoke(
            "Login",
            &content.session_manager,
            vec![
                Element::leaf("userName", &config.username),
                Element::leaf("password", &config.password),
            ],
        )
        .await?;

        info!(
            host = %config.host,
            server = %content.about.full_name,
            api_version = %content.about.api_version,
            "logged in"
        );

        Ok(Self {
            soap,
            content,
            config,
        })
    }

    pub async fn logout(&self) -> Result<()> {
        debug!(host = %self.config.host, "logging out");
        self.soap
            .invoke("Logout", &self.content.session_manager, vec![])
            .await?;
        Ok(())
    }

    pub fn content(&self) -> &ServiceContent {
        &self.content
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        self.soap.http()
    }

    pub async fn invoke(
        &self,
        method: &str,
        this: &ManagedObjectRef,
        args: Vec<Element>,
    ) -> Result<Element> {
        self.soap.invoke(method, this, args).await
    }

    /// Invoke a method whose return value is a managed object reference (tasks,
    /// filters, views).
    pub async fn invoke_for_ref(
        &self,
        method: &str,
        this: &ManagedObjectRef,
        args: Vec<Element>,
    ) -> Result<ManagedObjectRef> {
        let resp = self.invoke(method, this, args).await?;
        resp.child("returnval")
            .and_then(ManagedObjectRef::from_element)
            .ok_or_else(|| VsphereError::unexpected(method, "no managed object reference returned"))
    }

    /// Server clock, as an `xsd:dateTime` string.
    pub async fn current_time(&self) -> Result<String> {
        let resp = self.invoke("CurrentTime", &service_instance(), vec![]).await?;
        resp.text_of("returnval")
            .map(str::to_string)
            .ok_or_else(|| VsphereError::unexpected("CurrentTime", "no returnval"))
    }

    /// Read `paths` of a single object.
    pub async fn properties(&self, obj: &ManagedObjectRef, paths: &[&str]) -> Result<PropertySet> {
        let mut sets = self
            .properties_of_many(&obj.kind, std::slice::from_ref(obj), paths)
            .await?;
        match sets.pop() {
            Some(set) => Ok(set),
            None => Err(VsphereError::not_found("managed object", obj.to_string())),
        }
    }

    /// Read `paths` of several objects of the same type in one round trip.
    pub async fn properties_of_many(
        &self,
        kind: &str,
        objs: &[ManagedObjectRef],
        paths: &[&str],
    ) -> Result<Vec<PropertySet>> {
        if objs.is_empty() {
            return Ok(Vec::new());
        }
        self.retrieve(property::filter_spec("specSet", kind, objs, paths))
            .await
    }

    /// Read `paths` of every object of type `kind` below `container`.
    pub async fn properties_in_container(
        &self,
        container: &ManagedObjectRef,
        kind: &str,
        paths: &[&str],
    ) -> Result<Vec<PropertySet>> {
        let view = self
            .invoke_for_ref(
                "CreateContainerView",
                &self.content.view_manager,
                vec![
                    container.to_element("container"),
                    Element::leaf("type", kind),
                    Element::leaf("recursive", true),
                ],
            )
            .await?;

        let result = self
            .retrieve(property::view_filter_spec(&view, kind, paths))
            .await;

        if let Err(e) = self.invoke("DestroyView", &view, vec![]).await {
            warn!(view = %view, error = %e, "failed to destroy container view");
        }
        result
    }

    /// `RetrievePropertiesEx`, following continuation tokens.
    async fn retrieve(&self, spec: Element) -> Result<Vec<PropertySet>> {
        let pc = &self.content.property_collector;
        let resp = self
            .invoke(
                "RetrievePropertiesEx",
                pc,
                vec![spec, Element::new("options")],
            )
            .await?;

        let mut sets = Vec::new();
        let mut page = resp.child("returnval").cloned();

        while let Some(result) = page.take() {
            sets.extend(
                result
                    .children_named("objects")
                    .filter_map(PropertySet::from_object_content),
            );
            if let Some(token) = result.text_of("token") {
                let resp = self
                    .invoke(
                        "ContinueRetrievePropertiesEx",
                        pc,
                        vec![Element::leaf("token", token)],
                    )
                    .await?;
                page = resp.child("returnval").cloned();
            }
        }

        Ok(sets)
    }

    /// `SearchIndex.FindByIp`. With `vm_search` unset, hosts are searched instead of VMs.
    pub async fn find_by_ip(&self, ip: &str, vm_search: bool) -> Result<Option<ManagedObjectRef>> {
        self.search(
            "FindByIp",
            vec![Element::leaf("ip", ip), Element::leaf("vmSearch", vm_search)],
        )
        .await
    }

    pub async fn find_by_inventory_path(&self, path: &str) -> Result<Option<ManagedObjectRef>> {
        self.search(
            "FindByInventoryPath",
            vec![Element::leaf("inventoryPath", path)],
        )
        .await
    }

    pub async fn find_by_uuid(
        &self,
        uuid: &str,
        vm_search: bool,
        instance_uuid: bool,
    ) -> Result<Option<ManagedObjectRef>> {
        self.search(
            "FindByUuid",
            vec![
                Element::leaf("uuid", uuid),
                Element::leaf("vmSearch", vm_search),
                Element::leaf("instanceUuid", instance_uuid),
            ],
        )
        .await
    }

    async fn search(&self, method: &str, args: Vec<Element>) -> Result<Option<ManagedObjectRef>> {
        let resp = self.invoke(method, &self.content.search_index, args).await?;
        Ok(resp
            .child("returnval")
            .and_then(ManagedObjectRef::from_element))
    }
}
