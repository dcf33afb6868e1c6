//! Property collector request builders and the decoded `ObjectContent`.

use std::str::FromStr;

use crate::types::ManagedObjectRef;
use crate::xml::Element;

/// Properties of one managed object as returned by `RetrievePropertiesEx`.
///
/// Only properties that are set on the server are present.
#[derive(Debug, Clone)]
pub struct PropertySet {
    pub obj: ManagedObjectRef,
    props: Vec<(String, Element)>,
}

impl PropertySet {
    /// Decode an `ObjectContent` element. Returns `None` when it has no `obj`.
    pub fn from_object_content(el: &Element) -> Option<Self> {
        let obj = ManagedObjectRef::from_element(el.child("obj")?)?;
        let props = el
            .children_named("propSet")
            .filter_map(|p| {
                let name = p.text_of("name")?.to_string();
                let val = p.child("val")?.clone();
                Some((name, val))
            })
            .collect();
        Some(Self { obj, props })
    }

    /// Value of `path`, or of a sub-path inside a retrieved property.
    ///
    /// `get("config.hardware.device")` finds the property of that exact name;
    /// `get("summary.config.name")` also works when only `summary` was retrieved.
    pub fn get(&self, path: &str) -> Option<&Element> {
        if let Some((_, val)) = self.props.iter().find(|(name, _)| name == path) {
            return Some(val);
        }
        self.props.iter().find_map(|(name, val)| {
            let rest = path.strip_prefix(name.as_str())?.strip_prefix('.')?;
            val.find(rest)
        })
    }

    pub fn text(&self, path: &str) -> Option<&str> {
        self.get(path).map(Element::text)
    }

    pub fn string(&self, path: &str) -> Option<String> {
        self.text(path).map(str::to_string)
    }

    pub fn parse<T: FromStr>(&self, path: &str) -> Option<T> {
        self.text(path).and_then(|t| t.trim().parse().ok())
    }

    pub fn flag(&self, path: &str) -> bool {
        self.parse::<bool>(path).unwrap_or(false)
    }

    pub fn moref(&self, path: &str) -> Option<ManagedObjectRef> {
        self.get(path).and_then(ManagedObjectRef::from_element)
    }

    /// References held by an `ArrayOfManagedObjectReference` property.
    pub fn morefs(&self, path: &str) -> Vec<ManagedObjectRef> {
        self.get(path)
            .map(|arr| {
                arr.children
                    .iter()
                    .filter_map(ManagedObjectRef::from_element)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Build a `PropertyFilterSpec` named `name` reading `paths` of every object in `objs`.
/// All objects must be of type `kind`.
pub fn filter_spec(name: &str, kind: &str, objs: &[ManagedObjectRef], paths: &[&str]) -> Element {
    Element::new(name)
        .with_child(prop_spec(kind, paths))
        .with_children(objs.iter().map(|obj| {
            Element::new("objectSet").with_child(obj.to_element("obj"))
        }))
}

/// Build a `PropertyFilterSpec` reading `paths` of every object of type `kind`
/// reachable through the `view` property of a container view.
pub fn view_filter_spec(view: &ManagedObjectRef, kind: &str, paths: &[&str]) -> Element {
    let traversal = Element::typed("selectSet", "TraversalSpec")
        .with_child(Element::leaf("name", "traverseView"))
        .with_child(Element::leaf("type", "ContainerView"))
        .with_child(Element::leaf("path", "view"))
        .with_child(Element::leaf("skip", false));

    Element::new("specSet")
        .with_child(prop_spec(kind, paths))
        .with_child(
            Element::new("objectSet")
                .with_child(view.to_element("obj"))
                .with_child(Element::leaf("skip", true))
                .with_child(traversal),
        )
}

fn prop_spec(kind: &str, paths: &[&str]) -> Element {
    Element::new("propSet")
        .with_child(Element::leaf("type", kind))
        .with_children(paths.iter().map(|p| Element::leaf("pathSet", p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_content() -> Element {
        Element::parse(
            r#"<objects xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                 <obj type="HostSystem">host-10</obj>
                 <propSet><name>name</name><val xsi:type="xsd:string">esx01.lab</val></propSet>
                 <propSet>
                   <name>summary</name>
                   <val xsi:type="HostListSummary">
                     <config><name>esx01.lab</name><product><fullName>VMware ESXi 8.0.2</fullName></product></config>
                   </val>
                 </propSet>
                 <propSet>
                   <name>datastore</name>
                   <val xsi:type="ArrayOfManagedObjectReference">
                     <ManagedObjectReference type="Datastore">datastore-1</ManagedObjectReference>
                     <ManagedObjectReference type="Datastore">datastore-2</ManagedObjectReference>
                   </val>
                 </propSet>
                 <propSet><name>runtime.inMaintenanceMode</name><val xsi:type="xsd:boolean">true</val></propSet>
               </objects>"#,
        )
        .unwrap()
    }

    #[test]
    fn decodes_object_content() {
        let set = PropertySet::from_object_content(&object_content()).unwrap();
        assert_eq!(set.obj, ManagedObjectRef::new("HostSystem", "host-10"));
        assert_eq!(set.text("name"), Some("esx01.lab"));
        assert_eq!(
            set.text("summary.config.product.fullName"),
            Some("VMware ESXi 8.0.2")
        );
        assert!(set.flag("runtime.inMaintenanceMode"));
        assert!(!set.flag("runtime.missing"));
        assert_eq!(
            set.morefs("datastore"),
            vec![
                ManagedObjectRef::new("Datastore", "datastore-1"),
                ManagedObjectRef::new("Datastore", "datastore-2"),
            ]
        );
        assert!(set.get("summ").is_none());
    }

    #[test]
    fn filter_spec_lists_paths_then_objects() {
        let spec = filter_spec(
            "specSet",
            "Task",
            &[ManagedObjectRef::new("Task", "task-1")],
            &["info"],
        );
        assert_eq!(
            spec.to_xml().unwrap(),
            "<specSet><propSet><type>Task</type><pathSet>info</pathSet></propSet>\
             <objectSet><obj type=\"Task\">task-1</obj></objectSet></specSet>"
        );
    }

    #[test]
    fn view_filter_spec_traverses_the_view() {
        let view = ManagedObjectRef::new("ContainerView", "session[1]view-1");
        let xml = view_filter_spec(&view, "VirtualMachine", &["name"]).to_xml().unwrap();
        assert!(xml.contains("<skip>true</skip><selectSet xsi:type=\"TraversalSpec\">"));
        assert!(xml.contains("<path>view</path><skip>false</skip>"));
    }
}
