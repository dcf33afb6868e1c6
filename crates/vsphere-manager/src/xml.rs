//! A small, namespace-agnostic XML element tree.
//!
//! Responses from the vSphere web service are parsed into [`Element`]s with namespace
//! prefixes stripped, keeping only the `xsi:type` of each element. The same type is used
//! to build request bodies, so a device read from the server can be sent back verbatim.

use std::fmt::Display;
use std::str::FromStr;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::{Result, VsphereError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub xsi_type: Option<String>,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// An element carrying an explicit `xsi:type`, needed wherever the schema
    /// declares a base type (devices, backings, selection specs).
    pub fn typed(name: impl Into<String>, xsi_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xsi_type: Some(xsi_type.into()),
            ..Default::default()
        }
    }

    /// A text-only element.
    pub fn leaf(name: impl Into<String>, value: impl Display) -> Self {
        Self {
            name: name.into(),
            text: value.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Append `child` only when present.
    pub fn with_opt_child(mut self, child: Option<Element>) -> Self {
        if let Some(child) = child {
            self.children.push(child);
        }
        self
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Descend along a dotted path of child names, e.g. `"deviceInfo.label"`.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('.').try_fold(self, |el, name| el.child(name))
    }

    pub fn text_of(&self, path: &str) -> Option<&str> {
        self.find(path).map(|e| e.text.as_str())
    }

    /// Parse the trimmed text at `path`.
    pub fn value_of<T: FromStr>(&self, path: &str) -> Option<T> {
        self.text_of(path).and_then(|t| t.trim().parse().ok())
    }

    /// Replace the text of the child `name`, appending the child if it is missing.
    pub fn set_child_text(&mut self, name: &str, value: impl Display) {
        match self.child_mut(name) {
            Some(child) => child.text = value.to_string(),
            None => self.children.push(Element::leaf(name, value)),
        }
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer).map_err(xml_error)?;
        String::from_utf8(writer.into_inner()).map_err(xml_error)
    }

    /// Write this element and its subtree. `xsi:type` comes first, then the
    /// attributes in insertion order.
    pub fn write_to<W: std::io::Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        if let Some(ty) = &self.xsi_type {
            start.push_attribute(("xsi:type", ty.as_str()));
        }
        for (k, v) in &self.attrs {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if self.children.is_empty() && self.text.is_empty() {
            return writer.write_event(Event::Empty(start));
        }

        writer.write_event(Event::Start(start))?;
        if !self.text.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&self.text)))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))
    }

    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(start) => stack.push(start_element(&start)?),
                Event::Empty(start) => {
                    let el = start_element(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => return Ok(el),
                    }
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text.unescape().map_err(xml_error)?);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let mut el = stack.pop().ok_or_else(|| VsphereError::Xml {
                        detail: "unbalanced end tag".into(),
                    })?;
                    if !el.children.is_empty() && el.text.trim().is_empty() {
                        el.text.clear();
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => return Ok(el),
                    }
                }
                Event::Eof => {
                    return Err(VsphereError::Xml {
                        detail: "document has no root element".into(),
                    });
                }
                _ => {}
            }
        }
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<Element> {
    let mut el = Element::new(String::from_utf8_lossy(start.local_name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let full = attr.key.as_ref();
        if full == b"xmlns" || full.starts_with(b"xmlns:") {
            continue;
        }
        let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();

        if local == "type" && attr.key.prefix().is_some() {
            let bare = value.rsplit(':').next().unwrap_or(&value).to_string();
            el.xsi_type = Some(bare);
        } else {
            el.attrs.push((local, value));
        }
    }

    Ok(el)
}

fn xml_error(e: impl Display) -> VsphereError {
    VsphereError::Xml {
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<returnval xmlns="urn:vim25" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <obj type="VirtualMachine">vm-42</obj>
  <val xsi:type="ArrayOfVirtualDevice">
    <VirtualDevice xsi:type="VirtualDisk">
      <key>2000</key>
      <deviceInfo><label>Hard disk 1</label><summary>16,777,216 KB</summary></deviceInfo>
      <backing xsi:type="VirtualDiskFlatVer2BackingInfo">
        <fileName>[ds1] web &amp; db/web.vmdk</fileName>
      </backing>
    </VirtualDevice>
  </val>
</returnval>"#;

    #[test]
    fn parse_strips_namespaces_and_keeps_types() {
        let root = Element::parse(DEVICE).unwrap();
        assert_eq!(root.name, "returnval");
        assert_eq!(root.attrs, Vec::<(String, String)>::new());

        let obj = root.child("obj").unwrap();
        assert_eq!(obj.attr("type"), Some("VirtualMachine"));
        assert_eq!(obj.text(), "vm-42");

        let val = root.child("val").unwrap();
        assert_eq!(val.xsi_type.as_deref(), Some("ArrayOfVirtualDevice"));
        assert_eq!(val.text(), "");

        let disk = val.child("VirtualDevice").unwrap();
        assert_eq!(disk.xsi_type.as_deref(), Some("VirtualDisk"));
        assert_eq!(disk.value_of::<i32>("key"), Some(2000));
        assert_eq!(disk.text_of("deviceInfo.label"), Some("Hard disk 1"));
        assert_eq!(
            disk.text_of("backing.fileName"),
            Some("[ds1] web & db/web.vmdk")
        );
        assert!(disk.find("backing.parent").is_none());
    }

    #[test]
    fn prefixed_type_values_lose_their_prefix() {
        let root = Element::parse(
            r#"<val xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xsi:type="xsd:boolean">true</val>"#,
        )
        .unwrap();
        assert_eq!(root.xsi_type.as_deref(), Some("boolean"));
        assert_eq!(root.text().parse::<bool>().ok(), Some(true));
    }

    #[test]
    fn serializer_escapes_text_and_attributes() {
        let el = Element::new("spec")
            .with_child(Element::leaf("name", "a<b & \"c\""))
            .with_child(Element::leaf("_this", "vm-1").with_attr("type", "VirtualMachine"))
            .with_child(Element::typed("device", "VirtualDisk"));
        assert_eq!(
            el.to_xml().unwrap(),
            "<spec><name>a&lt;b &amp; &quot;c&quot;</name>\
             <_this type=\"VirtualMachine\">vm-1</_this>\
             <device xsi:type=\"VirtualDisk\"/></spec>"
        );
    }

    #[test]
    fn empty_elements_self_close_with_escaped_attributes() {
        let el = Element::new("obj").with_attr("type", "a&b");
        assert_eq!(el.to_xml().unwrap(), r#"<obj type="a&amp;b"/>"#);

        let nested = Element::new("location").with_child(Element::new("pool"));
        assert_eq!(nested.to_xml().unwrap(), "<location><pool/></location>");
    }

    #[test]
    fn reparsed_device_serializes_with_its_type() {
        let root = Element::parse(DEVICE).unwrap();
        let disk = root.find("val.VirtualDevice").unwrap().clone().renamed("device");
        let xml = disk.to_xml().unwrap();
        assert!(xml.starts_with("<device xsi:type=\"VirtualDisk\"><key>2000</key>"));
        assert!(xml.contains("<backing xsi:type=\"VirtualDiskFlatVer2BackingInfo\">"));
        assert!(xml.contains("[ds1] web &amp; db/web.vmdk"));
    }

    #[test]
    fn set_child_text_replaces_or_appends() {
        let mut el = Element::new("device").with_child(Element::leaf("capacityInKB", 1));
        el.set_child_text("capacityInKB", 2048);
        el.set_child_text("capacityInBytes", 2097152);
        assert_eq!(el.text_of("capacityInKB"), Some("2048"));
        assert_eq!(el.text_of("capacityInBytes"), Some("2097152"));
    }

    #[test]
    fn truncated_document_is_an_error() {
        assert!(Element::parse("<a><b>").is_err());
        assert!(Element::parse("").is_err());
    }
}
