//! Minimal XML element tree for vim25 SOAP responses.

use crate::error::{VclibError, VclibResult};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;

/// One element: local name, qualified attributes, children and text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child called `name`.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Attribute by exact (qualified) name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a prefixed `type` attribute (normally `xsi:type`).
    pub fn xsi_type(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.split_once(':').is_some_and(|(_, local)| local == "type"))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a document and return its root element.
pub fn parse(xml: &str) -> VclibResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(element_from(e)?),
            Ok(Event::Empty(ref e)) => {
                let el = element_from(e)?;
                attach(&mut stack, &mut root, el);
            }
            Ok(Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| VclibError::parse("Unbalanced closing tag in response"))?;
                attach(&mut stack, &mut root, el);
            }
            Ok(Event::Text(ref t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(VclibError::parse(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(VclibError::parse("Truncated XML document"));
    }
    root.ok_or_else(|| VclibError::parse("Empty XML document"))
}

fn element_from(e: &BytesStart<'_>) -> VclibResult<XmlElement> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| VclibError::parse(format!("Bad attribute on <{name}>: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        attributes.push((key, attr.unescape_value()?.into_owned()));
    }
    Ok(XmlElement { name, attributes, ..Default::default() })
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}

/// Escape text for inclusion in an element body or attribute.
pub fn escape(s: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_with_prefixes() {
        let doc = r#"<?xml version="1.0"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <soapenv:Body>
    <FindByInventoryPathResponse xmlns="urn:vim25">
      <returnval type="Datacenter">datacenter-2</returnval>
    </FindByInventoryPathResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "Envelope");
        let ret = root
            .child("Body")
            .and_then(|b| b.child("FindByInventoryPathResponse"))
            .and_then(|r| r.child("returnval"))
            .unwrap();
        assert_eq!(ret.attr("type"), Some("Datacenter"));
        assert_eq!(ret.text, "datacenter-2");
        assert!(ret.xsi_type().is_none());
    }

    #[test]
    fn distinguishes_xsi_type_from_plain_type() {
        let root = parse(r#"<val xmlns:xsi="x" xsi:type="ManagedObjectReference" type="Folder">group-d1</val>"#).unwrap();
        assert_eq!(root.xsi_type(), Some("ManagedObjectReference"));
        assert_eq!(root.attr("type"), Some("Folder"));
        assert_eq!(root.attributes.len(), 2);
    }

    #[test]
    fn unescapes_text_and_collects_repeats() {
        let root = parse("<a><b>x &amp; y</b><b>z</b><c/></a>").unwrap();
        assert_eq!(root.children_named("b").count(), 2);
        assert_eq!(root.child_text("b"), Some("x & y"));
        assert!(root.child("c").is_some());
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(parse("<a><b>").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn escape_round_trips_markup() {
        assert_eq!(escape("[ds] a<b>&c"), "[ds] a&lt;b&gt;&amp;c");
    }
}
