//! Structured XML construction.
//!
//! Element-tree builder serialized through `quick_xml::Writer`. Text content
//! and attribute values are escaped centrally by the writer, so payload data
//! can never break the document structure.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// A node in the element tree.
#[derive(Debug, Clone)]
enum XmlNode {
    Element(XmlElement),
    Text(String),
    /// Pre-serialized XML emitted verbatim. Only for payloads whose bytes
    /// are covered by a digital signature and must not be re-rendered.
    Raw(String),
}

/// An XML element with attributes and children.
#[derive(Debug, Clone)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Append a child element.
    #[must_use]
    pub fn child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Append a child element only when `child` is `Some`.
    #[must_use]
    pub fn opt_child(mut self, child: Option<XmlElement>) -> Self {
        if let Some(child) = child {
            self.children.push(XmlNode::Element(child));
        }
        self
    }

    /// Append several child elements.
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = XmlElement>) -> Self {
        self.children
            .extend(children.into_iter().map(XmlNode::Element));
        self
    }

    /// Append text content.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Embed already-serialized XML verbatim, bypassing escaping.
    ///
    /// Reserved for signed payloads: their bytes are covered by the
    /// signature and re-rendering would invalidate it.
    #[must_use]
    pub fn raw_child(mut self, xml: impl Into<String>) -> Self {
        self.children.push(XmlNode::Raw(xml.into()));
        self
    }

    /// Convenience for `<name>text</name>` leaves.
    #[must_use]
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).text(text)
    }

    /// `leaf` when the value is present, nothing otherwise.
    #[must_use]
    pub fn opt_leaf(name: impl Into<String>, text: Option<impl Into<String>>) -> Option<Self> {
        text.map(|t| Self::leaf(name, t))
    }

    /// Element name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // Writing into a Vec cannot fail, so serialization is infallible.
    fn write_into(&self, writer: &mut Writer<Vec<u8>>) {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .expect("in-memory XML serialization");
            return;
        }
        writer
            .write_event(Event::Start(start))
            .expect("in-memory XML serialization");
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write_into(writer),
                XmlNode::Text(text) => {
                    writer
                        .write_event(Event::Text(BytesText::new(text)))
                        .expect("in-memory XML serialization");
                }
                XmlNode::Raw(xml) => {
                    writer
                        .write_event(Event::Text(BytesText::from_escaped(xml.as_str())))
                        .expect("in-memory XML serialization");
                }
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .expect("in-memory XML serialization");
    }

    /// Serialize this element alone, without a declaration.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        self.write_into(&mut writer);
        String::from_utf8(writer.into_inner()).expect("writer emits UTF-8")
    }
}

/// A complete document: declaration plus root element.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    #[must_use]
    pub fn new(root: XmlElement) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// Serialize with the `<?xml version="1.0" encoding="UTF-8"?>` prolog.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .expect("in-memory XML serialization");
        self.root.write_into(&mut writer);
        String::from_utf8(writer.into_inner()).expect("writer emits UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_elements() {
        let el = XmlElement::new("a")
            .child(XmlElement::leaf("b", "1"))
            .child(XmlElement::new("c").child(XmlElement::leaf("d", "2")));
        assert_eq!(el.to_xml(), "<a><b>1</b><c><d>2</d></c></a>");
    }

    #[test]
    fn test_attributes() {
        let el = XmlElement::new("evento").attr("Id", "ID123").text("x");
        assert_eq!(el.to_xml(), r#"<evento Id="ID123">x</evento>"#);
    }

    #[test]
    fn test_empty_element_self_closes() {
        let el = XmlElement::new("Header");
        assert_eq!(el.to_xml(), "<Header/>");
    }

    #[test]
    fn test_text_content_is_escaped() {
        let el = XmlElement::leaf("obs", "a < b & \"c\"");
        let xml = el.to_xml();
        assert!(xml.contains("a &lt; b &amp;"));
        assert!(!xml.contains("a < b"));
    }

    #[test]
    fn test_attribute_value_is_escaped() {
        let el = XmlElement::new("e").attr("v", "x\"y<z");
        let xml = el.to_xml();
        assert!(!xml.contains("x\"y<z"));
    }

    #[test]
    fn test_opt_leaf() {
        let el = XmlElement::new("p")
            .opt_child(XmlElement::opt_leaf("present", Some("1")))
            .opt_child(XmlElement::opt_leaf("absent", None::<String>));
        assert_eq!(el.to_xml(), "<p><present>1</present></p>");
    }

    #[test]
    fn test_raw_child_is_not_escaped() {
        let el = XmlElement::new("eventos").raw_child("<evento Id=\"1\"/>");
        assert_eq!(el.to_xml(), "<eventos><evento Id=\"1\"/></eventos>");
    }

    #[test]
    fn test_document_prolog() {
        let doc = XmlDocument::new(XmlElement::new("eSocial"));
        let xml = doc.to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.ends_with("<eSocial/>"));
    }
}
