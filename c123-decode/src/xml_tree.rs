//! A minimal attribute-tree reader over `quick_xml` events.
//!
//! The engine's XML is attribute-heavy with shallow nesting; a full DOM is
//! more than `XmlDecoder` needs. This collects exactly what the decode
//! rules in §4.5 read: element names, their attributes, child elements, and
//! concatenated text content.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::DecodeError;

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn attr_trimmed(&self, key: &str) -> String {
        self.attr(key).unwrap_or_default().trim().to_string()
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attr(key).and_then(|s| s.trim().parse().ok())
    }

    pub fn attr_bool_y(&self, key: &str) -> bool {
        self.attr(key).map(|s| s.trim() == "Y").unwrap_or(false)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

/// Parse a complete XML document into its root element.
pub fn parse_document(xml: &str) -> Result<Element, DecodeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(element_from_start(&e)?),
            Event::Empty(e) => {
                let elem = element_from_start(&e)?;
                attach(&mut stack, &mut root, elem);
            }
            Event::End(_) => {
                if let Some(finished) = stack.pop() {
                    attach(&mut stack, &mut root, finished);
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    root.ok_or(DecodeError::UnexpectedRoot(String::new()))
}

fn element_from_start(e: &BytesStart) -> Result<Element, DecodeError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        attrs.insert(key, value);
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, elem: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(elem);
    } else {
        *root = Some(elem);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attributes_and_nested_children() {
        let root = parse_document(
            r#"<Canoe123 System="Main"><TimeOfDay>10:30:00</TimeOfDay></Canoe123>"#,
        )
        .unwrap();
        assert_eq!(root.name, "Canoe123");
        assert_eq!(root.attr("System"), Some("Main"));
        let tod = root.child("TimeOfDay").unwrap();
        assert_eq!(tod.text_trimmed(), "10:30:00");
    }

    #[test]
    fn handles_self_closing_elements() {
        let root = parse_document(r#"<Canoe123><RaceConfig NrSplits="4"/></Canoe123>"#).unwrap();
        let rc = root.child("RaceConfig").unwrap();
        assert_eq!(rc.attr_i64("NrSplits"), Some(4));
    }
}
