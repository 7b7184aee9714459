//! Event-driven construction of a [`Document`] from quick-xml events
//!
//! Namespace prefixes are resolved against a scope stack while reading, and
//! every node records the line its markup starts on. Entities declared in an
//! internal DOCTYPE subset are expanded in text and attribute values.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use super::{Attribute, Document, Element, NodeData, NodeId, NodeKind};
use crate::error::{Error, Result};
use crate::names::split_qname;
use crate::namespaces::{NamespaceMap, QName};

static ENTITY_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<!ENTITY\s+([^\s%]\S*)\s+(?:"([^"]*)"|'([^']*)')\s*>"#)
        .expect("entity pattern is valid")
});

/// Converts byte offsets into 1-based line numbers; offsets must not go back
struct LineCounter<'a> {
    input: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, position: usize) -> usize {
        let position = position.min(self.input.len());
        if position > self.offset {
            self.line += self.input[self.offset..position]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            self.offset = position;
        }
        self.line
    }
}

#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<NodeData>,
    /// Open elements with the namespace scope in effect inside each
    stack: Vec<(NodeId, NamespaceMap)>,
    root: Option<NodeId>,
    prolog: Vec<NodeId>,
    epilog: Vec<NodeId>,
    doctype: Option<String>,
    entities: HashMap<String, String>,
}

impl TreeBuilder {
    fn scope(&self) -> Option<&NamespaceMap> {
        self.stack.last().map(|(_, scope)| scope)
    }

    /// Add a node below the open element, or around the root element
    fn add(&mut self, kind: NodeKind, line: usize) -> NodeId {
        self.nodes.push(NodeData::new(kind, Some(line)));
        let id = NodeId(self.nodes.len() - 1);
        match self.stack.last() {
            Some((parent, _)) => {
                let parent = *parent;
                self.nodes[id.0].parent = Some(parent);
                self.nodes[parent.0].children.push(id);
            }
            None if self.root.is_none() => self.prolog.push(id),
            None => self.epilog.push(id),
        }
        id
    }

    fn open(&mut self, start: &BytesStart, line: usize) -> Result<()> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(Error::Xml(format!(
                "line {}: document has more than one root element",
                line
            )));
        }

        let outer = self.scope().cloned().unwrap_or_default();
        let (element, scope) = read_element(start, &outer, &self.entities, line)?;

        let is_root = self.stack.is_empty();
        self.nodes.push(NodeData::new(NodeKind::Element(element), Some(line)));
        let id = NodeId(self.nodes.len() - 1);
        if let Some((parent, _)) = self.stack.last() {
            let parent = *parent;
            self.nodes[id.0].parent = Some(parent);
            self.nodes[parent.0].children.push(id);
        }
        if is_root {
            self.root = Some(id);
        }
        self.stack.push((id, scope));
        Ok(())
    }

    fn close(&mut self) {
        self.stack.pop();
    }

    fn character_data(&mut self, kind: NodeKind, line: usize) -> Result<()> {
        if self.stack.is_empty() {
            let blank = kind.character_data().map_or(true, |s| s.trim().is_empty());
            if blank {
                return Ok(());
            }
            return Err(Error::Xml(format!(
                "line {}: character data outside the root element",
                line
            )));
        }
        self.add(kind, line);
        Ok(())
    }

    fn declare_entities(&mut self, doctype: &str) {
        for cap in ENTITY_DECL.captures_iter(doctype) {
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            self.entities
                .entry(cap[1].to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    fn finish(self) -> Result<Document> {
        if let Some((open, _)) = self.stack.last() {
            let name = self.nodes[open.0]
                .kind
                .as_element()
                .map(|e| e.prefixed_name())
                .unwrap_or_default();
            return Err(Error::Xml(format!(
                "unexpected end of input: element '{}' is not closed",
                name
            )));
        }
        let root = self
            .root
            .ok_or_else(|| Error::Xml("document has no root element".to_string()))?;
        Ok(Document {
            nodes: self.nodes,
            root,
            prolog: self.prolog,
            epilog: self.epilog,
            doctype: self.doctype,
        })
    }
}

/// Parse XML bytes into a document
pub(super) fn parse(xml: &[u8]) -> Result<Document> {
    let xml = xml.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(xml);
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(false);

    let mut lines = LineCounter::new(xml);
    let mut tree = TreeBuilder::default();
    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position();
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            Error::Xml(format!(
                "Error parsing XML at position {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;
        let line = lines.line_at(position);

        match event {
            Event::Start(e) => tree.open(&e, line)?,
            Event::Empty(e) => {
                tree.open(&e, line)?;
                tree.close();
            }
            Event::End(_) => tree.close(),
            Event::Text(e) => {
                let text = e
                    .unescape_with(|entity| tree.entities.get(entity).map(String::as_str))
                    .map_err(|e| Error::Xml(format!("line {}: failed to unescape text: {}", line, e)))?
                    .into_owned();
                tree.character_data(NodeKind::Text(text), line)?;
            }
            Event::CData(e) => {
                let text = String::from_utf8(e.into_inner().into_owned())
                    .map_err(|e| Error::Xml(format!("line {}: invalid CDATA: {}", line, e)))?;
                tree.character_data(NodeKind::CData(text), line)?;
            }
            Event::Comment(e) => {
                let text = utf8(&e, line)?;
                tree.add(NodeKind::Comment(text), line);
            }
            Event::PI(e) => {
                let text = utf8(&e, line)?;
                tree.add(NodeKind::ProcessingInstruction(text), line);
            }
            Event::DocType(e) => {
                let text = utf8(&e, line)?;
                tree.declare_entities(&text);
                tree.doctype = Some(text.trim().to_string());
            }
            Event::Decl(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    tree.finish()
}

fn utf8(bytes: &[u8], line: usize) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|e| Error::Xml(format!("line {}: invalid UTF-8: {}", line, e)))
}

/// Build an element from a start tag, returning it with its inner scope
fn read_element(
    start: &BytesStart,
    outer: &NamespaceMap,
    entities: &HashMap<String, String>,
    line: usize,
) -> Result<(Element, NamespaceMap)> {
    let tag = utf8(start.name().as_ref(), line)?;

    let mut declared = NamespaceMap::new();
    let mut raw_attributes: Vec<(String, String)> = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Xml(format!("line {}: failed to parse attribute: {}", line, e)))?;
        let key = utf8(attr.key.as_ref(), line)?;
        let value = attr
            .unescape_value_with(|entity| entities.get(entity).map(String::as_str))
            .map_err(|e| Error::Xml(format!("line {}: failed to unescape attribute value: {}", line, e)))?
            .into_owned();

        if key == "xmlns" {
            declared.set_default_namespace(value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.add_prefix(prefix, value);
        } else {
            raw_attributes.push((key, value));
        }
    }

    let mut scope = outer.clone();
    scope.extend(&declared);

    let (prefix, local) = split_qname(&tag);
    let namespace = match prefix {
        Some(p) => Some(
            scope
                .get_namespace(p)
                .ok_or_else(|| unbound(p, &tag, line))?
                .to_string(),
        ),
        None => scope
            .get_default_namespace()
            .filter(|ns| !ns.is_empty())
            .map(|ns| ns.to_string()),
    };

    let mut element = Element::new(QName::new(namespace, local), prefix.map(|p| p.to_string()));
    element.namespaces = declared;

    for (key, value) in raw_attributes {
        let (prefix, local) = split_qname(&key);
        let name = match prefix {
            Some(p) => QName::namespaced(
                scope.get_namespace(p).ok_or_else(|| unbound(p, &key, line))?,
                local,
            ),
            None => QName::local(local),
        };
        if element.attributes.contains_key(&name) {
            return Err(Error::Xml(format!(
                "line {}: duplicate attribute '{}' on '{}'",
                line, name, tag
            )));
        }
        element
            .attributes
            .insert(name, Attribute::new(prefix.map(|p| p.to_string()), value));
    }

    Ok((element, scope))
}

fn unbound(prefix: &str, name: &str, line: usize) -> Error {
    Error::Namespace(format!(
        "line {}: prefix '{}' of '{}' is not bound",
        line, prefix, name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_counter() {
        let input = b"a\nb\n\nc";
        let mut lines = LineCounter::new(input);
        assert_eq!(lines.line_at(0), 1);
        assert_eq!(lines.line_at(2), 2);
        assert_eq!(lines.line_at(5), 4);
        assert_eq!(lines.line_at(100), 4);
    }

    #[test]
    fn test_prolog_and_epilog_are_kept() {
        let doc = parse(b"<?xml version=\"1.0\"?>\n<!-- head -->\n<r/>\n<?pi data?>").unwrap();
        assert_eq!(doc.prolog.len(), 1);
        assert_eq!(doc.epilog.len(), 1);
        assert_eq!(doc.sourceline(doc.root()), Some(3));
    }

    #[test]
    fn test_internal_entities_are_expanded() {
        let xml = br#"<!DOCTYPE r [ <!ENTITY org "Example Org"> ]>
<r name="&org;">&org; &amp; friends</r>"#;
        let doc = parse(xml).unwrap();
        let root = doc.root();
        assert_eq!(doc.attribute_local(root, "name"), Some("Example Org"));
        assert_eq!(doc.text(root), "Example Org & friends");
        assert!(doc.doctype().unwrap().starts_with('r'));
    }

    #[test]
    fn test_default_namespace_and_undeclaration() {
        let doc = parse(br#"<r xmlns="urn:a"><c xmlns=""><d/></c></r>"#).unwrap();
        let root = doc.root();
        assert_eq!(doc.namespace(root), Some("urn:a"));
        let c = doc.child_elements(root).next().unwrap();
        assert_eq!(doc.namespace(c), None);
        let d = doc.child_elements(c).next().unwrap();
        assert_eq!(doc.namespace(d), None);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(parse(b"<a><b></a>"), Err(Error::Xml(_))));
        assert!(matches!(parse(b"<a>"), Err(Error::Xml(_))));
        assert!(matches!(parse(b""), Err(Error::Xml(_))));
        assert!(matches!(parse(b"<a/><b/>"), Err(Error::Xml(_))));
        assert!(matches!(parse(b"<p:a/>"), Err(Error::Namespace(_))));
    }

    #[test]
    fn test_cdata_and_comments() {
        let doc = parse(b"<r><![CDATA[<raw>]]><!-- note --></r>").unwrap();
        let root = doc.root();
        assert_eq!(doc.text(root), "<raw>");
        let kinds: Vec<_> = doc.children(root).iter().map(|c| doc.kind(*c).clone()).collect();
        assert_eq!(kinds[1], NodeKind::Comment(" note ".to_string()));
    }
}
