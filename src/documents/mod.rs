//! XML document tree
//!
//! This module is the facade every other layer works through. A [`Document`]
//! is an arena of nodes addressed by [`NodeId`]; nodes keep a parent link so
//! that a subtree can be detached or replaced in place. Detached nodes stay
//! in the arena, so a `NodeId` handed out for a document never dangles.
//!
//! Parsing lives in [`parser`], serialization in [`writer`].

mod parser;
mod writer;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexMap;

use crate::error::{Error, NodeInfo, Result};
use crate::names::{join_qname, parse_type_name};
use crate::namespaces::{NamespaceMap, QName};
use crate::xpath::XPath;

/// Handle to a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in its document's arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// An attribute value together with the prefix it was written with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Prefix used in the source (`None` for unqualified attributes)
    pub prefix: Option<String>,
    /// Attribute value, entities expanded
    pub value: String,
}

impl Attribute {
    /// Create an attribute value
    pub fn new(prefix: Option<String>, value: impl Into<String>) -> Self {
        Self {
            prefix,
            value: value.into(),
        }
    }
}

/// XML Element in the document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Element qualified name
    pub name: QName,
    /// Prefix the name is written with
    pub prefix: Option<String>,
    /// Element attributes, in source order
    pub attributes: IndexMap<QName, Attribute>,
    /// Namespace bindings declared on this element
    pub namespaces: NamespaceMap,
}

impl Element {
    /// Create a new element
    pub fn new(name: QName, prefix: Option<String>) -> Self {
        Self {
            name,
            prefix,
            attributes: IndexMap::new(),
            namespaces: NamespaceMap::new(),
        }
    }

    /// Get the local name of the element
    pub fn local_name(&self) -> &str {
        &self.name.local_name
    }

    /// Get the namespace of the element
    pub fn namespace(&self) -> Option<&str> {
        self.name.namespace()
    }

    /// Tag as written (`prefix:local`)
    pub fn prefixed_name(&self) -> String {
        join_qname(self.prefix.as_deref(), &self.name.local_name)
    }

    /// Get an unqualified attribute value by local name
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(qname, _)| qname.namespace.is_none() && qname.local_name == name)
            .map(|(_, attr)| attr.value.as_str())
    }

    /// Get an attribute value by qualified name
    pub fn get_attribute_qname(&self, qname: &QName) -> Option<&str> {
        self.attributes.get(qname).map(|a| a.value.as_str())
    }
}

/// Content of a tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// An element
    Element(Element),
    /// Character data
    Text(String),
    /// A CDATA section
    CData(String),
    /// A comment
    Comment(String),
    /// A processing instruction, target and data as written
    ProcessingInstruction(String),
}

impl NodeKind {
    /// The element, if this is one
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            NodeKind::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Character content of text and CDATA nodes
    pub fn character_data(&self) -> Option<&str> {
        match self {
            NodeKind::Text(s) | NodeKind::CData(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    sourceline: Option<usize>,
}

impl NodeData {
    fn new(kind: NodeKind, sourceline: Option<usize>) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            sourceline,
        }
    }
}

/// A parsed `xsi:type` value with its prefix resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Prefix as written
    pub prefix: Option<String>,
    /// Type local name
    pub local_name: String,
    /// Namespace the prefix is bound to at the node
    pub namespace: Option<String>,
}

/// XML Document representation
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
    /// Comments and processing instructions before the root element
    prolog: Vec<NodeId>,
    /// Comments and processing instructions after the root element
    epilog: Vec<NodeId>,
    doctype: Option<String>,
}

impl Document {
    /// Create a document holding a single root element
    pub fn new(root: Element) -> Self {
        Self {
            nodes: vec![NodeData::new(NodeKind::Element(root), None)],
            root: NodeId(0),
            prolog: Vec::new(),
            epilog: Vec::new(),
            doctype: None,
        }
    }

    /// Parse an XML document from a string
    pub fn from_string(xml: &str) -> Result<Self> {
        Self::parse(xml.as_bytes())
    }

    /// Parse an XML document from bytes
    pub fn parse(xml: &[u8]) -> Result<Self> {
        parser::parse(xml)
    }

    /// Parse an XML document from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::Resource(format!("Failed to read file '{}': {}", path.display(), e))
        })?;
        Self::parse(&bytes)
    }

    /// Parse an XML document from a byte stream
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }

    /// Get the root element
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The DOCTYPE declaration body, if the input had one
    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    /// Content of a node
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.data(id).kind
    }

    /// The element at `id`, if it is one
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.data(id).kind.as_element()
    }

    /// The element at `id`, mutably
    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(e) => Some(e),
            _ => None,
        }
    }

    fn require_element(&self, id: NodeId) -> Result<&Element> {
        self.element(id)
            .ok_or_else(|| Error::internal(format!("node {} is not an element", id.0)))
    }

    fn require_element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        self.element_mut(id)
            .ok_or_else(|| Error::internal(format!("node {} is not an element", id.0)))
    }

    /// Parent of a node; `None` for the root and for detached subtrees
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).parent
    }

    /// Direct children of a node, all kinds
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.data(id).children
    }

    /// Direct element children
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |c| self.element(*c).is_some())
    }

    /// All nodes below `id` in document order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// `id` (if an element) and every element below it, in document order
    pub fn elements(&self, id: NodeId) -> Vec<NodeId> {
        std::iter::once(id)
            .chain(self.descendants(id))
            .filter(|n| self.element(*n).is_some())
            .collect()
    }

    /// Ancestors of a node, nearest first
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// Whether the node is still reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    /// Preorder position of every attached node
    pub(crate) fn document_order(&self) -> HashMap<NodeId, usize> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect()
    }

    /// 1-based source line of a node, if it came from a parse
    pub fn sourceline(&self, id: NodeId) -> Option<usize> {
        self.data(id).sourceline
    }

    /// Tag of an element
    pub fn tag(&self, id: NodeId) -> Option<&QName> {
        self.element(id).map(|e| &e.name)
    }

    /// Local name of an element
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.local_name())
    }

    /// Namespace URI of an element
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        self.element(id).and_then(|e| e.namespace())
    }

    /// Tag as written, or a `#kind` marker for other nodes
    pub fn prefixed_name(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Element(e) => e.prefixed_name(),
            NodeKind::Text(_) => "#text".to_string(),
            NodeKind::CData(_) => "#cdata-section".to_string(),
            NodeKind::Comment(_) => "#comment".to_string(),
            NodeKind::ProcessingInstruction(_) => "#processing-instruction".to_string(),
        }
    }

    /// Owned snapshot for error reports
    pub fn node_info(&self, id: NodeId) -> NodeInfo {
        let tag = self
            .tag(id)
            .cloned()
            .unwrap_or_else(|| QName::local(self.prefixed_name(id)));
        NodeInfo::new(tag, self.prefixed_name(id), self.sourceline(id))
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Attribute value by qualified name
    pub fn attribute(&self, id: NodeId, name: &QName) -> Option<&str> {
        self.element(id).and_then(|e| e.get_attribute_qname(name))
    }

    /// Unqualified attribute value by local name
    pub fn attribute_local(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.get_attribute(name))
    }

    /// Set an attribute, keeping its prefix if it already exists
    ///
    /// A new namespaced attribute reuses a prefix in scope for its
    /// namespace, or declares a fresh one on the element.
    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        if let Some(attr) = self.require_element_mut(id)?.attributes.get_mut(&name) {
            attr.value = value;
            return Ok(());
        }

        let prefix = match name.namespace() {
            Some(ns) => Some(self.attribute_prefix(id, ns)?),
            None => None,
        };
        self.require_element_mut(id)?
            .attributes
            .insert(name, Attribute::new(prefix, value));
        Ok(())
    }

    /// Remove an attribute; no-op if absent
    pub fn remove_attribute(&mut self, id: NodeId, name: &QName) -> Option<String> {
        self.element_mut(id)
            .and_then(|e| e.attributes.shift_remove(name))
            .map(|a| a.value)
    }

    /// A non-default prefix bound to `namespace` at `id`, declared if needed
    fn attribute_prefix(&mut self, id: NodeId, namespace: &str) -> Result<String> {
        let scope = self.inherited_namespaces(id);
        if let Some(Some(prefix)) = scope.prefix_for(namespace) {
            return Ok(prefix.to_string());
        }
        let prefix = fresh_prefix(&scope);
        self.require_element_mut(id)?
            .namespaces
            .add_prefix(prefix.clone(), namespace);
        Ok(prefix)
    }

    // ------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------

    /// Character data before the first child element
    pub fn text(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .map_while(|c| self.kind(*c).character_data())
            .collect()
    }

    /// Replace the character data before the first child element
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.require_element(id)?;
        let leading = self
            .children(id)
            .iter()
            .take_while(|c| self.kind(**c).character_data().is_some())
            .count();
        let removed: Vec<NodeId> = self.nodes[id.0].children.drain(..leading).collect();
        for child in removed {
            self.nodes[child.0].parent = None;
        }
        if !text.is_empty() {
            let node = self.create_text(text);
            self.insert_child(id, 0, node)?;
        }
        Ok(())
    }

    /// All character data below a node, concatenated
    pub fn string_value(&self, id: NodeId) -> String {
        if let Some(s) = self.kind(id).character_data() {
            return s.to_string();
        }
        match self.kind(id) {
            NodeKind::Element(_) => self
                .descendants(id)
                .into_iter()
                .filter_map(|n| self.kind(n).character_data())
                .collect(),
            NodeKind::Comment(s) | NodeKind::ProcessingInstruction(s) => s.clone(),
            _ => String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    /// Every prefix binding in scope at a node
    pub fn inherited_namespaces(&self, id: NodeId) -> NamespaceMap {
        let mut chain = vec![id];
        chain.extend(self.ancestors(id));

        let mut scope = NamespaceMap::new();
        for node in chain.into_iter().rev() {
            if let Some(e) = self.element(node) {
                scope.extend(&e.namespaces);
            }
        }
        scope
    }

    /// Declare on `id` any binding its own name or attributes need
    ///
    /// Call after the element has been placed in its final position.
    pub fn ensure_bindings(&mut self, id: NodeId) -> Result<()> {
        let scope = self.inherited_namespaces(id);
        let element = self.require_element(id)?;

        let mut declare: Vec<(Option<String>, String)> = Vec::new();
        match element.namespace() {
            Some(ns) => {
                if scope.lookup(element.prefix.as_deref()) != Some(ns) {
                    declare.push((element.prefix.clone(), ns.to_string()));
                }
            }
            None => {
                if element.prefix.is_none()
                    && scope.get_default_namespace().map_or(false, |d| !d.is_empty())
                {
                    declare.push((None, String::new()));
                }
            }
        }

        let mut reprefix: Vec<(QName, String)> = Vec::new();
        let mut local_scope = scope.clone();
        for (name, attr) in &element.attributes {
            let Some(ns) = name.namespace() else { continue };
            match attr.prefix.as_deref() {
                Some(p) if local_scope.get_namespace(p) == Some(ns) => {}
                Some(p) if local_scope.get_namespace(p).is_none() => {
                    local_scope.add_prefix(p, ns);
                    declare.push((Some(p.to_string()), ns.to_string()));
                }
                _ => {
                    let prefix = match local_scope.prefix_for(ns) {
                        Some(Some(p)) => p.to_string(),
                        _ => {
                            let p = fresh_prefix(&local_scope);
                            local_scope.add_prefix(p.clone(), ns);
                            declare.push((Some(p.clone()), ns.to_string()));
                            p
                        }
                    };
                    reprefix.push((name.clone(), prefix));
                }
            }
        }

        let element = self.require_element_mut(id)?;
        for (prefix, ns) in declare {
            element.namespaces.bind(prefix.as_deref(), ns);
        }
        for (name, prefix) in reprefix {
            if let Some(attr) = element.attributes.get_mut(&name) {
                attr.prefix = Some(prefix);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Construction and mutation
    // ------------------------------------------------------------------

    fn push(&mut self, kind: NodeKind, sourceline: Option<usize>) -> NodeId {
        self.nodes.push(NodeData::new(kind, sourceline));
        NodeId(self.nodes.len() - 1)
    }

    /// Create a detached element
    pub fn create_element(&mut self, name: QName, prefix: Option<String>) -> NodeId {
        self.push(NodeKind::Element(Element::new(name, prefix)), None)
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()), None)
    }

    fn check_detached(&self, child: NodeId) -> Result<()> {
        if child == self.root || self.parent(child).is_some() {
            return Err(Error::internal(format!(
                "node {} is already part of the tree",
                child.0
            )));
        }
        Ok(())
    }

    /// Append a detached node as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let index = self.children(parent).len();
        self.insert_child(parent, index, child)
    }

    /// Insert a detached node at `index` among `parent`'s children
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.require_element(parent)?;
        self.check_detached(child)?;
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(Error::internal("cannot insert a node below itself"));
        }
        let index = index.min(self.children(parent).len());
        self.nodes[parent.0].children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Remove a node (and its subtree) from its parent
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        let parent = self.parent(id).ok_or_else(|| {
            Error::internal(format!("cannot detach node {}: it has no parent", id.0))
        })?;
        self.nodes[parent.0].children.retain(|c| *c != id);
        self.nodes[id.0].parent = None;
        Ok(())
    }

    /// Put the detached node `new` where `old` is, preserving document order
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.check_detached(new)?;
        if old == self.root {
            self.require_element(new)?;
            self.root = new;
            return Ok(());
        }
        let parent = self.parent(old).ok_or_else(|| {
            Error::internal(format!("cannot replace node {}: it has no parent", old.0))
        })?;
        let position = self
            .children(parent)
            .iter()
            .position(|c| *c == old)
            .ok_or_else(|| Error::internal("parent does not list the node as a child"))?;
        self.nodes[parent.0].children[position] = new;
        self.nodes[new.0].parent = Some(parent);
        self.nodes[old.0].parent = None;
        Ok(())
    }

    /// Change an element's tag, declaring its namespace if needed
    pub fn rename(&mut self, id: NodeId, name: QName, prefix: Option<String>) -> Result<()> {
        let element = self.require_element_mut(id)?;
        element.name = name;
        element.prefix = prefix;
        self.ensure_bindings(id)
    }

    /// Copy a subtree within this document; the copy is detached
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let kind = self.kind(id).clone();
        let children = self.children(id).to_vec();
        let copy = self.push(kind, self.sourceline(id));
        for child in children {
            let c = self.deep_copy(child);
            self.nodes[c.0].parent = Some(copy);
            self.nodes[copy.0].children.push(c);
        }
        copy
    }

    /// Copy an element subtree out into a standalone document
    ///
    /// Every binding in scope at `id` is declared on the new root, so the
    /// fragment serializes on its own.
    pub fn extract(&self, id: NodeId) -> Result<Document> {
        let mut element = self.require_element(id)?.clone();
        element.namespaces = self.inherited_namespaces(id);

        let mut fragment = Document::new(element);
        fragment.nodes[0].sourceline = self.sourceline(id);
        let root = fragment.root;
        for child in self.children(id) {
            self.copy_into(&mut fragment, *child, root);
        }
        Ok(fragment)
    }

    fn copy_into(&self, target: &mut Document, source: NodeId, parent: NodeId) {
        let copy = target.push(self.kind(source).clone(), self.sourceline(source));
        target.nodes[copy.0].parent = Some(parent);
        target.nodes[parent.0].children.push(copy);
        for child in self.children(source) {
            self.copy_into(target, *child, copy);
        }
    }

    // ------------------------------------------------------------------
    // Typed nodes
    // ------------------------------------------------------------------

    /// Every element at or below `root` carrying an `xsi:type` attribute
    pub fn typed_nodes(&self, root: NodeId) -> Vec<NodeId> {
        let xsi_type = QName::xsi_type();
        self.elements(root)
            .into_iter()
            .filter(|n| self.attribute(*n, &xsi_type).is_some())
            .collect()
    }

    /// Parse a node's `xsi:type` and resolve its prefix
    pub fn type_info(&self, id: NodeId) -> Option<TypeInfo> {
        let value = self.attribute(id, &QName::xsi_type())?;
        let (prefix, local) = parse_type_name(value).ok()?;
        let namespace = self
            .inherited_namespaces(id)
            .lookup(prefix)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Some(TypeInfo {
            prefix: prefix.map(|p| p.to_string()),
            local_name: local.to_string(),
            namespace,
        })
    }

    /// No attributes and only whitespace anywhere in the subtree
    pub fn is_vacant(&self, id: NodeId) -> bool {
        std::iter::once(id)
            .chain(self.descendants(id))
            .all(|n| match self.kind(n) {
                NodeKind::Element(e) => e.attributes.is_empty(),
                NodeKind::Text(s) | NodeKind::CData(s) => s.trim().is_empty(),
                _ => true,
            })
    }

    // ------------------------------------------------------------------
    // Paths and output
    // ------------------------------------------------------------------

    /// Elements selected by a path expression from `context`
    pub fn select(&self, context: NodeId, expression: &str, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        XPath::compile(expression)?.select(self, context, namespaces)
    }

    /// Serialize with an XML declaration
    pub fn write_to<W: Write>(&self, out: W, pretty: bool) -> Result<()> {
        writer::write(self, out, pretty)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self, pretty: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out, pretty)?;
        Ok(out)
    }

    /// Serialize to a string
    pub fn to_xml_string(&self, pretty: bool) -> Result<String> {
        String::from_utf8(self.to_bytes(pretty)?)
            .map_err(|e| Error::Xml(format!("serialized output is not UTF-8: {}", e)))
    }
}

fn fresh_prefix(scope: &NamespaceMap) -> String {
    let mut n = 0usize;
    loop {
        let candidate = format!("ns{}", n);
        if scope.get_namespace(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::XSI_NAMESPACE;
    use pretty_assertions::assert_eq;

    const STIX: &str = "http://stix.mitre.org/stix-1";

    const PACKAGE: &str = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:stixVocabs="http://stix.mitre.org/default_vocabularies-1"
    id="example:pkg-1" version="1.1.1">
    <stix:STIX_Header>
        <stix:Title>Example</stix:Title>
        <stix:Package_Intent xsi:type="stixVocabs:PackageIntentVocab-1.0">Indicators</stix:Package_Intent>
    </stix:STIX_Header>
    <stix:Indicators/>
</stix:STIX_Package>"#;

    fn find(doc: &Document, local: &str) -> NodeId {
        doc.elements(doc.root())
            .into_iter()
            .find(|n| doc.local_name(*n) == Some(local))
            .unwrap()
    }

    #[test]
    fn test_parse_simple_xml() {
        let doc = Document::from_string("<root><child>text</child></root>").unwrap();
        let root = doc.root();
        assert_eq!(doc.local_name(root), Some("root"));
        let children: Vec<_> = doc.child_elements(root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(doc.text(children[0]), "text");
    }

    #[test]
    fn test_names_are_resolved() {
        let doc = Document::from_string(PACKAGE).unwrap();
        let root = doc.root();
        assert_eq!(doc.tag(root), Some(&QName::namespaced(STIX, "STIX_Package")));
        assert_eq!(doc.prefixed_name(root), "stix:STIX_Package");
        assert_eq!(doc.attribute_local(root, "version"), Some("1.1.1"));
        assert_eq!(doc.sourceline(root), Some(1));
        assert_eq!(doc.sourceline(find(&doc, "Title")), Some(6));
    }

    #[test]
    fn test_type_info() {
        let doc = Document::from_string(PACKAGE).unwrap();
        let typed = doc.typed_nodes(doc.root());
        assert_eq!(typed.len(), 1);

        let info = doc.type_info(typed[0]).unwrap();
        assert_eq!(info.prefix.as_deref(), Some("stixVocabs"));
        assert_eq!(info.local_name, "PackageIntentVocab-1.0");
        assert_eq!(
            info.namespace.as_deref(),
            Some("http://stix.mitre.org/default_vocabularies-1")
        );
    }

    #[test]
    fn test_set_and_remove_attribute() {
        let mut doc = Document::from_string(PACKAGE).unwrap();
        let root = doc.root();
        doc.set_attribute(root, QName::local("version"), "1.2").unwrap();
        assert_eq!(doc.attribute_local(root, "version"), Some("1.2"));

        assert_eq!(doc.remove_attribute(root, &QName::local("id")).as_deref(), Some("example:pkg-1"));
        assert_eq!(doc.remove_attribute(root, &QName::local("id")), None);

        let title = find(&doc, "Title");
        doc.set_attribute(title, QName::namespaced("urn:new", "flag"), "yes").unwrap();
        let element = doc.element(title).unwrap();
        let attr = element.attributes.get(&QName::namespaced("urn:new", "flag")).unwrap();
        assert_eq!(attr.prefix.as_deref(), Some("ns0"));
        assert_eq!(element.namespaces.get_namespace("ns0"), Some("urn:new"));
    }

    #[test]
    fn test_set_text_keeps_children() {
        let mut doc = Document::from_string("<a>old<b/>tail</a>").unwrap();
        let root = doc.root();
        doc.set_text(root, "new").unwrap();
        assert_eq!(doc.text(root), "new");
        assert_eq!(doc.child_elements(root).count(), 1);
        assert_eq!(doc.string_value(root), "newtail");
    }

    #[test]
    fn test_detach_and_replace() {
        let mut doc = Document::from_string(PACKAGE).unwrap();
        let header = find(&doc, "STIX_Header");
        let indicators = find(&doc, "Indicators");

        doc.detach(header).unwrap();
        assert!(!doc.is_attached(header));
        assert!(!doc.is_attached(find_detached_title(&doc, header)));

        let replacement = doc.create_element(QName::namespaced(STIX, "TTPs"), Some("stix".into()));
        doc.replace(indicators, replacement).unwrap();
        assert!(doc.is_attached(replacement));
        assert!(!doc.is_attached(indicators));
        assert_eq!(
            doc.child_elements(doc.root()).collect::<Vec<_>>(),
            vec![replacement]
        );

        assert!(matches!(doc.detach(doc.root()), Err(Error::Internal(_))));
        assert!(matches!(doc.replace(indicators, replacement), Err(Error::Internal(_))));
    }

    fn find_detached_title(doc: &Document, header: NodeId) -> NodeId {
        doc.elements(header)
            .into_iter()
            .find(|n| doc.local_name(*n) == Some("Title"))
            .unwrap()
    }

    #[test]
    fn test_extract_is_standalone() {
        let doc = Document::from_string(PACKAGE).unwrap();
        let header = find(&doc, "STIX_Header");
        let fragment = doc.extract(header).unwrap();

        assert_eq!(fragment.sourceline(fragment.root()), Some(5));
        let xml = fragment.to_xml_string(false).unwrap();
        assert!(xml.contains(r#"xmlns:stix="http://stix.mitre.org/stix-1""#));
        assert!(xml.contains(r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#));
        assert!(Document::from_string(&xml).is_ok());
    }

    #[test]
    fn test_deep_copy_preserves_lines() {
        let mut doc = Document::from_string(PACKAGE).unwrap();
        let header = find(&doc, "STIX_Header");
        let copy = doc.deep_copy(header);
        assert_ne!(copy, header);
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.sourceline(copy), doc.sourceline(header));
        assert_eq!(doc.string_value(copy), doc.string_value(header));
    }

    #[test]
    fn test_ensure_bindings_declares_missing_prefix() {
        let mut doc = Document::from_string(PACKAGE).unwrap();
        let root = doc.root();
        let node = doc.create_element(QName::namespaced("urn:other", "Thing"), Some("other".into()));
        doc.append_child(root, node).unwrap();
        doc.ensure_bindings(node).unwrap();
        assert_eq!(
            doc.element(node).unwrap().namespaces.get_namespace("other"),
            Some("urn:other")
        );

        let again = doc.create_element(QName::namespaced(STIX, "Thing"), Some("stix".into()));
        doc.append_child(root, again).unwrap();
        doc.ensure_bindings(again).unwrap();
        assert!(doc.element(again).unwrap().namespaces.is_empty());
    }

    #[test]
    fn test_is_vacant() {
        let doc = Document::from_string(
            "<r><empty>  <inner/>\n</empty><attr a=\"\"/><text>x</text><!-- c --><c><!-- only --></c></r>",
        )
        .unwrap();
        let root = doc.root();
        let vacant: Vec<_> = doc
            .child_elements(root)
            .filter(|n| doc.is_vacant(*n))
            .filter_map(|n| doc.local_name(n).map(|s| s.to_string()))
            .collect();
        assert_eq!(vacant, vec!["empty", "c"]);
    }

    #[test]
    fn test_xsi_attribute_lookup() {
        let doc = Document::from_string(PACKAGE).unwrap();
        let typed = find(&doc, "Package_Intent");
        assert_eq!(
            doc.attribute(typed, &QName::namespaced(XSI_NAMESPACE, "type")),
            Some("stixVocabs:PackageIntentVocab-1.0")
        );
    }
}
