use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{document_order, scope};
use crate::documents::{Document, NodeId, NodeKind};
use crate::error::{Error, Result};
use crate::names::split_qname;
use crate::namespaces::{NamespaceMap, QName};
use crate::xpath::XPath;

/// Hook building the replacement for a matched node
///
/// Receives the document, the match and the rule's prefix map, and returns a
/// detached node to put in the match's place.
pub type ReplacementBuilder = Arc<dyn Fn(&mut Document, NodeId, &NamespaceMap) -> Result<NodeId> + Send + Sync>;

/// How a matched node is translated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationKind {
    /// Build a fresh element and put it in the match's place
    #[default]
    Replace,
    /// Change the match's tag, keeping everything else
    Rename,
}

/// Element that is renamed or rebuilt on upgrade
#[derive(Clone, Serialize, Deserialize)]
pub struct TranslatableField {
    /// Location of the nodes to translate
    pub xpath: XPath,
    /// Node supplying the replacement's content, relative to the match
    #[serde(default)]
    pub value_xpath: XPath,
    /// Tag of the replacement, `prefix:local` or `{uri}local`
    #[serde(default)]
    pub new_tag: Option<String>,
    /// Copy the match's attributes onto the replacement
    #[serde(default)]
    pub copy_attributes: bool,
    /// Values forced onto attributes the match already carries
    #[serde(default)]
    pub override_attributes: IndexMap<String, String>,
    /// Replace or rename
    #[serde(default)]
    pub kind: TranslationKind,
    /// Prefix map for the paths and tags; the step's map when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceMap>,
    /// Custom replacement construction
    #[serde(skip)]
    pub builder: Option<ReplacementBuilder>,
}

impl TranslatableField {
    /// Replace matches of `xpath`, carrying their content through
    pub fn new(xpath: XPath) -> Self {
        Self {
            xpath,
            value_xpath: XPath::self_node(),
            new_tag: None,
            copy_attributes: false,
            override_attributes: IndexMap::new(),
            kind: TranslationKind::Replace,
            namespaces: None,
            builder: None,
        }
    }

    /// Rename matches of `xpath` to `new_tag`
    pub fn renamed(xpath: XPath, new_tag: impl Into<String>) -> Self {
        Self {
            new_tag: Some(new_tag.into()),
            kind: TranslationKind::Rename,
            ..Self::new(xpath)
        }
    }

    /// Set the replacement tag
    pub fn with_new_tag(mut self, tag: impl Into<String>) -> Self {
        self.new_tag = Some(tag.into());
        self
    }

    /// Take content from `value_xpath` instead of the match itself
    pub fn with_value_xpath(mut self, value_xpath: XPath) -> Self {
        self.value_xpath = value_xpath;
        self
    }

    /// Copy attributes of the match
    pub fn with_copy_attributes(mut self, copy: bool) -> Self {
        self.copy_attributes = copy;
        self
    }

    /// Force an attribute value when the match carries the attribute
    pub fn with_override(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.override_attributes.insert(attribute.into(), value.into());
        self
    }

    /// Use a prefix map of the rule's own
    pub fn with_namespaces(mut self, namespaces: NamespaceMap) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// Install a custom replacement builder
    pub fn with_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&mut Document, NodeId, &NamespaceMap) -> Result<NodeId> + Send + Sync + 'static,
    {
        self.builder = Some(Arc::new(builder));
        self
    }

    /// Nodes this rule translates, in document order
    pub fn find(&self, doc: &Document, root: NodeId, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        let namespaces = scope(&self.namespaces, namespaces);
        let found = self.xpath.select(doc, root, namespaces)?;
        Ok(document_order(doc, found))
    }

    /// Tag and prefix for the translated node
    fn resolve_tag(&self, doc: &Document, node: NodeId, namespaces: &NamespaceMap) -> Result<(QName, Option<String>)> {
        let element = doc
            .element(node)
            .ok_or_else(|| Error::internal("translatable match is not an element"))?;

        let Some(tag) = self.new_tag.as_deref() else {
            return Ok((element.name.clone(), element.prefix.clone()));
        };

        if tag.starts_with('{') {
            let name = QName::from_clark(tag)?;
            let prefix = match name.namespace() {
                Some(uri) => doc
                    .inherited_namespaces(node)
                    .prefix_for(uri)
                    .flatten()
                    .map(|p| p.to_string()),
                None => None,
            };
            return Ok((name, prefix));
        }

        let name = namespaces.resolve(tag)?;
        let (prefix, _) = split_qname(tag);
        Ok((name, prefix.map(|p| p.to_string())))
    }

    /// Build the detached node that replaces `node`
    pub fn build_replacement(&self, doc: &mut Document, node: NodeId, namespaces: &NamespaceMap) -> Result<NodeId> {
        let namespaces = scope(&self.namespaces, namespaces);
        if let Some(builder) = &self.builder {
            return builder(doc, node, namespaces);
        }

        let (name, prefix) = self.resolve_tag(doc, node, namespaces)?;
        let source = doc
            .element(node)
            .cloned()
            .ok_or_else(|| Error::internal("translatable match is not an element"))?;

        let replacement = doc.create_element(name, prefix);
        {
            let element = doc
                .element_mut(replacement)
                .ok_or_else(|| Error::internal("new element missing"))?;
            element.namespaces = source.namespaces.clone();
            if self.copy_attributes {
                element.attributes = source.attributes.clone();
            }
        }

        for (attribute, value) in &self.override_attributes {
            let qname = namespaces.resolve_attribute(attribute)?;
            if source.attributes.contains_key(&qname) {
                doc.set_attribute(replacement, qname, value.as_str())?;
            }
        }

        let value = self
            .value_xpath
            .select_nodes(doc, node, namespaces)?
            .into_iter()
            .next();
        if let Some(value) = value {
            match doc.kind(value).clone() {
                NodeKind::Element(_) => {
                    for child in doc.children(value).to_vec() {
                        let copy = doc.deep_copy(child);
                        doc.append_child(replacement, copy)?;
                    }
                }
                NodeKind::Text(text) | NodeKind::CData(text) => {
                    let copy = doc.create_text(text);
                    doc.append_child(replacement, copy)?;
                }
                _ => {}
            }
        }

        Ok(replacement)
    }

    /// Translate every match; returns the number translated
    pub fn translate(&self, doc: &mut Document, root: NodeId, namespaces: &NamespaceMap) -> Result<usize> {
        let found = self.find(doc, root, namespaces)?;
        let mut translated = 0;

        for node in found {
            if !doc.is_attached(node) {
                continue;
            }
            match self.kind {
                TranslationKind::Rename => {
                    let (name, prefix) = self.resolve_tag(doc, node, scope(&self.namespaces, namespaces))?;
                    doc.rename(node, name, prefix)?;
                }
                TranslationKind::Replace => {
                    let replacement = self.build_replacement(doc, node, namespaces)?;
                    doc.replace(node, replacement)?;
                    doc.ensure_bindings(replacement)?;
                }
            }
            translated += 1;
        }

        if translated > 0 {
            debug!(xpath = %self.xpath, translated, kind = ?self.kind, "translated fields");
        }
        Ok(translated)
    }
}

impl fmt::Debug for TranslatableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatableField")
            .field("xpath", &self.xpath)
            .field("value_xpath", &self.value_xpath)
            .field("new_tag", &self.new_tag)
            .field("copy_attributes", &self.copy_attributes)
            .field("override_attributes", &self.override_attributes)
            .field("kind", &self.kind)
            .field("namespaces", &self.namespaces)
            .field("builder", &self.builder.as_ref().map(|_| ".."))
            .finish()
    }
}
