use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{scope, DisallowedFields};
use crate::documents::{Document, NodeId};
use crate::error::Result;
use crate::namespaces::{NamespaceMap, QName};
use crate::xpath::XPath;

/// Elements that may be dropped when vacant
///
/// A node qualifies when it and every descendant have no attributes and
/// only whitespace text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalElements {
    /// Location of candidate elements
    #[serde(flatten)]
    pub fields: DisallowedFields,
}

impl OptionalElements {
    /// Candidates at `xpath` from the root
    pub fn new(xpath: XPath) -> Self {
        Self {
            fields: DisallowedFields::new(xpath),
        }
    }

    /// Compile `xpath` and build a rule
    pub fn from_xpath(xpath: &str) -> Result<Self> {
        Ok(Self::new(XPath::compile(xpath)?))
    }

    /// Vacant candidates in document order
    pub fn find(&self, doc: &Document, root: NodeId, typed: Option<&[NodeId]>, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        Ok(self
            .fields
            .find(doc, root, typed, namespaces)?
            .into_iter()
            .filter(|n| doc.is_vacant(*n))
            .collect())
    }

    /// Detach every vacant candidate; returns the number removed
    pub fn remove(&self, doc: &mut Document, root: NodeId, namespaces: &NamespaceMap) -> Result<usize> {
        let found = self.find(doc, root, None, namespaces)?;
        let mut removed = 0;
        for node in found {
            // An ancestor may already have gone with an earlier match
            if node == doc.root() || !doc.is_attached(node) {
                continue;
            }
            doc.detach(node)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(xpath = %self.fields.xpath, removed, "removed vacant optional elements");
        }
        Ok(removed)
    }
}

/// Attributes that may be dropped when empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalAttributes {
    /// Location of elements carrying the attributes
    #[serde(flatten)]
    pub fields: DisallowedFields,
    /// Attribute names, prefixed ones resolved against the rule's prefix map
    pub attributes: Vec<String>,
}

impl OptionalAttributes {
    /// Attributes on elements at `xpath`
    pub fn new<I, S>(xpath: XPath, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: DisallowedFields::new(xpath),
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    fn qualified_names(&self, namespaces: &NamespaceMap) -> Result<Vec<QName>> {
        let namespaces = scope(&self.fields.namespaces, namespaces);
        self.attributes
            .iter()
            .map(|name| namespaces.resolve_attribute(name))
            .collect()
    }

    fn empty_attributes(&self, doc: &Document, node: NodeId, names: &[QName]) -> Vec<QName> {
        names
            .iter()
            .filter(|name| doc.attribute(node, name) == Some(""))
            .cloned()
            .collect()
    }

    /// Elements carrying at least one declared attribute with an empty value
    pub fn find(&self, doc: &Document, root: NodeId, typed: Option<&[NodeId]>, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        let names = self.qualified_names(namespaces)?;
        Ok(self
            .fields
            .find(doc, root, typed, namespaces)?
            .into_iter()
            .filter(|n| !self.empty_attributes(doc, *n, &names).is_empty())
            .collect())
    }

    /// Remove the empty declared attributes; returns the number removed
    pub fn remove(&self, doc: &mut Document, root: NodeId, namespaces: &NamespaceMap) -> Result<usize> {
        let names = self.qualified_names(namespaces)?;
        let mut removed = 0;
        for node in self.find(doc, root, None, namespaces)? {
            for name in self.empty_attributes(doc, node, &names) {
                doc.remove_attribute(node, &name);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(xpath = %self.fields.xpath, removed, "removed empty optional attributes");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1">
  <stix:Related>
    <stix:Empty>  </stix:Empty>
    <stix:Nested><stix:Inner/></stix:Nested>
    <stix:Full>text</stix:Full>
    <stix:Attr a="1"/>
    <stix:Ref idref="" timestamp=""/>
    <stix:Ref idref="x" timestamp=""/>
  </stix:Related>
</stix:STIX_Package>"#;

    fn ns() -> NamespaceMap {
        NamespaceMap::new().with_prefix("stix", "http://stix.mitre.org/stix-1")
    }

    fn names(doc: &Document, nodes: &[NodeId]) -> Vec<String> {
        nodes
            .iter()
            .filter_map(|n| doc.local_name(*n).map(|s| s.to_string()))
            .collect()
    }

    #[test]
    fn test_find_vacant_elements() {
        let doc = Document::from_string(DOC).unwrap();
        let rule = OptionalElements::from_xpath("//stix:Related/*").unwrap();
        let found = rule.find(&doc, doc.root(), None, &ns()).unwrap();
        assert_eq!(names(&doc, &found), vec!["Empty", "Nested"]);
    }

    #[test]
    fn test_remove_vacant_elements_is_monotone() {
        let mut doc = Document::from_string(DOC).unwrap();
        let root = doc.root();
        let rule = OptionalElements::from_xpath("//stix:*").unwrap();
        let before = rule.find(&doc, root, None, &ns()).unwrap().len();

        let removed = rule.remove(&mut doc, root, &ns()).unwrap();
        assert_eq!(removed, 2);
        let after = rule.find(&doc, root, None, &ns()).unwrap().len();
        assert!(after <= before);
        assert_eq!(after, 0);
    }

    #[test]
    fn test_remove_empty_attributes() {
        let mut doc = Document::from_string(DOC).unwrap();
        let root = doc.root();
        let rule = OptionalAttributes::new(XPath::compile("//stix:Ref").unwrap(), ["idref", "timestamp"]);
        assert_eq!(rule.find(&doc, root, None, &ns()).unwrap().len(), 2);

        assert_eq!(rule.remove(&mut doc, root, &ns()).unwrap(), 3);
        let refs = rule.fields.find(&doc, root, None, &ns()).unwrap();
        assert_eq!(doc.attribute_local(refs[0], "idref"), None);
        assert_eq!(doc.attribute_local(refs[1], "idref"), Some("x"));
        assert_eq!(doc.attribute_local(refs[1], "timestamp"), None);
    }

    #[test]
    fn test_deserialize_flattened() {
        let json = r#"{"xpath": "//stix:Ref", "attributes": ["idref"]}"#;
        let rule: OptionalAttributes = serde_json::from_str(json).unwrap();
        assert_eq!(rule.attributes, vec!["idref"]);
        assert_eq!(rule.fields.xpath.as_str(), "//stix:Ref");

        let rule: OptionalElements = serde_json::from_str(r#"{"xpath": "//stix:Empty"}"#).unwrap();
        assert!(rule.fields.predicate.is_none());
    }
}
