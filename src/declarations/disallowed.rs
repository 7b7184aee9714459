use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{document_order, scope};
use crate::documents::{Document, NodeId};
use crate::error::Result;
use crate::namespaces::NamespaceMap;
use crate::xpath::XPath;

/// Signature of a custom interrogation hook
pub type PredicateFn = Arc<dyn Fn(&Document, NodeId) -> bool + Send + Sync>;

/// Filter applied to nodes found by a rule's path expression
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// More than one child element
    MultipleChildren,
    /// Text that is not an ISO-8601 date-time
    NotDateTime,
    /// Non-whitespace text directly inside the node
    HasText,
    /// No attributes and only whitespace text anywhere in the subtree
    Vacant,
    /// At least one of the named attributes is present and empty
    EmptyAttributes {
        /// Attribute names, prefixed ones resolved against the rule's prefix map
        attributes: Vec<String>,
    },
    /// Arbitrary test installed from code
    #[serde(skip)]
    Custom(PredicateFn),
}

impl Predicate {
    /// Wrap a closure as a predicate
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Document, NodeId) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    /// Whether `node` passes the filter
    pub fn holds(&self, doc: &Document, node: NodeId, namespaces: &NamespaceMap) -> bool {
        match self {
            Predicate::MultipleChildren => doc.child_elements(node).nth(1).is_some(),
            Predicate::NotDateTime => !is_datetime(doc.string_value(node).trim()),
            Predicate::HasText => doc
                .children(node)
                .iter()
                .filter_map(|c| doc.kind(*c).character_data())
                .any(|t| !t.trim().is_empty()),
            Predicate::Vacant => doc.is_vacant(node),
            Predicate::EmptyAttributes { attributes } => attributes.iter().any(|name| {
                namespaces
                    .resolve_attribute(name)
                    .ok()
                    .and_then(|qname| doc.attribute(node, &qname))
                    .map_or(false, str::is_empty)
            }),
            Predicate::Custom(f) => f(doc, node),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::MultipleChildren => write!(f, "MultipleChildren"),
            Predicate::NotDateTime => write!(f, "NotDateTime"),
            Predicate::HasText => write!(f, "HasText"),
            Predicate::Vacant => write!(f, "Vacant"),
            Predicate::EmptyAttributes { attributes } => {
                f.debug_struct("EmptyAttributes").field("attributes", attributes).finish()
            }
            Predicate::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// ISO-8601 date-time, with or without offset and fractional seconds
fn is_datetime(text: &str) -> bool {
    if DateTime::parse_from_rfc3339(text).is_ok() {
        return true;
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

/// Content that cannot be carried to the next version
///
/// With `context_types` set, the path is evaluated from every typed node
/// whose `xsi:type` local name maps to the type's namespace; otherwise it is
/// evaluated from the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisallowedFields {
    /// Context `xsi:type`s, local name to namespace
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub context_types: IndexMap<String, String>,
    /// Path from each context to the offending nodes
    pub xpath: XPath,
    /// Extra filter on the nodes found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    /// Prefix map for `xpath`; the step's map when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceMap>,
}

impl DisallowedFields {
    /// Rule matching `xpath` from the root
    pub fn new(xpath: XPath) -> Self {
        Self {
            context_types: IndexMap::new(),
            xpath,
            predicate: None,
            namespaces: None,
        }
    }

    /// Compile `xpath` and build a rule
    pub fn from_xpath(xpath: &str) -> Result<Self> {
        Ok(Self::new(XPath::compile(xpath)?))
    }

    /// Restrict contexts to nodes of a given `xsi:type`
    pub fn with_context_type(mut self, local_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.context_types.insert(local_name.into(), namespace.into());
        self
    }

    /// Set the interrogation filter
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Use a prefix map of the rule's own
    pub fn with_namespaces(mut self, namespaces: NamespaceMap) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// Nodes the path expression is evaluated from
    pub fn contexts(&self, doc: &Document, root: NodeId, typed: Option<&[NodeId]>) -> Vec<NodeId> {
        if self.context_types.is_empty() {
            return vec![root];
        }

        let scanned;
        let typed = match typed {
            Some(t) => t,
            None => {
                scanned = doc.typed_nodes(root);
                &scanned
            }
        };
        typed
            .iter()
            .copied()
            .filter(|node| {
                doc.type_info(*node).map_or(false, |info| {
                    self.context_types.get(&info.local_name).map(String::as_str)
                        == info.namespace.as_deref()
                        && info.namespace.is_some()
                })
            })
            .collect()
    }

    /// Keep the nodes that pass the predicate
    pub fn interrogate(&self, doc: &Document, nodes: Vec<NodeId>, namespaces: &NamespaceMap) -> Vec<NodeId> {
        match &self.predicate {
            None => nodes,
            Some(p) => nodes
                .into_iter()
                .filter(|n| p.holds(doc, *n, namespaces))
                .collect(),
        }
    }

    /// Matching nodes in document order
    pub fn find(&self, doc: &Document, root: NodeId, typed: Option<&[NodeId]>, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        let namespaces = scope(&self.namespaces, namespaces);
        let mut found = Vec::new();
        for context in self.contexts(doc, root, typed) {
            found.extend(self.xpath.select(doc, context, namespaces)?);
        }
        let found = document_order(doc, found);
        Ok(self.interrogate(doc, found, namespaces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:ta="http://stix.mitre.org/ThreatActor-1"
    xmlns:marking="http://data-marking.mitre.org/Marking-1">
  <stix:Handling>
    <marking:Marking>
      <marking:Marking_Structure xsi:type="marking:SimpleMarkingStructureType"><marking:Statement>x</marking:Statement><marking:Statement>y</marking:Statement></marking:Marking_Structure>
      <marking:Marking_Structure xsi:type="ta:OtherType"><marking:Statement>z</marking:Statement></marking:Marking_Structure>
    </marking:Marking>
  </stix:Handling>
  <stix:Timestamp>2014-02-20T09:00:00Z</stix:Timestamp>
  <stix:Timestamp>yesterday</stix:Timestamp>
  <stix:Note status="">text</stix:Note>
</stix:STIX_Package>"#;

    fn ns() -> NamespaceMap {
        NamespaceMap::new()
            .with_prefix("stix", "http://stix.mitre.org/stix-1")
            .with_prefix("marking", "http://data-marking.mitre.org/Marking-1")
    }

    #[test]
    fn test_find_from_root() {
        let doc = Document::from_string(DOC).unwrap();
        let rule = DisallowedFields::from_xpath("//stix:Timestamp").unwrap();
        assert_eq!(rule.find(&doc, doc.root(), None, &ns()).unwrap().len(), 2);
    }

    #[test]
    fn test_context_types() {
        let doc = Document::from_string(DOC).unwrap();
        let rule = DisallowedFields::from_xpath("marking:Statement")
            .unwrap()
            .with_context_type("SimpleMarkingStructureType", "http://data-marking.mitre.org/Marking-1");
        let typed = doc.typed_nodes(doc.root());
        assert_eq!(rule.contexts(&doc, doc.root(), Some(&typed)).len(), 1);

        let found = rule.find(&doc, doc.root(), Some(&typed), &ns()).unwrap();
        let texts: Vec<_> = found.iter().map(|n| doc.text(*n)).collect();
        assert_eq!(texts, vec!["x", "y"]);
    }

    #[test]
    fn test_predicates() {
        let doc = Document::from_string(DOC).unwrap();
        let root = doc.root();

        let rule = DisallowedFields::from_xpath("//marking:Marking_Structure")
            .unwrap()
            .with_predicate(Predicate::MultipleChildren);
        assert_eq!(rule.find(&doc, root, None, &ns()).unwrap().len(), 1);

        let rule = DisallowedFields::from_xpath("//stix:Timestamp")
            .unwrap()
            .with_predicate(Predicate::NotDateTime);
        let found = rule.find(&doc, root, None, &ns()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(doc.text(found[0]), "yesterday");

        let rule = DisallowedFields::from_xpath("//stix:Note")
            .unwrap()
            .with_predicate(Predicate::EmptyAttributes {
                attributes: vec!["status".to_string()],
            });
        assert_eq!(rule.find(&doc, root, None, &ns()).unwrap().len(), 1);

        let rule = DisallowedFields::from_xpath("//stix:*")
            .unwrap()
            .with_predicate(Predicate::custom(|doc, node| doc.local_name(node) == Some("Note")));
        assert_eq!(rule.find(&doc, root, None, &ns()).unwrap().len(), 1);
    }

    #[test]
    fn test_is_datetime() {
        assert!(is_datetime("2014-02-20T09:00:00Z"));
        assert!(is_datetime("2014-02-20T09:00:00.123+05:00"));
        assert!(is_datetime("2014-02-20T09:00:00"));
        assert!(!is_datetime("2014-02-20"));
        assert!(!is_datetime("yesterday"));
    }

    #[test]
    fn test_deserialize_rule() {
        let json = r#"{
            "xpath": "//stix:Timestamp",
            "predicate": {"kind": "not_date_time"},
            "namespaces": {"stix": "http://stix.mitre.org/stix-1"}
        }"#;
        let rule: DisallowedFields = serde_json::from_str(json).unwrap();
        assert!(matches!(rule.predicate, Some(Predicate::NotDateTime)));
        assert_eq!(rule.xpath.as_str(), "//stix:Timestamp");

        let custom = rule.with_predicate(Predicate::custom(|_, _| true));
        assert!(serde_json::to_string(&custom).is_err());
    }
}
