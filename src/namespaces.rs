//! XML namespace handling
//!
//! This module provides utilities for working with XML namespaces,
//! qualified names (QNames), and namespace prefix mappings.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// XML Schema instance namespace (`xsi:type`, `xsi:schemaLocation`)
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XML namespace (bound to the reserved `xml` prefix)
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// XMLNS namespace
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// XML Namespace URI
pub type NamespaceUri = String;

/// Namespace prefix
pub type Prefix = String;

/// Qualified name (QName) - combination of namespace and local name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI (None for no namespace)
    pub namespace: Option<NamespaceUri>,
    /// Local name
    pub local_name: String,
}

impl QName {
    /// Create a new QName
    pub fn new(namespace: Option<impl Into<String>>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(|s| s.into()),
            local_name: local_name.into(),
        }
    }

    /// Create a QName without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a namespace
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local_name: local_name.into(),
        }
    }

    /// Parse Clark notation (`{uri}local` or bare `local`)
    pub fn from_clark(s: &str) -> Result<Self> {
        match s.strip_prefix('{') {
            Some(rest) => {
                let (ns, local) = rest
                    .split_once('}')
                    .ok_or_else(|| Error::Namespace(format!("Unterminated Clark name: {}", s)))?;
                Ok(QName::namespaced(ns, local))
            }
            None => Ok(QName::local(s)),
        }
    }

    /// Namespace URI as a string slice
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// `xsi:type`
    pub fn xsi_type() -> Self {
        QName::namespaced(XSI_NAMESPACE, "type")
    }

    /// `xsi:schemaLocation`
    pub fn xsi_schema_location() -> Self {
        QName::namespaced(XSI_NAMESPACE, "schemaLocation")
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

/// Prefix-to-URI bindings, either declared on one element or in scope at it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, String>", into = "IndexMap<String, String>")]
pub struct NamespaceMap {
    /// Mapping from prefix to namespace URI
    prefixes: IndexMap<Prefix, NamespaceUri>,
    /// Default namespace (no prefix)
    default_namespace: Option<NamespaceUri>,
}

impl NamespaceMap {
    /// Create a new empty namespace map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace prefix mapping
    pub fn add_prefix(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.prefixes.insert(prefix.into(), namespace.into());
    }

    /// Builder form of [`NamespaceMap::add_prefix`]
    pub fn with_prefix(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.add_prefix(prefix, namespace);
        self
    }

    /// Set the default namespace
    pub fn set_default_namespace(&mut self, namespace: impl Into<String>) {
        self.default_namespace = Some(namespace.into());
    }

    /// Bind a prefix, or the default namespace when `prefix` is `None`
    pub fn bind(&mut self, prefix: Option<&str>, namespace: impl Into<String>) {
        match prefix {
            Some(p) => self.add_prefix(p, namespace),
            None => self.set_default_namespace(namespace),
        }
    }

    /// Get the namespace for a prefix
    pub fn get_namespace(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.prefixes.get(prefix).map(|s| s.as_str())
    }

    /// Get the default namespace
    pub fn get_default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    /// Look up a binding, `None` meaning the default namespace
    pub fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            Some(p) => self.get_namespace(p),
            None => self.get_default_namespace(),
        }
    }

    /// Resolve a prefixed name to a QName
    ///
    /// An unprefixed name takes the default namespace, as element names do.
    pub fn resolve(&self, prefixed_name: &str) -> Result<QName> {
        if let Some((prefix, local)) = prefixed_name.split_once(':') {
            let namespace = self
                .get_namespace(prefix)
                .ok_or_else(|| Error::Namespace(format!("Unknown prefix: {}", prefix)))?;
            Ok(QName::namespaced(namespace, local))
        } else {
            Ok(QName::new(self.default_namespace.clone(), prefixed_name))
        }
    }

    /// Resolve a prefixed attribute name; unprefixed attributes have no namespace
    pub fn resolve_attribute(&self, prefixed_name: &str) -> Result<QName> {
        if prefixed_name.contains(':') {
            self.resolve(prefixed_name)
        } else {
            Ok(QName::local(prefixed_name))
        }
    }

    /// Find a prefix bound to `namespace`; `Some(None)` is the default namespace
    pub fn prefix_for(&self, namespace: &str) -> Option<Option<&str>> {
        if let Some((prefix, _)) = self.prefixes.iter().find(|(_, uri)| *uri == namespace) {
            return Some(Some(prefix.as_str()));
        }
        if self.default_namespace.as_deref() == Some(namespace) {
            return Some(None);
        }
        None
    }

    /// Iterate over bindings; the default namespace has prefix `None`
    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.default_namespace
            .iter()
            .map(|uri| (None, uri.as_str()))
            .chain(self.prefixes.iter().map(|(p, uri)| (Some(p.as_str()), uri.as_str())))
    }

    /// Bound namespace URIs
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(_, uri)| uri)
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.prefixes.len() + usize::from(self.default_namespace.is_some())
    }

    /// True when nothing is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Layer `inner` over this map, as a child element's declarations do
    pub fn extend(&mut self, inner: &NamespaceMap) {
        for (prefix, uri) in inner.iter() {
            self.bind(prefix, uri);
        }
    }

    /// Rewrite or drop each binding; `f` returns the new URI or `None` to drop
    pub fn retain_map<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut changed = 0;
        if let Some(uri) = self.default_namespace.take() {
            let mapped = f(&uri);
            if mapped.as_deref() != Some(uri.as_str()) {
                changed += 1;
            }
            self.default_namespace = mapped;
        }
        let prefixes = std::mem::take(&mut self.prefixes);
        for (prefix, uri) in prefixes {
            let mapped = f(&uri);
            if mapped.as_deref() != Some(uri.as_str()) {
                changed += 1;
            }
            if let Some(mapped) = mapped {
                self.prefixes.insert(prefix, mapped);
            }
        }
        changed
    }
}

impl From<IndexMap<String, String>> for NamespaceMap {
    fn from(map: IndexMap<String, String>) -> Self {
        let mut ns = NamespaceMap::new();
        for (prefix, uri) in map {
            if prefix.is_empty() {
                ns.set_default_namespace(uri);
            } else {
                ns.add_prefix(prefix, uri);
            }
        }
        ns
    }
}

impl From<NamespaceMap> for IndexMap<String, String> {
    fn from(ns: NamespaceMap) -> Self {
        ns.iter()
            .map(|(p, uri)| (p.unwrap_or_default().to_string(), uri.to_string()))
            .collect()
    }
}

impl<P: Into<String>, U: Into<String>> FromIterator<(P, U)> for NamespaceMap {
    fn from_iter<I: IntoIterator<Item = (P, U)>>(iter: I) -> Self {
        let mut ns = NamespaceMap::new();
        for (prefix, uri) in iter {
            let prefix = prefix.into();
            if prefix.is_empty() {
                ns.set_default_namespace(uri);
            } else {
                ns.add_prefix(prefix, uri);
            }
        }
        ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STIX: &str = "http://stix.mitre.org/stix-1";

    #[test]
    fn test_qname_creation() {
        let qname = QName::namespaced(STIX, "STIX_Package");
        assert_eq!(qname.namespace(), Some(STIX));
        assert_eq!(qname.local_name, "STIX_Package");
    }

    #[test]
    fn test_qname_display() {
        let qname = QName::namespaced(STIX, "STIX_Package");
        assert_eq!(qname.to_string(), "{http://stix.mitre.org/stix-1}STIX_Package");
        assert_eq!(QName::local("id").to_string(), "id");
    }

    #[test]
    fn test_from_clark() {
        let qname = QName::from_clark("{http://stix.mitre.org/stix-1}Indicators").unwrap();
        assert_eq!(qname, QName::namespaced(STIX, "Indicators"));
        assert_eq!(QName::from_clark("Title").unwrap(), QName::local("Title"));
        assert!(QName::from_clark("{broken").is_err());
    }

    #[test]
    fn test_resolve_prefixed_name() {
        let ns = NamespaceMap::new().with_prefix("stix", STIX);

        let qname = ns.resolve("stix:Indicators").unwrap();
        assert_eq!(qname, QName::namespaced(STIX, "Indicators"));
        assert!(ns.resolve("cybox:Observables").is_err());
        assert_eq!(ns.resolve_attribute("id").unwrap(), QName::local("id"));
        assert_eq!(ns.get_namespace("xml"), Some(XML_NAMESPACE));
    }

    #[test]
    fn test_default_namespace() {
        let mut ns = NamespaceMap::new();
        ns.set_default_namespace(STIX);
        assert_eq!(ns.resolve("Title").unwrap(), QName::namespaced(STIX, "Title"));
        assert_eq!(ns.prefix_for(STIX), Some(None));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_extend_overrides_outer_bindings() {
        let mut outer = NamespaceMap::new().with_prefix("a", "urn:one");
        let inner = NamespaceMap::new().with_prefix("a", "urn:two").with_prefix("b", "urn:three");
        outer.extend(&inner);
        assert_eq!(outer.get_namespace("a"), Some("urn:two"));
        assert_eq!(outer.get_namespace("b"), Some("urn:three"));
    }

    #[test]
    fn test_retain_map() {
        let mut ns = NamespaceMap::new()
            .with_prefix("old", "urn:old")
            .with_prefix("gone", "urn:gone")
            .with_prefix("same", "urn:same");
        let changed = ns.retain_map(|uri| match uri {
            "urn:old" => Some("urn:new".to_string()),
            "urn:gone" => None,
            other => Some(other.to_string()),
        });
        assert_eq!(changed, 2);
        assert_eq!(ns.get_namespace("old"), Some("urn:new"));
        assert_eq!(ns.get_namespace("gone"), None);
        assert_eq!(ns.get_namespace("same"), Some("urn:same"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_default() {
        let json = r#"{"": "urn:default", "stix": "http://stix.mitre.org/stix-1"}"#;
        let ns: NamespaceMap = serde_json::from_str(json).unwrap();
        assert_eq!(ns.get_default_namespace(), Some("urn:default"));
        assert_eq!(ns.get_namespace("stix"), Some(STIX));
    }
}
