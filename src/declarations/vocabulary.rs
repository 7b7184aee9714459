use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::documents::{Document, NodeId};
use crate::error::Result;
use crate::names::join_qname;
use crate::namespaces::QName;

/// Controlled-vocabulary rewrite
///
/// Matches typed nodes whose `xsi:type` resolves to `vocab_namespace` with a
/// local name in `old_type_names`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Namespace of the vocabulary types
    pub vocab_namespace: String,
    /// Type local names this rule upgrades
    pub old_type_names: Vec<String>,
    /// Type local name written in their place
    pub new_type_name: String,
    /// Value for an existing `vocab_reference` attribute
    #[serde(default)]
    pub vocab_reference: Option<String>,
    /// Value for an existing `vocab_name` attribute
    #[serde(default)]
    pub vocab_name: Option<String>,
    /// Term renames, old term to new term
    #[serde(default)]
    pub terms: IndexMap<String, String>,
}

impl Vocabulary {
    /// Create a rule with no term renames
    pub fn new<I, S>(vocab_namespace: impl Into<String>, old_type_names: I, new_type_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vocab_namespace: vocab_namespace.into(),
            old_type_names: old_type_names.into_iter().map(Into::into).collect(),
            new_type_name: new_type_name.into(),
            vocab_reference: None,
            vocab_name: None,
            terms: IndexMap::new(),
        }
    }

    /// Set the `vocab_reference` value
    pub fn with_reference(mut self, url: impl Into<String>) -> Self {
        self.vocab_reference = Some(url.into());
        self
    }

    /// Set the `vocab_name` value
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.vocab_name = Some(name.into());
        self
    }

    /// Add a term rename
    pub fn with_term(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.terms.insert(old.into(), new.into());
        self
    }

    /// Typed nodes this rule applies to
    ///
    /// `typed` is a precomputed `typed_nodes(root)` list.
    pub fn find(&self, doc: &Document, root: NodeId, typed: Option<&[NodeId]>) -> Vec<NodeId> {
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
                    info.namespace.as_deref() == Some(self.vocab_namespace.as_str())
                        && self.old_type_names.iter().any(|t| *t == info.local_name)
                })
            })
            .collect()
    }

    /// Rewrite every match; returns the number of nodes updated
    pub fn update(&self, doc: &mut Document, root: NodeId, typed: Option<&[NodeId]>) -> Result<usize> {
        let found = self.find(doc, root, typed);
        let reference = QName::local("vocab_reference");
        let name = QName::local("vocab_name");

        for node in &found {
            let Some(info) = doc.type_info(*node) else { continue };
            let new_type = join_qname(info.prefix.as_deref(), &self.new_type_name);
            doc.set_attribute(*node, QName::xsi_type(), new_type)?;

            if let Some(url) = &self.vocab_reference {
                if doc.attribute(*node, &reference).is_some() {
                    doc.set_attribute(*node, reference.clone(), url.as_str())?;
                }
            }
            if let Some(vocab_name) = &self.vocab_name {
                if doc.attribute(*node, &name).is_some() {
                    doc.set_attribute(*node, name.clone(), vocab_name.as_str())?;
                }
            }

            let text = doc.text(*node);
            if let Some(term) = self.terms.get(text.trim()) {
                doc.set_text(*node, term)?;
            }
        }

        if !found.is_empty() {
            debug!(
                vocabulary = %self.new_type_name,
                nodes = found.len(),
                "updated vocabulary terms"
            );
        }
        Ok(found.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VOCABS: &str = "http://stix.mitre.org/default_vocabularies-1";

    const DOC: &str = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:stixVocabs="http://stix.mitre.org/default_vocabularies-1">
  <stix:Intent xsi:type="stixVocabs:PackageIntentVocab-1.0" vocab_reference="http://old" vocab_name="Old">Old Term</stix:Intent>
  <stix:Intent xsi:type="stixVocabs:PackageIntentVocab-1.0">Unmapped</stix:Intent>
  <stix:Other xsi:type="stixVocabs:OtherVocab-1.0">Old Term</stix:Other>
</stix:STIX_Package>"#;

    fn rule() -> Vocabulary {
        Vocabulary::new(VOCABS, ["PackageIntentVocab-1.0"], "PackageIntentVocab-1.1")
            .with_reference("http://new")
            .with_name("New")
            .with_term("Old Term", "New Term")
    }

    #[test]
    fn test_find_matches_namespace_and_type() {
        let doc = Document::from_string(DOC).unwrap();
        assert_eq!(rule().find(&doc, doc.root(), None).len(), 2);

        let other_ns = Vocabulary::new("urn:other", ["PackageIntentVocab-1.0"], "X");
        assert!(other_ns.find(&doc, doc.root(), None).is_empty());
    }

    #[test]
    fn test_update_rewrites_type_attributes_and_terms() {
        let mut doc = Document::from_string(DOC).unwrap();
        let root = doc.root();
        assert_eq!(rule().update(&mut doc, root, None).unwrap(), 2);

        let intents: Vec<_> = doc.child_elements(root).collect();
        let first = intents[0];
        assert_eq!(
            doc.attribute(first, &QName::xsi_type()),
            Some("stixVocabs:PackageIntentVocab-1.1")
        );
        assert_eq!(doc.attribute_local(first, "vocab_reference"), Some("http://new"));
        assert_eq!(doc.attribute_local(first, "vocab_name"), Some("New"));
        assert_eq!(doc.text(first), "New Term");

        let second = intents[1];
        assert_eq!(doc.text(second), "Unmapped");
        assert_eq!(doc.attribute_local(second, "vocab_reference"), None);

        assert_eq!(doc.text(intents[2]), "Old Term");
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut once = Document::from_string(DOC).unwrap();
        let root = once.root();
        rule().update(&mut once, root, None).unwrap();
        let first = once.to_xml_string(false).unwrap();

        assert_eq!(rule().update(&mut once, root, None).unwrap(), 0);
        assert_eq!(once.to_xml_string(false).unwrap(), first);
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{
            "vocab_namespace": "http://stix.mitre.org/default_vocabularies-1",
            "old_type_names": ["ThreatActorTypeVocab-1.0"],
            "new_type_name": "ThreatActorTypeVocab-1.1",
            "terms": {"Hacker - Black hat": "Hacker - Black Hat"}
        }"#;
        let vocab: Vocabulary = serde_json::from_str(json).unwrap();
        assert_eq!(vocab.terms.len(), 1);
        assert_eq!(vocab.vocab_reference, None);
    }
}
