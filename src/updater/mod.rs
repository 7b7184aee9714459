//! Step updaters
//!
//! A [`StepUpdater`] moves a document from one published version of its
//! family to the next. It is a bundle of declarations (namespace and
//! schema-location tables, rule collections, the paths locating root and
//! versioned nodes) interpreted by a fixed set of behaviours:
//!
//! - [`StepUpdater::check_update`] reports anything that stops the step
//! - [`StepUpdater::clean`] removes untranslatable content and renumbers
//!   the ids still colliding
//! - [`StepUpdater::apply`] performs the upgrade proper
//!
//! [`StepUpdater::update`] ties the three together, cleaning only when the
//! caller forces it.
//!
//! A STIX step may own a companion CybOX step whose root path is narrowed to
//! the embedded `stix:Observables`. The companion is checked, cleaned and
//! applied as part of its owner.

mod changes;
mod ids;
mod operations;
mod options;

pub use changes::Changes;
pub use options::{default_new_id, NewIdFn, UpdateOptions};

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::declarations::{
    document_order, DisallowedFields, OptionalAttributes, OptionalElements, TranslatableField, Vocabulary,
};
use crate::documents::{Document, NodeId};
use crate::error::{Error, InvalidVersionError, Result, UnknownVersionError, UntranslatableError};
use crate::namespaces::NamespaceMap;
use crate::versions::{Family, Version, VersionShape, STIX_NAMESPACE};
use crate::xpath::XPath;
use ids::{duplicate_ids, remap_ids};

/// Declarations and behaviour for one version step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpdater {
    /// Family of the documents this step updates
    pub family: Family,
    /// Version the step expects
    pub from_version: Version,
    /// Version the step produces
    pub to_version: Version,

    /// Reference prefix map for every path expression of the step
    #[serde(default)]
    pub namespaces: NamespaceMap,
    /// Old namespace URI to new namespace URI
    #[serde(default)]
    pub namespace_remap: IndexMap<String, String>,
    /// Namespace URI (after remapping) to its new schema location
    #[serde(default)]
    pub schema_locations: IndexMap<String, String>,
    /// Namespaces with no counterpart in the target version
    #[serde(default)]
    pub disallowed_namespaces: IndexSet<String>,

    /// Controlled-vocabulary rewrites
    #[serde(default)]
    pub vocabularies: Vec<Vocabulary>,
    /// Untranslatable content
    #[serde(default)]
    pub disallowed: Vec<DisallowedFields>,
    /// Elements pruned when vacant
    #[serde(default)]
    pub optional_elements: Vec<OptionalElements>,
    /// Attributes pruned when empty
    #[serde(default)]
    pub optional_attributes: Vec<OptionalAttributes>,
    /// Elements renamed or rebuilt
    #[serde(default)]
    pub translatable: Vec<TranslatableField>,

    /// Nodes whose version is the document's version
    pub root_xpath: XPath,
    /// Nodes whose version is rewritten
    pub versioned_xpath: XPath,
    /// How versioned nodes store their version
    pub version_shape: VersionShape,
    /// Versioned-node local name to the version it receives instead of `to_version`
    #[serde(default)]
    pub version_overrides: IndexMap<String, Version>,

    /// The step runs inside another family's document; finding no root
    /// node is not an error
    #[serde(default)]
    pub embedded: bool,
    /// Step for documents of another family embedded in this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion: Option<Box<StepUpdater>>,
}

impl StepUpdater {
    /// Step for standalone documents of `family`, with empty rule tables
    ///
    /// The core namespace is bound to the family's usual prefix, and the
    /// core schema location moves to `to`.
    pub fn new(family: Family, from: Version, to: Version) -> Result<Self> {
        let prefix = family.prefix();
        let root = family.root_tag();
        let mut schema_locations = IndexMap::new();
        schema_locations.insert(family.namespace().to_string(), family.schema_location(&to));

        Ok(Self {
            family,
            namespaces: NamespaceMap::new().with_prefix(prefix, family.namespace()),
            namespace_remap: IndexMap::new(),
            schema_locations,
            disallowed_namespaces: IndexSet::new(),
            vocabularies: Vec::new(),
            disallowed: Vec::new(),
            optional_elements: Vec::new(),
            optional_attributes: Vec::new(),
            translatable: Vec::new(),
            root_xpath: XPath::compile(&format!("/{}:{}", prefix, root.local_name))?,
            versioned_xpath: XPath::compile(&format!("//{}:{}", prefix, root.local_name))?,
            version_shape: family.shape(),
            version_overrides: IndexMap::new(),
            embedded: false,
            companion: None,
            from_version: from,
            to_version: to,
        })
    }

    /// CybOX step for observables embedded in a STIX package
    pub fn embedded_cybox(from: Version, to: Version) -> Result<Self> {
        let mut step = Self::new(Family::Cybox, from, to)?;
        step.namespaces.add_prefix("stix", STIX_NAMESPACE);
        step.root_xpath = XPath::compile("//stix:Observables")?;
        step.versioned_xpath = XPath::compile("//stix:Observables")?;
        step.embedded = true;
        Ok(step)
    }

    /// Bind a prefix in the reference map
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.add_prefix(prefix, uri);
        self
    }

    /// Move `old` to `new`
    pub fn with_namespace_remap(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.namespace_remap.insert(old.into(), new.into());
        self
    }

    /// Set the schema location of a (target) namespace
    pub fn with_schema_location(mut self, namespace: impl Into<String>, url: impl Into<String>) -> Self {
        self.schema_locations.insert(namespace.into(), url.into());
        self
    }

    /// Declare a namespace untranslatable
    pub fn with_disallowed_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.disallowed_namespaces.insert(namespace.into());
        self
    }

    /// Add a vocabulary rule
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabularies.push(vocabulary);
        self
    }

    /// Add a disallowed rule
    pub fn with_disallowed(mut self, rule: DisallowedFields) -> Self {
        self.disallowed.push(rule);
        self
    }

    /// Add an optional-elements rule
    pub fn with_optional_elements(mut self, rule: OptionalElements) -> Self {
        self.optional_elements.push(rule);
        self
    }

    /// Add an optional-attributes rule
    pub fn with_optional_attributes(mut self, rule: OptionalAttributes) -> Self {
        self.optional_attributes.push(rule);
        self
    }

    /// Add a translatable-field rule
    pub fn with_translatable(mut self, rule: TranslatableField) -> Self {
        self.translatable.push(rule);
        self
    }

    /// Give versioned nodes named `local_name` a version of their own
    pub fn with_version_override(mut self, local_name: impl Into<String>, version: Version) -> Self {
        self.version_overrides.insert(local_name.into(), version);
        self
    }

    /// Attach a companion step
    pub fn with_companion(mut self, companion: StepUpdater) -> Self {
        self.companion = Some(Box::new(companion));
        self
    }

    /// Namespaces whose elements take part in id uniqueness
    pub fn known_namespaces(&self) -> IndexSet<String> {
        let mut known: IndexSet<String> = self
            .namespaces
            .uris()
            .chain(self.namespace_remap.keys().map(String::as_str))
            .map(str::to_string)
            .collect();
        if let Some(companion) = &self.companion {
            known.extend(companion.known_namespaces());
        }
        known
    }

    /// Check every root node carries `from_version`
    pub fn check_version(&self, doc: &Document) -> Result<()> {
        let roots = self.root_xpath.select(doc, doc.root(), &self.namespaces)?;
        if roots.is_empty() && !self.embedded {
            return Err(UnknownVersionError::input(None)
                .with_reason(format!("no {} root node found", self.family))
                .with_node(doc.node_info(doc.root()))
                .into());
        }

        for node in roots {
            match self.version_shape.read(doc, node)? {
                None => {
                    return Err(UnknownVersionError::input(None)
                        .with_node(doc.node_info(node))
                        .into())
                }
                Some(found) if found != self.from_version => {
                    return Err(InvalidVersionError::new(self.from_version.to_string(), found.to_string())
                        .with_node(doc.node_info(node))
                        .into())
                }
                Some(_) => {}
            }
        }

        if let Some(companion) = &self.companion {
            companion.check_version(doc)?;
        }
        Ok(())
    }

    /// Untranslatable elements, outermost only, in document order
    ///
    /// Covers the disallowed rules, elements in a disallowed namespace and
    /// typed nodes whose type lives in one.
    pub fn find_disallowed(&self, doc: &Document) -> Result<Vec<NodeId>> {
        let root = doc.root();
        let typed = doc.typed_nodes(root);
        let mut found = Vec::new();

        for rule in &self.disallowed {
            found.extend(rule.find(doc, root, Some(&typed), &self.namespaces)?);
        }

        if !self.disallowed_namespaces.is_empty() {
            let in_disallowed = |ns: Option<&str>| ns.map_or(false, |ns| self.disallowed_namespaces.contains(ns));
            found.extend(
                doc.elements(root)
                    .into_iter()
                    .filter(|n| in_disallowed(doc.namespace(*n))),
            );
            found.extend(typed.iter().copied().filter(|n| {
                doc.type_info(*n)
                    .map_or(false, |info| in_disallowed(info.namespace.as_deref()))
            }));
        }

        if let Some(companion) = &self.companion {
            found.extend(companion.find_disallowed(doc)?);
        }

        Ok(outermost(doc, document_order(doc, found)))
    }

    /// Ids shared by more than one element in the known namespaces
    pub fn find_duplicates(&self, doc: &Document) -> IndexMap<String, Vec<NodeId>> {
        duplicate_ids(doc, doc.root(), &self.known_namespaces())
    }

    /// Fail if the step cannot run on `doc` as it stands
    pub fn check_update(&self, doc: &Document, options: &UpdateOptions) -> Result<()> {
        if options.check_versions {
            self.check_version(doc)?;
        }

        let disallowed = self.find_disallowed(doc)?;
        let duplicates = self.find_duplicates(doc);
        if disallowed.is_empty() && duplicates.is_empty() {
            return Ok(());
        }

        let report = UntranslatableError::new(
            disallowed.iter().map(|n| doc.node_info(*n)).collect(),
            duplicates
                .into_iter()
                .map(|(id, nodes)| (id, nodes.iter().map(|n| doc.node_info(*n)).collect()))
                .collect(),
        );
        Err(report.into())
    }

    /// Remove untranslatable content, then renumber the ids still colliding
    pub fn clean(&self, doc: &mut Document, options: &UpdateOptions) -> Result<Changes> {
        let mut removed = Vec::new();
        for node in self.find_disallowed(doc)? {
            if !doc.is_attached(node) {
                continue;
            }
            if node == doc.root() {
                return Err(Error::internal("the root element is untranslatable and cannot be removed"));
            }
            removed.push(doc.extract(node)?);
            doc.detach(node)?;
        }
        if !removed.is_empty() {
            warn!(removed = removed.len(), "removed untranslatable content");
        }

        let duplicates = self.find_duplicates(doc);
        let remapped = remap_ids(doc, duplicates, options)?;
        Ok(Changes { removed, remapped })
    }

    /// Check, clean if forced and allowed, then apply
    pub fn update(&self, doc: &mut Document, options: &UpdateOptions, force: bool) -> Result<Changes> {
        info!(
            family = %self.family,
            from = %self.from_version,
            to = %self.to_version,
            "updating"
        );

        match self.check_update(doc, options) {
            Ok(()) => {
                self.apply(doc, options)?;
                Ok(Changes::default())
            }
            Err(err) if force && err.is_recoverable() => {
                warn!(error = %err, "forcing update");
                let changes = self.clean(doc, options)?;
                self.apply(doc, options)?;
                debug!(
                    removed = changes.removed.len(),
                    remapped = changes.remapped.len(),
                    "forced update complete"
                );
                Ok(changes)
            }
            Err(err) => Err(err),
        }
    }
}

/// Drop nodes that sit below another node in the list
fn outermost(doc: &Document, nodes: Vec<NodeId>) -> Vec<NodeId> {
    let found: HashSet<NodeId> = nodes.iter().copied().collect();
    nodes
        .into_iter()
        .filter(|n| !doc.ancestors(*n).iter().any(|a| found.contains(a)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::QName;
    use crate::versions::CYBOX_NAMESPACE;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:old="urn:old"
    xmlns:gone="urn:gone"
    id="pkg" version="1.1"
    xsi:schemaLocation="http://stix.mitre.org/stix-1 http://stix.mitre.org/XMLSchema/core/1.1/stix_core.xsd urn:old http://old.xsd urn:gone http://gone.xsd">
  <!-- kept -->
  <stix:Indicators>
    <stix:Indicator id="ind-1" version="2.1"><old:Title old:lang="en">T</old:Title></stix:Indicator>
    <stix:Indicator id="ind-1" version="2.1"/>
  </stix:Indicators>
  <gone:Thing><gone:Inner/></gone:Thing>
  <stix:Empty/>
</stix:STIX_Package>"#;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn step() -> StepUpdater {
        let mut step = StepUpdater::new(Family::Stix, v("1.1"), v("1.1.1"))
            .unwrap()
            .with_namespace("old", "urn:old")
            .with_namespace_remap("urn:old", "urn:new")
            .with_schema_location("urn:new", "http://new.xsd")
            .with_disallowed_namespace("urn:gone")
            .with_version_override("Indicator", v("2.1.1"))
            .with_optional_elements(OptionalElements::from_xpath("//stix:Empty").unwrap());
        step.versioned_xpath = XPath::compile("//stix:STIX_Package | //stix:Indicator").unwrap();
        step
    }

    fn counter_options() -> UpdateOptions {
        let counter = Arc::new(AtomicUsize::new(0));
        UpdateOptions::default().with_new_id_func(move |id| format!("{}-cleaned-{}", id, counter.fetch_add(1, Ordering::SeqCst)))
    }

    fn find(doc: &Document, xpath: &str) -> Vec<NodeId> {
        let ns = step().target_namespaces().with_prefix("new", "urn:new");
        XPath::compile(xpath).unwrap().select(doc, doc.root(), &ns).unwrap()
    }

    #[test]
    fn test_check_update_reports_everything() {
        let doc = Document::from_string(DOC).unwrap();
        let err = step().check_update(&doc, &UpdateOptions::default()).unwrap_err();
        let report = match err {
            Error::Untranslatable(report) => report,
            other => panic!("expected untranslatable, got {:?}", other),
        };
        assert_eq!(report.disallowed.len(), 1);
        assert_eq!(report.disallowed[0].name, "gone:Thing");
        assert_eq!(report.disallowed[0].sourceline, Some(12));
        assert_eq!(report.duplicates["ind-1"].len(), 2);
    }

    #[test]
    fn test_update_without_force_leaves_document() {
        let mut doc = Document::from_string(DOC).unwrap();
        let before = doc.to_xml_string(false).unwrap();
        let err = step().update(&mut doc, &UpdateOptions::default(), false).unwrap_err();
        assert!(matches!(err, Error::Untranslatable(_)));
        assert_eq!(doc.to_xml_string(false).unwrap(), before);
    }

    #[test]
    fn test_forced_update() {
        let mut doc = Document::from_string(DOC).unwrap();
        let changes = step().update(&mut doc, &counter_options(), true).unwrap();
        let root = doc.root();

        assert_eq!(changes.removed.len(), 1);
        let removed = &changes.removed[0];
        assert_eq!(removed.prefixed_name(removed.root()), "gone:Thing");
        assert_eq!(removed.sourceline(removed.root()), Some(12));

        let nodes = &changes.remapped["ind-1"];
        assert_eq!(nodes.len(), 2);
        assert_eq!(doc.attribute_local(nodes[0], "id"), Some("ind-1-cleaned-0"));
        assert_eq!(doc.attribute_local(nodes[1], "id"), Some("ind-1-cleaned-1"));

        assert_eq!(doc.attribute_local(root, "version"), Some("1.1.1"));
        for indicator in find(&doc, "//stix:Indicator") {
            assert_eq!(doc.attribute_local(indicator, "version"), Some("2.1.1"));
        }

        let title = find(&doc, "//new:Title")[0];
        assert_eq!(doc.namespace(title), Some("urn:new"));
        assert_eq!(doc.attribute(title, &QName::namespaced("urn:new", "lang")), Some("en"));

        assert_eq!(
            doc.attribute(root, &QName::xsi_schema_location()),
            Some("http://stix.mitre.org/stix-1 http://stix.mitre.org/XMLSchema/core/1.1.1/stix_core.xsd urn:new http://new.xsd")
        );
        assert!(find(&doc, "//stix:Empty").is_empty());

        let element = doc.element(root).unwrap();
        assert_eq!(element.namespaces.get_namespace("gone"), None);
        assert_eq!(element.namespaces.get_namespace("old"), Some("urn:new"));

        let xml = doc.to_xml_string(true).unwrap();
        assert!(!xml.contains("urn:gone"));
        assert!(xml.contains("<!-- kept -->"));
        roxmltree::Document::parse(&xml).unwrap();
    }

    #[test]
    fn test_clean_ignores_ids_inside_removed_content() {
        let xml = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1" xmlns:gone="urn:gone" version="1.1">
  <stix:Indicator id="x" version="2.1"/>
  <gone:Thing><stix:Indicator id="x" version="2.1"/></gone:Thing>
  <stix:Indicator id="y" version="2.1"/>
  <stix:Indicator id="y" version="2.1"/>
</stix:STIX_Package>"#;
        let mut doc = Document::from_string(xml).unwrap();
        let changes = step().update(&mut doc, &counter_options(), true).unwrap();

        assert_eq!(changes.removed.len(), 1);
        assert!(!changes.remapped.contains_key("x"));
        assert_eq!(changes.remapped["y"].len(), 2);
        for node in &changes.remapped["y"] {
            assert!(doc.is_attached(*node));
        }

        let indicators = find(&doc, "//stix:Indicator");
        let ids: Vec<&str> = indicators
            .iter()
            .filter_map(|n| doc.attribute_local(*n, "id"))
            .collect();
        assert_eq!(ids, vec!["x", "y-cleaned-0", "y-cleaned-1"]);
    }

    #[test]
    fn test_version_mismatch() {
        let doc = Document::from_string(&DOC.replace(r#"version="1.1""#, r#"version="1.1.1""#)).unwrap();
        let err = step().check_version(&doc).unwrap_err();
        let mismatch = match err {
            Error::InvalidVersion(mismatch) => mismatch,
            other => panic!("expected invalid version, got {:?}", other),
        };
        assert_eq!(mismatch.expected, "1.1");
        assert_eq!(mismatch.found, "1.1.1");

        let unchecked = UpdateOptions::default().with_check_versions(false);
        assert!(matches!(
            step().check_update(&doc, &unchecked),
            Err(Error::Untranslatable(_))
        ));
    }

    #[test]
    fn test_already_updated_document_is_not_mutated() {
        let clean = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1" version="1.1.1"/>"#;
        let mut doc = Document::from_string(clean).unwrap();
        let before = doc.to_xml_string(false).unwrap();
        assert!(step().update(&mut doc, &UpdateOptions::default(), false).is_err());
        assert_eq!(doc.to_xml_string(false).unwrap(), before);
    }

    #[test]
    fn test_missing_root() {
        let doc = Document::from_string(r#"<cybox:Observables xmlns:cybox="http://cybox.mitre.org/cybox-2"/>"#).unwrap();
        assert!(matches!(step().check_version(&doc), Err(Error::UnknownVersion(_))));
    }

    #[test]
    fn test_companion() {
        let xml = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1" xmlns:cybox="http://cybox.mitre.org/cybox-2" version="1.0">
  <stix:Observables cybox_major_version="2" cybox_minor_version="0">
    <cybox:Observable id="obs-1"/>
  </stix:Observables>
</stix:STIX_Package>"#;
        let mut doc = Document::from_string(xml).unwrap();
        let step = StepUpdater::new(Family::Stix, v("1.0"), v("1.0.1"))
            .unwrap()
            .with_companion(StepUpdater::embedded_cybox(v("2.0"), v("2.0.1")).unwrap());

        assert!(step.known_namespaces().contains(CYBOX_NAMESPACE));
        step.update(&mut doc, &UpdateOptions::default(), false).unwrap();

        let observables = doc.child_elements(doc.root()).next().unwrap();
        assert_eq!(doc.attribute_local(doc.root(), "version"), Some("1.0.1"));
        assert_eq!(doc.attribute_local(observables, "cybox_minor_version"), Some("0"));
        assert_eq!(doc.attribute_local(observables, "cybox_update_version"), Some("1"));
    }

    #[test]
    fn test_companion_version_mismatch() {
        let xml = r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1" version="1.0">
  <stix:Observables cybox_major_version="2" cybox_minor_version="1"/>
</stix:STIX_Package>"#;
        let doc = Document::from_string(xml).unwrap();
        let step = StepUpdater::new(Family::Stix, v("1.0"), v("1.0.1"))
            .unwrap()
            .with_companion(StepUpdater::embedded_cybox(v("2.0"), v("2.0.1")).unwrap());
        assert!(matches!(
            step.check_update(&doc, &UpdateOptions::default()),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&step()).unwrap();
        let back: StepUpdater = serde_json::from_str(&json).unwrap();
        assert_eq!(back.from_version, v("1.1"));
        assert_eq!(back.version_overrides["Indicator"], v("2.1.1"));
        assert_eq!(back.optional_elements.len(), 1);
        assert!(back.disallowed_namespaces.contains("urn:gone"));
    }
}
