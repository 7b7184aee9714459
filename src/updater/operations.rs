//! The sub-operations a step runs, in order

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{StepUpdater, UpdateOptions};
use crate::documents::Document;
use crate::error::Result;
use crate::namespaces::{NamespaceMap, QName};

impl StepUpdater {
    /// Where a namespace goes after this step; `None` when it stays or is dropped
    fn remapped_namespace(&self, namespace: &str) -> Option<&str> {
        if self.disallowed_namespaces.contains(namespace) {
            return None;
        }
        self.namespace_remap.get(namespace).map(String::as_str)
    }

    /// The reference prefix map with remapped URIs swapped in
    ///
    /// Rules that run after the namespace rewrite resolve against this map.
    pub fn target_namespaces(&self) -> NamespaceMap {
        let mut namespaces = self.namespaces.clone();
        namespaces.retain_map(|uri| Some(self.remapped_namespace(uri).unwrap_or(uri).to_string()));
        namespaces
    }

    /// Rewrite tags, attribute names and prefix bindings; returns the number
    /// of elements touched
    ///
    /// Bindings of disallowed namespaces are dropped, along with attributes
    /// in them.
    pub fn rewrite_namespaces(&self, doc: &mut Document) -> Result<usize> {
        if self.namespace_remap.is_empty() && self.disallowed_namespaces.is_empty() {
            return Ok(0);
        }

        let mut touched = 0;
        for node in doc.elements(doc.root()) {
            let Some(element) = doc.element_mut(node) else { continue };
            let mut changed = false;

            if let Some(new) = element.namespace().and_then(|ns| self.remapped_namespace(ns)) {
                element.name = QName::namespaced(new, element.name.local_name.clone());
                changed = true;
            }

            let affected = element.attributes.keys().any(|name| {
                name.namespace().map_or(false, |ns| {
                    self.disallowed_namespaces.contains(ns) || self.namespace_remap.contains_key(ns)
                })
            });
            if affected {
                let attributes = std::mem::take(&mut element.attributes);
                element.attributes = attributes
                    .into_iter()
                    .filter_map(|(name, attribute)| match name.namespace() {
                        Some(ns) if self.disallowed_namespaces.contains(ns) => None,
                        Some(ns) => match self.remapped_namespace(ns) {
                            Some(new) => Some((QName::namespaced(new, name.local_name.clone()), attribute)),
                            None => Some((name, attribute)),
                        },
                        None => Some((name, attribute)),
                    })
                    .collect::<IndexMap<_, _>>();
                changed = true;
            }

            let rebound = element.namespaces.retain_map(|uri| {
                if self.disallowed_namespaces.contains(uri) {
                    None
                } else {
                    Some(self.remapped_namespace(uri).unwrap_or(uri).to_string())
                }
            });

            if changed || rebound > 0 {
                touched += 1;
            }
        }

        debug!(touched, "rewrote namespaces");
        Ok(touched)
    }

    /// Rewrite `xsi:schemaLocation` on the root; returns whether it changed
    pub fn rewrite_schema_locations(&self, doc: &mut Document) -> Result<bool> {
        let root = doc.root();
        let name = QName::xsi_schema_location();
        let Some(value) = doc.attribute(root, &name) else {
            return Ok(false);
        };

        let tokens: Vec<&str> = value.split_whitespace().collect();
        if tokens.len() % 2 != 0 {
            warn!(value = %value, "schemaLocation has an odd number of tokens; dropping the last");
        }

        let mut pairs: Vec<String> = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks_exact(2) {
            let (namespace, url) = (pair[0], pair[1]);
            if self.disallowed_namespaces.contains(namespace) {
                continue;
            }
            let namespace = self.remapped_namespace(namespace).unwrap_or(namespace);
            let url = self.schema_locations.get(namespace).map_or(url, String::as_str);
            pairs.push(format!("{} {}", namespace, url));
        }

        if pairs.is_empty() {
            doc.remove_attribute(root, &name);
            debug!("removed empty schemaLocation");
            return Ok(true);
        }

        let rewritten = pairs.join(" ");
        if rewritten == value {
            return Ok(false);
        }
        doc.set_attribute(root, name, rewritten)?;
        debug!(pairs = pairs.len(), "rewrote schema locations");
        Ok(true)
    }

    /// Write the target version onto every versioned node
    pub fn rewrite_versions(&self, doc: &mut Document, namespaces: &NamespaceMap) -> Result<usize> {
        let nodes = self.versioned_xpath.select(doc, doc.root(), namespaces)?;
        for node in &nodes {
            let version = doc
                .local_name(*node)
                .and_then(|local| self.version_overrides.get(local))
                .unwrap_or(&self.to_version)
                .clone();
            self.version_shape.write(doc, *node, &version)?;
        }
        debug!(nodes = nodes.len(), version = %self.to_version, "rewrote versions");
        Ok(nodes.len())
    }

    /// Run every translatable-field rule
    pub fn translate_fields(&self, doc: &mut Document, namespaces: &NamespaceMap) -> Result<usize> {
        let root = doc.root();
        let mut translated = 0;
        for rule in &self.translatable {
            translated += rule.translate(doc, root, namespaces)?;
        }
        Ok(translated)
    }

    /// Run every vocabulary rule against one scan of the typed nodes
    pub fn update_vocabularies(&self, doc: &mut Document) -> Result<usize> {
        if self.vocabularies.is_empty() {
            return Ok(0);
        }
        let root = doc.root();
        let typed = doc.typed_nodes(root);
        let mut updated = 0;
        for vocab in &self.vocabularies {
            updated += vocab.update(doc, root, Some(&typed))?;
        }
        Ok(updated)
    }

    /// Prune vacant optional elements, then empty optional attributes
    pub fn remove_optionals(&self, doc: &mut Document, namespaces: &NamespaceMap) -> Result<usize> {
        let root = doc.root();
        let mut removed = 0;
        for rule in &self.optional_elements {
            removed += rule.remove(doc, root, namespaces)?;
        }
        for rule in &self.optional_attributes {
            removed += rule.remove(doc, root, namespaces)?;
        }
        Ok(removed)
    }

    /// Apply the step to a document that passed (or was cleaned for) the check
    pub fn apply(&self, doc: &mut Document, options: &UpdateOptions) -> Result<()> {
        self.rewrite_namespaces(doc)?;
        self.rewrite_schema_locations(doc)?;

        let namespaces = self.target_namespaces();
        self.rewrite_versions(doc, &namespaces)?;

        if let Some(companion) = &self.companion {
            companion.apply(doc, options)?;
        }

        self.translate_fields(doc, &namespaces)?;
        if options.update_vocabularies {
            self.update_vocabularies(doc)?;
        }
        if options.remove_optionals {
            self.remove_optionals(doc, &namespaces)?;
        }
        Ok(())
    }
}
