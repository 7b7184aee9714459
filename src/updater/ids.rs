use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use super::UpdateOptions;
use crate::documents::{Document, NodeId};
use crate::error::{Error, Result};
use crate::namespaces::QName;

/// Ids carried by more than one element in a known namespace
///
/// Elements outside `known` are opaque embedded content and never count.
pub(crate) fn duplicate_ids(doc: &Document, root: NodeId, known: &IndexSet<String>) -> IndexMap<String, Vec<NodeId>> {
    let id = QName::local("id");
    let mut seen: IndexMap<String, Vec<NodeId>> = IndexMap::new();

    for node in doc.elements(root) {
        let in_known = doc.namespace(node).map_or(false, |ns| known.contains(ns));
        if !in_known {
            continue;
        }
        if let Some(value) = doc.attribute(node, &id) {
            seen.entry(value.to_string()).or_default().push(node);
        }
    }

    seen.retain(|_, nodes| nodes.len() > 1);
    seen
}

/// Give every node in `duplicates` a fresh id
pub(crate) fn remap_ids(
    doc: &mut Document,
    duplicates: IndexMap<String, Vec<NodeId>>,
    options: &UpdateOptions,
) -> Result<IndexMap<String, Vec<NodeId>>> {
    if duplicates.is_empty() {
        return Ok(duplicates);
    }

    let id = QName::local("id");
    let mut taken: HashSet<String> = doc
        .elements(doc.root())
        .into_iter()
        .filter_map(|n| doc.attribute(n, &id).map(str::to_string))
        .collect();

    for (original, nodes) in &duplicates {
        for node in nodes {
            let fresh = options.new_id(original);
            if !taken.insert(fresh.clone()) {
                return Err(Error::internal(format!(
                    "id generator returned '{}', which is already in use",
                    fresh
                )));
            }
            doc.set_attribute(*node, id.clone(), fresh)?;
        }
        warn!(id = %original, nodes = nodes.len(), "remapped non-unique id");
    }
    Ok(duplicates)
}
