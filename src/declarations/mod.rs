//! Declaration primitives
//!
//! Step updaters are assembled from five kinds of small rule values:
//!
//! - [`Vocabulary`]: rewrite controlled-vocabulary `xsi:type`s and terms
//! - [`DisallowedFields`]: content that cannot be carried to the next version
//! - [`OptionalElements`]: elements that may be dropped when vacant
//! - [`OptionalAttributes`]: attributes that may be dropped when empty
//! - [`TranslatableField`]: elements that are renamed or rebuilt
//!
//! Every rule has a `find` operation returning matching nodes in document
//! order, and a mutating operation. Rules hold configuration only; the same
//! rule can be applied to any number of documents. All of them deserialize
//! from JSON, apart from the function-valued hooks.

mod disallowed;
mod optionals;
mod translatable;
mod vocabulary;

pub use disallowed::{DisallowedFields, Predicate, PredicateFn};
pub use optionals::{OptionalAttributes, OptionalElements};
pub use translatable::{ReplacementBuilder, TranslatableField, TranslationKind};
pub use vocabulary::Vocabulary;

use std::collections::HashSet;

use crate::documents::{Document, NodeId};
use crate::namespaces::NamespaceMap;

/// Sort nodes into document order and drop repeats
pub(crate) fn document_order(doc: &Document, nodes: Vec<NodeId>) -> Vec<NodeId> {
    let order = doc.document_order();
    let mut seen = HashSet::new();
    let mut nodes: Vec<NodeId> = nodes.into_iter().filter(|n| seen.insert(*n)).collect();
    nodes.sort_by_key(|n| order.get(n).copied().unwrap_or(usize::MAX));
    nodes
}

/// A rule's own prefix map, or the step's when it has none
pub(crate) fn scope<'a>(own: &'a Option<NamespaceMap>, step: &'a NamespaceMap) -> &'a NamespaceMap {
    own.as_ref().unwrap_or(step)
}
