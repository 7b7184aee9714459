use indexmap::IndexMap;

use crate::documents::{Document, NodeId};

/// What a forced step had to do to the document before updating it
#[derive(Debug, Clone, Default)]
pub struct Changes {
    /// Standalone copies of the subtrees that were detached
    pub removed: Vec<Document>,
    /// Original id to the nodes now carrying a fresh id
    pub remapped: IndexMap<String, Vec<NodeId>>,
}

impl Changes {
    /// True when nothing was removed or remapped
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.remapped.is_empty()
    }

    /// Fold a later step's changes into this record
    pub fn merge(&mut self, other: Changes) {
        self.removed.extend(other.removed);
        for (id, nodes) in other.remapped {
            self.remapped.entry(id).or_default().extend(nodes);
        }
    }
}
