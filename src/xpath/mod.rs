//! XPath support
//!
//! Rule declarations locate content with XPath 1.0 expressions. This module
//! compiles those expressions once and evaluates them against a
//! [`Document`] with a caller-supplied prefix map.
//!
//! ## Supported subset
//!
//! - Axes: child, descendant, descendant-or-self, self, parent, ancestor,
//!   ancestor-or-self, following-sibling, preceding-sibling, attribute
//! - Abbreviations: `//`, `.`, `..`, `@`
//! - Node tests: `*`, `prefix:*`, names, `node()`, `text()`
//! - Predicates with positions, comparisons, `and` / `or`, unions
//! - Functions: `not`, `boolean`, `true`, `false`, `count`, `position`,
//!   `last`, `local-name`, `name`, `namespace-uri`, `string`, `number`,
//!   `normalize-space`, `string-length`, `contains`, `starts-with`, `concat`
//!
//! Unprefixed names match elements in no namespace, as in XPath 1.0. A
//! prefix missing from the supplied map is an error.

mod eval;
mod parser;

pub use parser::{NodeTest, XPathAxis};

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::documents::{Document, NodeId};
use crate::error::{Error, Result};
use crate::namespaces::{NamespaceMap, QName};
use eval::{Evaluator, Item, Value};
use parser::{Expr, Step};

/// A node in an XPath result
#[derive(Debug, Clone, PartialEq)]
pub enum XPathNode {
    /// The document node
    Document,
    /// A tree node
    Node(NodeId),
    /// An attribute of an element
    Attribute {
        /// Element carrying the attribute
        owner: NodeId,
        /// Attribute name
        name: QName,
        /// Attribute value
        value: String,
    },
}

/// Result of XPath evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum XPathResult {
    /// A node set result, in document order
    Nodes(Vec<XPathNode>),
    /// A boolean result
    Boolean(bool),
    /// A number result
    Number(f64),
    /// A string result
    String(String),
}

impl XPathResult {
    /// Check if the result is true (for boolean or non-empty nodes)
    pub fn is_truthy(&self) -> bool {
        match self {
            XPathResult::Boolean(b) => *b,
            XPathResult::Nodes(nodes) => !nodes.is_empty(),
            XPathResult::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathResult::String(s) => !s.is_empty(),
        }
    }

    /// Get as nodes if applicable
    pub fn as_nodes(&self) -> Option<&[XPathNode]> {
        match self {
            XPathResult::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }
}

/// A compiled XPath expression
#[derive(Clone)]
pub struct XPath {
    expression: String,
    expr: Expr,
}

impl XPath {
    /// Compile an expression
    pub fn compile(expression: &str) -> Result<Self> {
        let expr = parser::parse(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            expr,
        })
    }

    /// The context node itself (`.`)
    pub fn self_node() -> Self {
        Self {
            expression: ".".to_string(),
            expr: Expr::Path {
                absolute: false,
                steps: vec![Step::self_node()],
            },
        }
    }

    /// Source text of the expression
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    fn check_prefixes(&self, namespaces: &NamespaceMap) -> Result<()> {
        match self
            .expr
            .prefixes()
            .into_iter()
            .find(|p| namespaces.get_namespace(p).is_none())
        {
            Some(prefix) => Err(Error::XPath(format!(
                "Undefined namespace prefix '{}' in '{}'",
                prefix, self.expression
            ))),
            None => Ok(()),
        }
    }

    /// Evaluate to a general result
    pub fn evaluate(&self, doc: &Document, context: NodeId, namespaces: &NamespaceMap) -> Result<XPathResult> {
        self.check_prefixes(namespaces)?;
        let evaluator = Evaluator::new(doc, namespaces);
        let value = evaluator.evaluate(&self.expr, Item::Node(context))?;
        Ok(match value {
            Value::Nodes(items) => XPathResult::Nodes(
                items
                    .into_iter()
                    .map(|item| match item {
                        Item::Document => XPathNode::Document,
                        Item::Node(id) => XPathNode::Node(id),
                        Item::Attribute(owner, i) => {
                            let (name, attr) = doc
                                .element(owner)
                                .and_then(|e| e.attributes.get_index(i))
                                .map(|(n, a)| (n.clone(), a.value.clone()))
                                .unwrap_or_else(|| (QName::local(""), String::new()));
                            XPathNode::Attribute {
                                owner,
                                name,
                                value: attr,
                            }
                        }
                    })
                    .collect(),
            ),
            Value::Boolean(b) => XPathResult::Boolean(b),
            Value::Number(n) => XPathResult::Number(n),
            Value::String(s) => XPathResult::String(s),
        })
    }

    /// Tree nodes selected by the expression, in document order
    ///
    /// Fails if the expression does not produce a node-set.
    pub fn select_nodes(&self, doc: &Document, context: NodeId, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        match self.evaluate(doc, context, namespaces)? {
            XPathResult::Nodes(nodes) => Ok(nodes
                .into_iter()
                .filter_map(|n| match n {
                    XPathNode::Node(id) => Some(id),
                    _ => None,
                })
                .collect()),
            other => Err(Error::XPath(format!(
                "'{}' does not select nodes (got {:?})",
                self.expression, other
            ))),
        }
    }

    /// Elements selected by the expression, in document order
    pub fn select(&self, doc: &Document, context: NodeId, namespaces: &NamespaceMap) -> Result<Vec<NodeId>> {
        Ok(self
            .select_nodes(doc, context, namespaces)?
            .into_iter()
            .filter(|id| doc.element(*id).is_some())
            .collect())
    }

    /// Effective boolean value of the expression
    pub fn test(&self, doc: &Document, context: NodeId, namespaces: &NamespaceMap) -> Result<bool> {
        Ok(self.evaluate(doc, context, namespaces)?.is_truthy())
    }

    /// String value of the expression
    pub fn string(&self, doc: &Document, context: NodeId, namespaces: &NamespaceMap) -> Result<String> {
        self.check_prefixes(namespaces)?;
        let evaluator = Evaluator::new(doc, namespaces);
        let value = evaluator.evaluate(&self.expr, Item::Node(context))?;
        Ok(evaluator.string(&value))
    }
}

impl fmt::Debug for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("XPath").field(&self.expression).finish()
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for XPath {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Default for XPath {
    fn default() -> Self {
        Self::self_node()
    }
}

impl std::str::FromStr for XPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl Serialize for XPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for XPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let expression = String::deserialize(deserializer)?;
        XPath::compile(&expression).map_err(serde::de::Error::custom)
    }
}
