//! XPath 1.0 evaluation over a [`Document`]

use std::cmp::Ordering;
use std::collections::HashMap;

use super::parser::{CompareOp, Expr, NodeTest, Step, XPathAxis};
use crate::documents::{Document, NodeId, NodeKind};
use crate::error::{Error, Result};
use crate::namespaces::NamespaceMap;

/// A node as XPath sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Item {
    /// The document node above the root element
    Document,
    /// An element, text, comment or processing instruction
    Node(NodeId),
    /// The attribute at an index of an element's attribute list
    Attribute(NodeId, usize),
}

/// Intermediate value of an expression
#[derive(Debug, Clone)]
pub(crate) enum Value {
    Nodes(Vec<Item>),
    String(String),
    Number(f64),
    Boolean(bool),
}

pub(crate) struct Evaluator<'a> {
    doc: &'a Document,
    namespaces: &'a NamespaceMap,
    order: HashMap<NodeId, usize>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(doc: &'a Document, namespaces: &'a NamespaceMap) -> Self {
        Self {
            doc,
            namespaces,
            order: doc.document_order(),
        }
    }

    fn sort_key(&self, item: &Item) -> (usize, usize) {
        let position = |id: &NodeId| {
            self.order
                .get(id)
                .map(|p| p + 1)
                // detached nodes sort after the tree, in creation order
                .unwrap_or(self.order.len() + 1 + id.index())
        };
        match item {
            Item::Document => (0, 0),
            Item::Node(id) => (position(id), 0),
            Item::Attribute(id, i) => (position(id), i + 1),
        }
    }

    fn sort_unique(&self, mut items: Vec<Item>) -> Vec<Item> {
        items.sort_by_key(|i| self.sort_key(i));
        items.dedup();
        items
    }

    /// Evaluate `expr` with `context` as the context node
    pub(crate) fn evaluate(&self, expr: &Expr, context: Item) -> Result<Value> {
        self.eval(expr, context, 1, 1)
    }

    fn eval(&self, expr: &Expr, context: Item, position: usize, size: usize) -> Result<Value> {
        match expr {
            Expr::Or(a, b) => Ok(Value::Boolean(
                self.boolean(&self.eval(a, context, position, size)?)
                    || self.boolean(&self.eval(b, context, position, size)?),
            )),
            Expr::And(a, b) => Ok(Value::Boolean(
                self.boolean(&self.eval(a, context, position, size)?)
                    && self.boolean(&self.eval(b, context, position, size)?),
            )),
            Expr::Compare(op, a, b) => {
                let left = self.eval(a, context, position, size)?;
                let right = self.eval(b, context, position, size)?;
                Ok(Value::Boolean(self.compare(*op, &left, &right)))
            }
            Expr::Union(a, b) => {
                let mut items = self.node_set(self.eval(a, context, position, size)?)?;
                items.extend(self.node_set(self.eval(b, context, position, size)?)?);
                Ok(Value::Nodes(self.sort_unique(items)))
            }
            Expr::Literal(s) => Ok(Value::String(s.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Function(name, args) => self.function(name, args, context, position, size),
            Expr::Path { absolute, steps } => {
                let start = if *absolute { Item::Document } else { context };
                self.steps(vec![start], steps).map(Value::Nodes)
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let items = self.node_set(self.eval(primary, context, position, size)?)?;
                let items = self.apply_predicates(items, predicates)?;
                self.steps(items, steps).map(Value::Nodes)
            }
        }
    }

    fn node_set(&self, value: Value) -> Result<Vec<Item>> {
        match value {
            Value::Nodes(items) => Ok(items),
            other => Err(Error::XPath(format!(
                "expected a node-set, got {:?}",
                other
            ))),
        }
    }

    fn steps(&self, mut items: Vec<Item>, steps: &[Step]) -> Result<Vec<Item>> {
        for step in steps {
            let mut next = Vec::new();
            for item in &items {
                let candidates: Vec<Item> = self
                    .axis(step.axis, *item)
                    .into_iter()
                    .filter(|c| self.matches(step.axis, &step.test, *c))
                    .collect();
                next.extend(self.apply_predicates(candidates, &step.predicates)?);
            }
            items = self.sort_unique(next);
        }
        Ok(items)
    }

    /// Filter `items` (in axis order) through each predicate in turn
    fn apply_predicates(&self, mut items: Vec<Item>, predicates: &[Expr]) -> Result<Vec<Item>> {
        for predicate in predicates {
            let size = items.len();
            let mut kept = Vec::with_capacity(size);
            for (index, item) in items.into_iter().enumerate() {
                let value = self.eval(predicate, item, index + 1, size)?;
                let keep = match value {
                    Value::Number(n) => n == (index + 1) as f64,
                    other => self.boolean(&other),
                };
                if keep {
                    kept.push(item);
                }
            }
            items = kept;
        }
        Ok(items)
    }

    fn parent(&self, item: Item) -> Option<Item> {
        match item {
            Item::Document => None,
            Item::Attribute(id, _) => Some(Item::Node(id)),
            Item::Node(id) if id == self.doc.root() => Some(Item::Document),
            Item::Node(id) => self.doc.parent(id).map(Item::Node),
        }
    }

    fn child_items(&self, item: Item) -> Vec<Item> {
        match item {
            Item::Document => vec![Item::Node(self.doc.root())],
            Item::Node(id) => self.doc.children(id).iter().map(|c| Item::Node(*c)).collect(),
            Item::Attribute(..) => Vec::new(),
        }
    }

    fn descendant_items(&self, item: Item) -> Vec<Item> {
        match item {
            Item::Document => {
                let root = self.doc.root();
                std::iter::once(root)
                    .chain(self.doc.descendants(root))
                    .map(Item::Node)
                    .collect()
            }
            Item::Node(id) => self.doc.descendants(id).into_iter().map(Item::Node).collect(),
            Item::Attribute(..) => Vec::new(),
        }
    }

    /// Nodes along an axis, nearest first for reverse axes
    fn axis(&self, axis: XPathAxis, item: Item) -> Vec<Item> {
        match axis {
            XPathAxis::Child => self.child_items(item),
            XPathAxis::Descendant => self.descendant_items(item),
            XPathAxis::DescendantOrSelf => {
                let mut out = vec![item];
                out.extend(self.descendant_items(item));
                out
            }
            XPathAxis::Self_ => vec![item],
            XPathAxis::Parent => self.parent(item).into_iter().collect(),
            XPathAxis::Ancestor | XPathAxis::AncestorOrSelf => {
                let mut out = Vec::new();
                if axis == XPathAxis::AncestorOrSelf {
                    out.push(item);
                }
                let mut current = self.parent(item);
                while let Some(p) = current {
                    out.push(p);
                    current = self.parent(p);
                }
                out
            }
            XPathAxis::FollowingSibling | XPathAxis::PrecedingSibling => {
                let Item::Node(id) = item else {
                    return Vec::new();
                };
                let Some(parent) = self.doc.parent(id) else {
                    return Vec::new();
                };
                let siblings = self.doc.children(parent);
                let Some(index) = siblings.iter().position(|s| *s == id) else {
                    return Vec::new();
                };
                if axis == XPathAxis::FollowingSibling {
                    siblings[index + 1..].iter().map(|s| Item::Node(*s)).collect()
                } else {
                    siblings[..index].iter().rev().map(|s| Item::Node(*s)).collect()
                }
            }
            XPathAxis::Attribute => match item {
                Item::Node(id) => self
                    .doc
                    .element(id)
                    .map(|e| (0..e.attributes.len()).map(|i| Item::Attribute(id, i)).collect())
                    .unwrap_or_default(),
                _ => Vec::new(),
            },
        }
    }

    /// Namespace URI and local name of an element or attribute item
    fn expanded_name(&self, item: Item) -> Option<(Option<&str>, &str)> {
        match item {
            Item::Node(id) => self
                .doc
                .element(id)
                .map(|e| (e.namespace(), e.local_name())),
            Item::Attribute(id, i) => self
                .doc
                .element(id)
                .and_then(|e| e.attributes.get_index(i))
                .map(|(name, _)| (name.namespace(), name.local_name.as_str())),
            Item::Document => None,
        }
    }

    fn matches(&self, axis: XPathAxis, test: &NodeTest, item: Item) -> bool {
        let principal = match (axis, item) {
            (XPathAxis::Attribute, Item::Attribute(..)) => true,
            (XPathAxis::Attribute, _) => false,
            (_, Item::Node(id)) => self.doc.element(id).is_some(),
            _ => false,
        };
        match test {
            NodeTest::Node => true,
            NodeTest::Text => matches!(
                item,
                Item::Node(id) if self.doc.kind(id).character_data().is_some()
            ),
            NodeTest::Any => principal,
            NodeTest::NamespaceAny(prefix) => {
                principal
                    && self.expanded_name(item).map_or(false, |(ns, _)| {
                        ns.is_some() && ns == self.namespaces.get_namespace(prefix)
                    })
            }
            NodeTest::Name { prefix, local } => {
                if !principal {
                    return false;
                }
                let wanted = match prefix {
                    Some(p) => match self.namespaces.get_namespace(p) {
                        Some(uri) => Some(uri),
                        None => return false,
                    },
                    None => None,
                };
                self.expanded_name(item)
                    .map_or(false, |(ns, name)| name == local && ns == wanted)
            }
        }
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    fn item_string(&self, item: Item) -> String {
        match item {
            Item::Document => self.doc.string_value(self.doc.root()),
            Item::Node(id) => self.doc.string_value(id),
            Item::Attribute(id, i) => self
                .doc
                .element(id)
                .and_then(|e| e.attributes.get_index(i))
                .map(|(_, a)| a.value.clone())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(items) => items.first().map(|i| self.item_string(*i)).unwrap_or_default(),
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            other => self.string(other).trim().parse().unwrap_or(f64::NAN),
        }
    }

    pub(crate) fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(items) => !items.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
        }
    }

    fn compare(&self, op: CompareOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => {
                let rights: Vec<Value> = b.iter().map(|i| Value::String(self.item_string(*i))).collect();
                a.iter().any(|i| {
                    let l = Value::String(self.item_string(*i));
                    rights.iter().any(|r| self.compare_atomic(op, &l, r))
                })
            }
            (Value::Nodes(a), Value::Boolean(_)) => {
                self.compare_atomic(op, &Value::Boolean(!a.is_empty()), right)
            }
            (Value::Boolean(_), Value::Nodes(b)) => {
                self.compare_atomic(op, left, &Value::Boolean(!b.is_empty()))
            }
            (Value::Nodes(a), other) => a
                .iter()
                .any(|i| self.compare_atomic(op, &Value::String(self.item_string(*i)), other)),
            (other, Value::Nodes(b)) => b
                .iter()
                .any(|i| self.compare_atomic(op, other, &Value::String(self.item_string(*i)))),
            (l, r) => self.compare_atomic(op, l, r),
        }
    }

    fn compare_atomic(&self, op: CompareOp, left: &Value, right: &Value) -> bool {
        match op {
            CompareOp::Eq | CompareOp::Ne => {
                let equal = match (left, right) {
                    (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
                        self.boolean(left) == self.boolean(right)
                    }
                    (Value::Number(_), _) | (_, Value::Number(_)) => {
                        self.number(left) == self.number(right)
                    }
                    _ => self.string(left) == self.string(right),
                };
                (op == CompareOp::Eq) == equal
            }
            _ => {
                let ordering = self.number(left).partial_cmp(&self.number(right));
                match (op, ordering) {
                    (_, None) => false,
                    (CompareOp::Lt, Some(o)) => o == Ordering::Less,
                    (CompareOp::Le, Some(o)) => o != Ordering::Greater,
                    (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
                    (CompareOp::Ge, Some(o)) => o != Ordering::Less,
                    _ => false,
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn function(&self, name: &str, args: &[Expr], context: Item, position: usize, size: usize) -> Result<Value> {
        let arity = |min: usize, max: usize| -> Result<()> {
            if args.len() < min || args.len() > max {
                return Err(Error::XPath(format!(
                    "{}() takes {} to {} arguments, got {}",
                    name,
                    min,
                    max,
                    args.len()
                )));
            }
            Ok(())
        };
        let arg = |i: usize| self.eval(&args[i], context, position, size);
        // Optional single argument defaulting to the context node
        let arg_or_context = || -> Result<Value> {
            match args.first() {
                Some(a) => self.eval(a, context, position, size),
                None => Ok(Value::Nodes(vec![context])),
            }
        };

        match name {
            "not" => {
                arity(1, 1)?;
                Ok(Value::Boolean(!self.boolean(&arg(0)?)))
            }
            "boolean" => {
                arity(1, 1)?;
                Ok(Value::Boolean(self.boolean(&arg(0)?)))
            }
            "true" => {
                arity(0, 0)?;
                Ok(Value::Boolean(true))
            }
            "false" => {
                arity(0, 0)?;
                Ok(Value::Boolean(false))
            }
            "count" => {
                arity(1, 1)?;
                let items = self.node_set(arg(0)?)?;
                Ok(Value::Number(items.len() as f64))
            }
            "position" => {
                arity(0, 0)?;
                Ok(Value::Number(position as f64))
            }
            "last" => {
                arity(0, 0)?;
                Ok(Value::Number(size as f64))
            }
            "local-name" | "name" | "namespace-uri" => {
                arity(0, 1)?;
                let items = self.node_set(arg_or_context()?)?;
                let Some(first) = items.first().copied() else {
                    return Ok(Value::String(String::new()));
                };
                Ok(Value::String(self.name_part(name, first)))
            }
            "string" => {
                arity(0, 1)?;
                Ok(Value::String(self.string(&arg_or_context()?)))
            }
            "number" => {
                arity(0, 1)?;
                Ok(Value::Number(self.number(&arg_or_context()?)))
            }
            "normalize-space" => {
                arity(0, 1)?;
                let s = self.string(&arg_or_context()?);
                Ok(Value::String(s.split_whitespace().collect::<Vec<_>>().join(" ")))
            }
            "string-length" => {
                arity(0, 1)?;
                let s = self.string(&arg_or_context()?);
                Ok(Value::Number(s.chars().count() as f64))
            }
            "contains" => {
                arity(2, 2)?;
                let haystack = self.string(&arg(0)?);
                let needle = self.string(&arg(1)?);
                Ok(Value::Boolean(haystack.contains(&needle)))
            }
            "starts-with" => {
                arity(2, 2)?;
                let haystack = self.string(&arg(0)?);
                let prefix = self.string(&arg(1)?);
                Ok(Value::Boolean(haystack.starts_with(&prefix)))
            }
            "concat" => {
                arity(2, usize::MAX)?;
                let mut out = String::new();
                for i in 0..args.len() {
                    out.push_str(&self.string(&arg(i)?));
                }
                Ok(Value::String(out))
            }
            other => Err(Error::XPath(format!("Unknown function: {}()", other))),
        }
    }

    fn name_part(&self, function: &str, item: Item) -> String {
        let (Item::Node(id) | Item::Attribute(id, _)) = item else {
            return String::new();
        };
        let Some(element) = self.doc.element(id) else {
            return match (function, self.doc.kind(id)) {
                ("name" | "local-name", NodeKind::ProcessingInstruction(pi)) => {
                    pi.split_whitespace().next().unwrap_or_default().to_string()
                }
                _ => String::new(),
            };
        };
        match (function, item) {
            ("local-name", Item::Attribute(_, i)) => element
                .attributes
                .get_index(i)
                .map(|(n, _)| n.local_name.clone())
                .unwrap_or_default(),
            ("name", Item::Attribute(_, i)) => element
                .attributes
                .get_index(i)
                .map(|(n, a)| crate::names::join_qname(a.prefix.as_deref(), &n.local_name))
                .unwrap_or_default(),
            ("namespace-uri", Item::Attribute(_, i)) => element
                .attributes
                .get_index(i)
                .and_then(|(n, _)| n.namespace.clone())
                .unwrap_or_default(),
            ("local-name", _) => element.local_name().to_string(),
            ("name", _) => element.prefixed_name(),
            _ => element.namespace().unwrap_or_default().to_string(),
        }
    }
}

/// XPath string form of a number
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
