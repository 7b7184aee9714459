//! XPath expression parser
//!
//! A tokenizer followed by a recursive-descent parser producing [`Expr`].
//! The grammar covers location paths over the child, descendant, self,
//! parent, ancestor, sibling and attribute axes, predicates, unions,
//! comparisons, boolean operators and function calls.

use std::fmt;

use crate::error::{Error, Result};
use crate::names::{is_ncname_char, is_ncname_start_char};

/// XPath axis types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XPathAxis {
    /// child:: axis (default)
    Child,
    /// descendant:: axis
    Descendant,
    /// descendant-or-self:: axis
    DescendantOrSelf,
    /// self:: axis
    Self_,
    /// parent:: axis
    Parent,
    /// ancestor:: axis
    Ancestor,
    /// ancestor-or-self:: axis
    AncestorOrSelf,
    /// following-sibling:: axis
    FollowingSibling,
    /// preceding-sibling:: axis
    PrecedingSibling,
    /// attribute:: axis
    Attribute,
}

impl XPathAxis {
    /// Parse axis from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "child" => Some(Self::Child),
            "descendant" => Some(Self::Descendant),
            "descendant-or-self" => Some(Self::DescendantOrSelf),
            "self" => Some(Self::Self_),
            "parent" => Some(Self::Parent),
            "ancestor" => Some(Self::Ancestor),
            "ancestor-or-self" => Some(Self::AncestorOrSelf),
            "following-sibling" => Some(Self::FollowingSibling),
            "preceding-sibling" => Some(Self::PrecedingSibling),
            "attribute" => Some(Self::Attribute),
            _ => None,
        }
    }

    /// Check if this axis is reverse (positions count back from the context)
    pub fn is_reverse(&self) -> bool {
        matches!(
            self,
            Self::Parent | Self::Ancestor | Self::AncestorOrSelf | Self::PrecedingSibling
        )
    }
}

impl fmt::Display for XPathAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Child => "child",
            Self::Descendant => "descendant",
            Self::DescendantOrSelf => "descendant-or-self",
            Self::Self_ => "self",
            Self::Parent => "parent",
            Self::Ancestor => "ancestor",
            Self::AncestorOrSelf => "ancestor-or-self",
            Self::FollowingSibling => "following-sibling",
            Self::PrecedingSibling => "preceding-sibling",
            Self::Attribute => "attribute",
        };
        write!(f, "{}", s)
    }
}

/// Node test in a location step
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// `*`
    Any,
    /// `prefix:*`
    NamespaceAny(String),
    /// `prefix:local` or `local`
    Name {
        /// Prefix, resolved at evaluation time
        prefix: Option<String>,
        /// Local name
        local: String,
    },
    /// `node()`
    Node,
    /// `text()`
    Text,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One step of a location path
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: XPathAxis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn new(axis: XPathAxis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }

    /// `self::node()`, written `.`
    pub fn self_node() -> Self {
        Self::new(XPathAxis::Self_, NodeTest::Node)
    }

    fn descendant_or_self() -> Self {
        Self::new(XPathAxis::DescendantOrSelf, NodeTest::Node)
    }
}

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Function(String, Vec<Expr>),
    /// A location path; `absolute` paths start at the document node
    Path { absolute: bool, steps: Vec<Step> },
    /// `(expr)[pred]/steps`
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

impl Expr {
    /// Every namespace prefix the expression refers to
    pub fn prefixes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_prefixes(&mut out);
        out
    }

    fn collect_prefixes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Or(a, b) | Expr::And(a, b) | Expr::Compare(_, a, b) | Expr::Union(a, b) => {
                a.collect_prefixes(out);
                b.collect_prefixes(out);
            }
            Expr::Function(_, args) => args.iter().for_each(|a| a.collect_prefixes(out)),
            Expr::Path { steps, .. } => collect_step_prefixes(steps, out),
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                primary.collect_prefixes(out);
                predicates.iter().for_each(|p| p.collect_prefixes(out));
                collect_step_prefixes(steps, out);
            }
            Expr::Literal(_) | Expr::Number(_) => {}
        }
    }
}

fn collect_step_prefixes<'a>(steps: &'a [Step], out: &mut Vec<&'a str>) {
    for step in steps {
        match &step.test {
            NodeTest::NamespaceAny(p) => out.push(p),
            NodeTest::Name {
                prefix: Some(p), ..
            } => out.push(p),
            _ => {}
        }
        step.predicates.iter().for_each(|p| p.collect_prefixes(out));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    ColonColon,
    Op(CompareOp),
    Literal(String),
    Number(f64),
    /// NCName, `prefix:local` or `prefix:*`
    Name(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            ':' if next == Some(':') => {
                tokens.push(Token::ColonColon);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CompareOp::Lt));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(CompareOp::Gt));
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| Error::XPath(format!("Unterminated literal in '{}'", input)))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !next.map_or(false, |n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| Error::XPath(format!("Invalid number '{}'", text)))?;
                tokens.push(Token::Number(value));
            }
            c if is_ncname_start_char(c) => {
                let start = i;
                i = scan_ncname(&chars, i);
                // `prefix:local` or `prefix:*`, but not the `::` of an axis
                if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
                    match chars.get(i + 1) {
                        Some('*') => i += 2,
                        Some(n) if is_ncname_start_char(*n) => i = scan_ncname(&chars, i + 1),
                        _ => {
                            return Err(Error::XPath(format!(
                                "Invalid name at offset {} in '{}'",
                                start, input
                            )))
                        }
                    }
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::XPath(format!(
                    "Unexpected character '{}' in '{}'",
                    other, input
                )))
            }
        }
    }

    Ok(tokens)
}

fn scan_ncname(chars: &[char], mut i: usize) -> usize {
    i += 1;
    while i < chars.len() && is_ncname_char(chars[i]) {
        i += 1;
    }
    i
}

/// Parse an expression
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::XPath("Empty expression".to_string()));
    }
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", token)))
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::XPath(format!(
            "{} at token {} in '{}'",
            message, self.pos, self.input
        ))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        while self.eat_keyword("and") {
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.union()?;
        while let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.union()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn union(&mut self) -> Result<Expr> {
        let mut left = self.path_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn path_expr(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                self.filter(inner)
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && name != "node" && name != "text" =>
            {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RParen)?;
                        break;
                    }
                }
                self.filter(Expr::Function(name, args))
            }
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.starts_step() {
                    self.relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![Step::descendant_or_self()];
                steps.extend(self.relative_steps()?);
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(_) => Ok(Expr::Path {
                absolute: false,
                steps: self.relative_steps()?,
            }),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn filter(&mut self, primary: Expr) -> Result<Expr> {
        let predicates = self.predicates()?;
        let steps = match self.peek() {
            Some(Token::Slash) | Some(Token::DoubleSlash) => self.continued_steps()?,
            _ => Vec::new(),
        };
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_)) | Some(Token::Star) | Some(Token::At) | Some(Token::Dot) | Some(Token::DotDot)
        )
    }

    fn relative_steps(&mut self) -> Result<Vec<Step>> {
        let mut steps = vec![self.step()?];
        steps.extend(self.continued_steps()?);
        Ok(steps)
    }

    /// Steps following a `/` or `//`
    fn continued_steps(&mut self) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(Step::descendant_or_self());
                steps.push(self.step()?);
            } else {
                return Ok(steps);
            }
        }
    }

    fn step(&mut self) -> Result<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step::self_node());
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step::new(XPathAxis::Parent, NodeTest::Node));
        }

        let axis = if self.eat(&Token::At) {
            XPathAxis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) = (self.peek(), self.peek_at(1)) {
            let axis = XPathAxis::parse(name)
                .ok_or_else(|| self.error(&format!("unsupported axis '{}'", name)))?;
            self.pos += 2;
            axis
        } else {
            XPathAxis::Child
        };

        let test = self.node_test()?;
        let mut step = Step::new(axis, test);
        step.predicates = self.predicates()?;
        Ok(step)
    }

    fn node_test(&mut self) -> Result<NodeTest> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => {
                if (name == "node" || name == "text") && self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.expect(&Token::RParen)?;
                    return Ok(if name == "node" {
                        NodeTest::Node
                    } else {
                        NodeTest::Text
                    });
                }
                match name.split_once(':') {
                    Some((prefix, "*")) => Ok(NodeTest::NamespaceAny(prefix.to_string())),
                    Some((prefix, local)) => Ok(NodeTest::Name {
                        prefix: Some(prefix.to_string()),
                        local: local.to_string(),
                    }),
                    None => Ok(NodeTest::Name {
                        prefix: None,
                        local: name,
                    }),
                }
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a node test"))
            }
        }
    }

    fn predicates(&mut self) -> Result<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(prefix: Option<&str>, local: &str) -> NodeTest {
        NodeTest::Name {
            prefix: prefix.map(|p| p.to_string()),
            local: local.to_string(),
        }
    }

    #[test]
    fn test_xpath_axis_parse() {
        assert_eq!(XPathAxis::parse("child"), Some(XPathAxis::Child));
        assert_eq!(XPathAxis::parse("ancestor-or-self"), Some(XPathAxis::AncestorOrSelf));
        assert_eq!(XPathAxis::parse("following"), None);
        assert!(XPathAxis::Ancestor.is_reverse());
        assert_eq!(XPathAxis::DescendantOrSelf.to_string(), "descendant-or-self");
    }

    #[test]
    fn test_descendant_path() {
        let expr = parse("//stix:Indicator/indicator:Title").unwrap();
        let Expr::Path { absolute, steps } = expr else {
            panic!("expected a path")
        };
        assert!(absolute);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].axis, XPathAxis::DescendantOrSelf);
        assert_eq!(steps[1].test, name(Some("stix"), "Indicator"));
        assert_eq!(steps[2].test, name(Some("indicator"), "Title"));
    }

    #[test]
    fn test_predicates_and_functions() {
        let expr = parse("//cybox:Object[@id and count(*) > 1][not(text())]").unwrap();
        let Expr::Path { steps, .. } = expr else {
            panic!("expected a path")
        };
        assert_eq!(steps[1].predicates.len(), 2);
        assert!(matches!(steps[1].predicates[0], Expr::And(_, _)));
        assert!(matches!(&steps[1].predicates[1], Expr::Function(f, _) if f == "not"));
    }

    #[test]
    fn test_explicit_axes_and_abbreviations() {
        let expr = parse("ancestor::stix:Indicator | ../@idref | .").unwrap();
        assert!(matches!(expr, Expr::Union(_, _)));

        let Expr::Path { steps, .. } = parse("self::node()").unwrap() else {
            panic!("expected a path")
        };
        assert_eq!(steps, vec![Step::self_node()]);

        let Expr::Path { steps, .. } = parse("stixVocabs:*").unwrap() else {
            panic!("expected a path")
        };
        assert_eq!(steps[0].test, NodeTest::NamespaceAny("stixVocabs".to_string()));
    }

    #[test]
    fn test_names_with_dashes_and_dots() {
        let Expr::Path { steps, .. } = parse("@cybox_major_version").unwrap() else {
            panic!("expected a path")
        };
        assert_eq!(steps[0].axis, XPathAxis::Attribute);

        let expr = parse("ns:Kill-Chain.Phase").unwrap();
        assert_eq!(expr.prefixes(), vec!["ns"]);
    }

    #[test]
    fn test_literals_and_numbers() {
        assert_eq!(parse("'a b'").unwrap(), Expr::Literal("a b".to_string()));
        assert_eq!(parse("2.5").unwrap(), Expr::Number(2.5));
        assert!(matches!(
            parse("@version = \"1.1\"").unwrap(),
            Expr::Compare(CompareOp::Eq, _, _)
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("//").is_err());
        assert!(parse("a[").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("following::a").is_err());
        assert!(parse("a b").is_err());
    }
}
