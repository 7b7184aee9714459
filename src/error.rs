//! Error types for ramrod
//!
//! This module defines all error types used throughout the library.
//! The four update failures (`UnknownVersion`, `InvalidVersion`,
//! `Untranslatable`, `Internal`) carry structured payloads; everything else
//! wraps the failure of an underlying parser or I/O call.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::namespaces::QName;

/// Result type alias using ramrod Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ramrod operations
#[derive(Error, Debug)]
pub enum Error {
    /// The document carries no version information, or a caller asked for
    /// a version no updater knows about
    #[error("unknown version: {0}")]
    UnknownVersion(#[from] UnknownVersionError),

    /// Version information exists but is not what the update expected
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] InvalidVersionError),

    /// The document contains content that cannot be carried forward
    #[error("untranslatable content: {0}")]
    Untranslatable(#[from] UntranslatableError),

    /// A facade precondition was violated; indicates a bug
    #[error("internal error: {0}")]
    Internal(String),

    /// Malformed XML input or a serialization failure
    #[error("XML error: {0}")]
    Xml(String),

    /// Malformed or unevaluable path expression
    #[error("XPath error: {0}")]
    XPath(String),

    /// Resource loading error
    #[error("resource error: {0}")]
    Resource(String),

    /// Namespace error (unbound prefix, bad Clark name)
    #[error("namespace error: {0}")]
    Namespace(String),

    /// Name error (invalid XML name)
    #[error("name error: {0}")]
    Name(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rule bundle decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a forced update may clean the document and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownVersion(_) | Error::InvalidVersion(_) | Error::Untranslatable(_)
        )
    }

    /// Build an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

/// Snapshot of a node, detached from the tree it was found in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Resolved tag
    pub tag: QName,
    /// Tag as written in the source (`prefix:local`)
    pub name: String,
    /// 1-based line in the parsed input, if the node came from a parse
    pub sourceline: Option<usize>,
}

impl NodeInfo {
    /// Create a new node snapshot
    pub fn new(tag: QName, name: impl Into<String>, sourceline: Option<usize>) -> Self {
        Self {
            tag,
            name: name.into(),
            sourceline,
        }
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sourceline {
            Some(line) => write!(f, "line {}: {}", line, self.name),
            None => write!(f, "line ?: {}", self.name),
        }
    }
}

/// Which side of an update a version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSide {
    /// Read from (or claimed for) the input document
    Input,
    /// Requested by the caller as the update target
    Requested,
}

impl fmt::Display for VersionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSide::Input => write!(f, "input"),
            VersionSide::Requested => write!(f, "requested"),
        }
    }
}

/// Missing or unrecognised version
#[derive(Debug, Clone)]
pub struct UnknownVersionError {
    /// Which side the version belongs to
    pub side: VersionSide,
    /// The offending version string, if there was one
    pub offered: Option<String>,
    /// Extra detail
    pub reason: Option<String>,
    /// Node on which the problem was observed
    pub node: Option<NodeInfo>,
}

impl UnknownVersionError {
    /// Unknown or missing input version
    pub fn input(offered: Option<String>) -> Self {
        Self {
            side: VersionSide::Input,
            offered,
            reason: None,
            node: None,
        }
    }

    /// Unknown requested version
    pub fn requested(offered: impl Into<String>) -> Self {
        Self {
            side: VersionSide::Requested,
            offered: Some(offered.into()),
            reason: None,
            node: None,
        }
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the node
    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.node = Some(node);
        self
    }
}

impl fmt::Display for UnknownVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offered {
            Some(ref offered) => write!(f, "{} version '{}' is not recognised", self.side, offered)?,
            None => write!(f, "{} document has no version information", self.side)?,
        }

        if let Some(ref reason) = self.reason {
            write!(f, " ({})", reason)?;
        }

        if let Some(ref node) = self.node {
            write!(f, " at {}", node)?;
        }

        Ok(())
    }
}

impl std::error::Error for UnknownVersionError {}

/// Version present but not acceptable
#[derive(Debug, Clone)]
pub struct InvalidVersionError {
    /// What the update expected
    pub expected: String,
    /// What it found
    pub found: String,
    /// Node on which the mismatch was observed
    pub node: Option<NodeInfo>,
}

impl InvalidVersionError {
    /// Create a new version mismatch
    pub fn new(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
            node: None,
        }
    }

    /// Set the node
    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.node = Some(node);
        self
    }
}

impl fmt::Display for InvalidVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found '{}'", self.expected, self.found)?;
        if let Some(ref node) = self.node {
            write!(f, " at {}", node)?;
        }
        Ok(())
    }
}

impl std::error::Error for InvalidVersionError {}

/// Disallowed content and id collisions found by an update check
#[derive(Debug, Clone, Default)]
pub struct UntranslatableError {
    /// Nodes matched by a disallowed rule or namespace
    pub disallowed: Vec<NodeInfo>,
    /// Ids shared by more than one node, with the nodes sharing them
    pub duplicates: IndexMap<String, Vec<NodeInfo>>,
}

impl UntranslatableError {
    /// Create a new report
    pub fn new(disallowed: Vec<NodeInfo>, duplicates: IndexMap<String, Vec<NodeInfo>>) -> Self {
        Self {
            disallowed,
            duplicates,
        }
    }

    /// True when nothing was found
    pub fn is_empty(&self) -> bool {
        self.disallowed.is_empty() && self.duplicates.is_empty()
    }
}

impl fmt::Display for UntranslatableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} disallowed item(s), {} duplicate id(s)",
            self.disallowed.len(),
            self.duplicates.len()
        )?;

        if !self.disallowed.is_empty() {
            write!(f, "\n\nUntranslatable:")?;
            for node in &self.disallowed {
                write!(f, "\n  {}", node)?;
            }
        }

        if !self.duplicates.is_empty() {
            write!(f, "\n\nNon-unique ids:")?;
            for (id, nodes) in &self.duplicates {
                let lines: Vec<String> = nodes
                    .iter()
                    .map(|n| n.sourceline.map_or_else(|| "?".to_string(), |l| l.to_string()))
                    .collect();
                write!(f, "\n  {}: lines {}", id, lines.join(", "))?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for UntranslatableError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(local: &str, line: usize) -> NodeInfo {
        NodeInfo::new(
            QName::namespaced("http://example.com/stix", local),
            format!("stix:{}", local),
            Some(line),
        )
    }

    #[test]
    fn test_untranslatable_display() {
        let mut duplicates = IndexMap::new();
        duplicates.insert("example:ind-1".to_string(), vec![info("Indicator", 4), info("Indicator", 9)]);
        let err = UntranslatableError::new(vec![info("Campaign", 12)], duplicates);

        let msg = format!("{}", err);
        assert!(msg.contains("1 disallowed item(s), 1 duplicate id(s)"));
        assert!(msg.contains("line 12: stix:Campaign"));
        assert!(msg.contains("example:ind-1: lines 4, 9"));
    }

    #[test]
    fn test_unknown_version_display() {
        let err = UnknownVersionError::requested("9.9").with_reason("not a STIX version");
        let msg = format!("{}", err);
        assert!(msg.contains("requested version '9.9'"));
        assert!(msg.contains("not a STIX version"));

        let err = UnknownVersionError::input(None);
        assert!(format!("{}", err).contains("no version information"));
    }

    #[test]
    fn test_invalid_version_display() {
        let err = InvalidVersionError::new("1.1.1", "1.0").with_node(info("STIX_Package", 2));
        let msg = format!("{}", err);
        assert!(msg.contains("expected 1.1.1, found '1.0'"));
        assert!(msg.contains("line 2: stix:STIX_Package"));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = UntranslatableError::default().into();
        assert!(matches!(err, Error::Untranslatable(_)));
        assert!(err.is_recoverable());
        assert!(!Error::internal("no parent").is_recoverable());
    }
}
