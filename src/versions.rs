//! Version tags
//!
//! A [`Version`] is a dotted string of integers. Two versions are equal when
//! their integer parts are equal after trailing zeros are dropped, so `2.1`
//! and `2.1.0` name the same revision. Ordering compares the integer tuples.
//!
//! Documents carry their version in one of two [`VersionShape`]s: a single
//! dotted attribute, or a major/minor/update attribute triple.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::documents::{Document, NodeId};
use crate::error::{Error, Result, UnknownVersionError};
use crate::namespaces::QName;

/// STIX core namespace
pub const STIX_NAMESPACE: &str = "http://stix.mitre.org/stix-1";

/// CybOX core namespace
pub const CYBOX_NAMESPACE: &str = "http://cybox.mitre.org/cybox-2";

/// A dotted numeric version
#[derive(Clone)]
pub struct Version {
    text: String,
    parts: Vec<u64>,
}

impl Version {
    /// Parse a dotted version string; `None` if it is not one
    pub fn parse(s: &str) -> Option<Self> {
        let text = s.trim();
        if text.is_empty() {
            return None;
        }
        let parts = text
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    None
                } else {
                    p.parse::<u64>().ok()
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            text: text.to_string(),
            parts,
        })
    }

    /// Build a version from its integer parts
    pub fn from_parts(parts: &[u64]) -> Self {
        let text = parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self {
            text,
            parts: parts.to_vec(),
        }
    }

    /// The version as written
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Integer parts as written
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    fn part(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }

    /// First component
    pub fn major(&self) -> u64 {
        self.part(0)
    }

    /// Second component, 0 if absent
    pub fn minor(&self) -> u64 {
        self.part(1)
    }

    /// Third component, 0 if absent
    pub fn update(&self) -> u64 {
        self.part(2)
    }

    /// Parts with trailing zeros removed
    fn significant(&self) -> &[u64] {
        let end = self
            .parts
            .iter()
            .rposition(|p| *p != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..end]
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.text)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s).ok_or_else(|| {
            UnknownVersionError::requested(s)
                .with_reason("not a dotted numeric version")
                .into()
        })
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version '{}'", text)))
    }
}

/// How a node stores its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum VersionShape {
    /// One attribute holding the dotted string
    Single {
        /// Attribute local name
        attribute: String,
    },
    /// Integer attributes; the update attribute is optional
    Triple {
        /// Major attribute local name
        major: String,
        /// Minor attribute local name
        minor: String,
        /// Update attribute local name
        update: String,
    },
}

impl VersionShape {
    /// A single `version`-style attribute
    pub fn single(attribute: impl Into<String>) -> Self {
        VersionShape::Single {
            attribute: attribute.into(),
        }
    }

    /// A major/minor/update attribute triple
    pub fn triple(major: impl Into<String>, minor: impl Into<String>, update: impl Into<String>) -> Self {
        VersionShape::Triple {
            major: major.into(),
            minor: minor.into(),
            update: update.into(),
        }
    }

    /// Read the version of `node`; `Ok(None)` when it carries none
    ///
    /// A present but malformed value is an input-side `UnknownVersion`.
    pub fn read(&self, doc: &Document, node: NodeId) -> Result<Option<Version>> {
        let malformed = |value: &str| -> Error {
            UnknownVersionError::input(Some(value.to_string()))
                .with_reason("malformed version attribute")
                .with_node(doc.node_info(node))
                .into()
        };

        match self {
            VersionShape::Single { attribute } => match doc.attribute_local(node, attribute) {
                None => Ok(None),
                Some(value) => Version::parse(value).map(Some).ok_or_else(|| malformed(value)),
            },
            VersionShape::Triple {
                major,
                minor,
                update,
            } => {
                let Some(major) = doc.attribute_local(node, major) else {
                    return Ok(None);
                };
                let minor = doc.attribute_local(node, minor);
                let update = doc.attribute_local(node, update);
                if minor.is_none() && update.is_some() {
                    return Err(UnknownVersionError::input(Some(major.to_string()))
                        .with_reason("update version given without a minor version")
                        .with_node(doc.node_info(node))
                        .into());
                }

                let mut parts = Vec::with_capacity(3);
                for value in [Some(major), minor, update].into_iter().flatten() {
                    let value = value.trim();
                    let part = value.parse::<u64>().map_err(|_| malformed(value))?;
                    parts.push(part);
                }
                Ok(Some(Version::from_parts(&parts)))
            }
        }
    }

    /// Write `version` onto `node`
    ///
    /// The triple shape drops its update attribute when the update part is 0.
    pub fn write(&self, doc: &mut Document, node: NodeId, version: &Version) -> Result<()> {
        match self {
            VersionShape::Single { attribute } => {
                doc.set_attribute(node, QName::local(attribute.as_str()), version.as_str())
            }
            VersionShape::Triple {
                major,
                minor,
                update,
            } => {
                doc.set_attribute(node, QName::local(major.as_str()), version.major().to_string())?;
                doc.set_attribute(node, QName::local(minor.as_str()), version.minor().to_string())?;
                if version.update() != 0 {
                    doc.set_attribute(node, QName::local(update.as_str()), version.update().to_string())?;
                } else {
                    doc.remove_attribute(node, &QName::local(update.as_str()));
                }
                Ok(())
            }
        }
    }
}

static STIX_VERSIONS: Lazy<Vec<Version>> = Lazy::new(|| {
    [&[1u64, 0][..], &[1, 0, 1], &[1, 1], &[1, 1, 1], &[1, 2]]
        .iter()
        .map(|p| Version::from_parts(p))
        .collect()
});

static CYBOX_VERSIONS: Lazy<Vec<Version>> = Lazy::new(|| {
    [&[2u64, 0][..], &[2, 0, 1], &[2, 1]]
        .iter()
        .map(|p| Version::from_parts(p))
        .collect()
});

/// A versioned document language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// STIX packages
    Stix,
    /// CybOX observables
    Cybox,
}

impl Family {
    /// Every known family
    pub const ALL: [Family; 2] = [Family::Stix, Family::Cybox];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Family::Stix => "STIX",
            Family::Cybox => "CybOX",
        }
    }

    /// Conventional prefix of the core namespace
    pub fn prefix(&self) -> &'static str {
        match self {
            Family::Stix => "stix",
            Family::Cybox => "cybox",
        }
    }

    /// Core namespace of the family
    pub fn namespace(&self) -> &'static str {
        match self {
            Family::Stix => STIX_NAMESPACE,
            Family::Cybox => CYBOX_NAMESPACE,
        }
    }

    /// Qualified name of a standalone document's root element
    pub fn root_tag(&self) -> QName {
        match self {
            Family::Stix => QName::namespaced(STIX_NAMESPACE, "STIX_Package"),
            Family::Cybox => QName::namespaced(CYBOX_NAMESPACE, "Observables"),
        }
    }

    /// Version attribute layout
    pub fn shape(&self) -> VersionShape {
        match self {
            Family::Stix => VersionShape::single("version"),
            Family::Cybox => VersionShape::triple(
                "cybox_major_version",
                "cybox_minor_version",
                "cybox_update_version",
            ),
        }
    }

    /// Published versions, oldest first
    pub fn versions(&self) -> &'static [Version] {
        match self {
            Family::Stix => &STIX_VERSIONS,
            Family::Cybox => &CYBOX_VERSIONS,
        }
    }

    /// Newest published version
    pub fn latest(&self) -> &'static Version {
        let versions = self.versions();
        &versions[versions.len() - 1]
    }

    /// Whether `version` is published for this family
    pub fn is_known(&self, version: &Version) -> bool {
        self.versions().contains(version)
    }

    /// The version after `version`
    pub fn successor(&self, version: &Version) -> Option<&'static Version> {
        let versions = self.versions();
        versions
            .iter()
            .position(|v| v == version)
            .and_then(|i| versions.get(i + 1))
    }

    /// Canonical location of the core schema at `version`
    pub fn schema_location(&self, version: &Version) -> String {
        match self {
            Family::Stix => format!("http://stix.mitre.org/XMLSchema/core/{}/stix_core.xsd", version),
            Family::Cybox => format!("http://cybox.mitre.org/XMLSchema/core/{}/cybox_core.xsd", version),
        }
    }

    /// Family whose root element `doc` carries
    pub fn detect(doc: &Document) -> Option<Family> {
        let tag = doc.tag(doc.root())?;
        Family::ALL.into_iter().find(|f| &f.root_tag() == tag)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_semantic_equality() {
        assert_eq!(v("2.1"), v("2.1.0"));
        assert_eq!(v("1.0"), v("1"));
        assert_ne!(v("1.0.1"), v("1.0"));
        assert_eq!(v(" 1.2 ").as_str(), "1.2");
    }

    #[test]
    fn test_ordering() {
        assert!(v("1.0") < v("1.0.1"));
        assert!(v("1.0.1") < v("1.1"));
        assert!(v("1.10") > v("1.9"));
        assert_eq!(v("2.1").cmp(&v("2.1.0")), Ordering::Equal);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(Version::parse("").is_none());
        assert!(Version::parse("1..2").is_none());
        assert!(Version::parse("1.x").is_none());
        assert!(Version::parse("-1").is_none());
        assert!(matches!("abc".parse::<Version>(), Err(Error::UnknownVersion(_))));
    }

    #[test]
    fn test_family_sequences() {
        assert_eq!(Family::Stix.latest(), &v("1.2"));
        assert_eq!(Family::Cybox.latest(), &v("2.1"));
        assert_eq!(Family::Stix.successor(&v("1.0")), Some(&v("1.0.1")));
        assert_eq!(Family::Cybox.successor(&v("2.1")), None);
        assert!(Family::Cybox.is_known(&v("2.0.0")));
        assert!(!Family::Stix.is_known(&v("1.3")));
    }

    #[test]
    fn test_read_and_write_triple() {
        let mut doc = Document::from_string(
            r#"<cybox:Observables xmlns:cybox="http://cybox.mitre.org/cybox-2" cybox_major_version="2" cybox_minor_version="0" cybox_update_version="1"/>"#,
        )
        .unwrap();
        let root = doc.root();
        assert_eq!(Family::detect(&doc), Some(Family::Cybox));

        let shape = Family::Cybox.shape();
        assert_eq!(shape.read(&doc, root).unwrap(), Some(v("2.0.1")));

        shape.write(&mut doc, root, &v("2.1")).unwrap();
        assert_eq!(doc.attribute_local(root, "cybox_minor_version"), Some("1"));
        assert_eq!(doc.attribute_local(root, "cybox_update_version"), None);
        assert_eq!(shape.read(&doc, root).unwrap(), Some(v("2.1")));
    }

    #[test]
    fn test_triple_update_without_minor_is_malformed() {
        let doc = Document::from_string(r#"<o cybox_major_version="2" cybox_update_version="1"/>"#).unwrap();
        let err = Family::Cybox.shape().read(&doc, doc.root()).unwrap_err();
        assert!(matches!(err, Error::UnknownVersion(_)));

        let doc = Document::from_string(r#"<o cybox_major_version="2"/>"#).unwrap();
        assert_eq!(Family::Cybox.shape().read(&doc, doc.root()).unwrap(), Some(v("2.0")));
    }

    #[test]
    fn test_read_single() {
        let doc = Document::from_string(
            r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1" version="1.1.1"/>"#,
        )
        .unwrap();
        let shape = Family::Stix.shape();
        assert_eq!(shape.read(&doc, doc.root()).unwrap(), Some(v("1.1.1")));

        let doc = Document::from_string(r#"<r version="one"/>"#).unwrap();
        assert!(matches!(shape.read(&doc, doc.root()), Err(Error::UnknownVersion(_))));
        assert_eq!(Family::detect(&doc), None);

        let doc = Document::from_string("<r/>").unwrap();
        assert_eq!(shape.read(&doc, doc.root()).unwrap(), None);
    }

    #[test]
    fn test_shape_serde() {
        let shape: VersionShape = serde_json::from_str(r#"{"shape": "single", "attribute": "version"}"#).unwrap();
        assert_eq!(shape, VersionShape::single("version"));
        let family: Family = serde_json::from_str("\"cybox\"").unwrap();
        assert_eq!(family, Family::Cybox);
    }

    proptest! {
        #[test]
        fn prop_trailing_zeros_are_insignificant(parts in prop::collection::vec(0u64..20, 1..5), zeros in 0usize..3) {
            let mut padded = parts.clone();
            padded.extend(std::iter::repeat(0).take(zeros));
            prop_assert_eq!(Version::from_parts(&parts), Version::from_parts(&padded));
        }

        #[test]
        fn prop_ordering_matches_tuples(a in prop::collection::vec(0u64..5, 1..4), b in prop::collection::vec(0u64..5, 1..4)) {
            let trim = |p: &[u64]| {
                let end = p.iter().rposition(|x| *x != 0).map_or(0, |i| i + 1);
                p[..end].to_vec()
            };
            let expected = trim(&a).cmp(&trim(&b));
            prop_assert_eq!(Version::from_parts(&a).cmp(&Version::from_parts(&b)), expected);
        }

        #[test]
        fn prop_display_parses_back(parts in prop::collection::vec(0u64..100, 1..4)) {
            let version = Version::from_parts(&parts);
            prop_assert_eq!(Version::parse(&version.to_string()), Some(version));
        }
    }
}
