//! Input loading
//!
//! Documents reach an update as a file path, a byte stream, bytes held in
//! memory or a tree that is already parsed. Every form is turned into a
//! [`Document`] owned by the update, so a caller's tree is never mutated.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::documents::Document;
use crate::error::Result;

/// Where a document comes from
pub enum Source<'a> {
    /// A file on disk
    Path(PathBuf),
    /// Serialized XML in memory
    Bytes(Cow<'a, [u8]>),
    /// A readable byte stream
    Reader(Box<dyn Read + 'a>),
    /// A parsed tree owned by the caller; it is copied
    Tree(&'a Document),
    /// A parsed tree handed over to the update
    Owned(Document),
}

impl<'a> Source<'a> {
    /// A file on disk
    pub fn path(path: impl AsRef<Path>) -> Self {
        Source::Path(path.as_ref().to_path_buf())
    }

    /// XML text
    pub fn text(xml: &'a str) -> Self {
        Source::Bytes(Cow::Borrowed(xml.as_bytes()))
    }

    /// A byte stream
    pub fn reader<R: Read + 'a>(reader: R) -> Self {
        Source::Reader(Box::new(reader))
    }

    /// Parse or copy into a document the caller does not share
    pub fn load(self) -> Result<Document> {
        match self {
            Source::Path(path) => Document::from_file(path),
            Source::Bytes(bytes) => Document::parse(&bytes),
            Source::Reader(reader) => Document::from_reader(reader),
            Source::Tree(doc) => Ok(doc.clone()),
            Source::Owned(doc) => Ok(doc),
        }
    }
}

impl fmt::Debug for Source<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Source::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Source::Reader(_) => write!(f, "Reader(..)"),
            Source::Tree(_) => write!(f, "Tree(..)"),
            Source::Owned(_) => write!(f, "Owned(..)"),
        }
    }
}

impl From<PathBuf> for Source<'_> {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source<'_> {
    fn from(path: &Path) -> Self {
        Source::path(path)
    }
}

impl<'a> From<&'a [u8]> for Source<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Source::Bytes(Cow::Borrowed(bytes))
    }
}

impl From<Vec<u8>> for Source<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Source::Bytes(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a Document> for Source<'a> {
    fn from(doc: &'a Document) -> Self {
        Source::Tree(doc)
    }
}

impl From<Document> for Source<'_> {
    fn from(doc: Document) -> Self {
        Source::Owned(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::namespaces::QName;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const XML: &str = "<root><!-- c --><a>test</a></root>";

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", XML).unwrap();

        let doc = Source::path(file.path()).load().unwrap();
        assert_eq!(doc.string_value(doc.root()), "test");
    }

    #[test]
    fn test_missing_file() {
        let result = Source::path("/nonexistent/ramrod/input.xml").load();
        assert!(matches!(result, Err(Error::Resource(_))));
    }

    #[test]
    fn test_load_from_memory_and_stream() {
        let doc = Source::text(XML).load().unwrap();
        assert_eq!(doc.child_elements(doc.root()).count(), 1);

        let doc = Source::from(XML.as_bytes().to_vec()).load().unwrap();
        assert_eq!(doc.children(doc.root()).len(), 2);

        let doc = Source::reader(Cursor::new(XML)).load().unwrap();
        assert_eq!(doc.string_value(doc.root()), "test");
    }

    #[test]
    fn test_tree_is_copied() {
        let original = Document::from_string(XML).unwrap();
        let mut copy = Source::from(&original).load().unwrap();
        let root = copy.root();
        copy.set_attribute(root, QName::local("changed"), "yes").unwrap();

        assert_eq!(original.attribute_local(original.root(), "changed"), None);
        assert_eq!(copy.attribute_local(root, "changed"), Some("yes"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(Source::text("<root>").load(), Err(Error::Xml(_))));
    }
}
