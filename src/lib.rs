//! # ramrod
//!
//! Upgrade STIX and CybOX XML documents from one published revision to the
//! next.
//!
//! Each upgrade step is a declarative [`StepUpdater`]: which namespaces move,
//! which controlled-vocabulary types and terms change, which content cannot
//! be carried forward, which elements became optional, which elements are
//! renamed or rebuilt and where the schemas now live. A [`Registry`] chains
//! the steps of a family and drives a document through them.
//!
//! ## Features
//!
//! - Arena-backed XML tree that keeps comments, CDATA and source lines
//! - XPath 1.0 subset for locating content
//! - Rule tables loadable from JSON bundles
//! - Forced updates that remove untranslatable content and renumber
//!   colliding ids, reporting everything they touched
//!
//! ## Example
//!
//! ```rust,ignore
//! use ramrod::{update, UpdateRequest, Version};
//! use ramrod::loaders::Source;
//!
//! let request = UpdateRequest::new()
//!     .with_to(Version::parse("1.1.1").unwrap())
//!     .with_force(true);
//! let results = update(Source::path("package.xml"), &request)?;
//!
//! for removed in &results.removed {
//!     println!("removed {}", removed.node_info(removed.root()));
//! }
//! let xml = results.to_bytes(true)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod namespaces;
pub mod names;

// Documents
pub mod loaders;
pub mod documents;
pub mod xpath;

// Update engine
pub mod versions;
pub mod declarations;
pub mod updater;
pub mod pipeline;

// Re-exports for convenience
pub use documents::{Document, NodeId};
pub use error::{Error, Result};
pub use pipeline::{update, Registry, RuleBundle, UpdateRequest, UpdateResults};
pub use updater::{StepUpdater, UpdateOptions};
pub use versions::{Family, Version};

/// Version of the ramrod library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
