//! Pipeline driver
//!
//! A [`Registry`] holds one [`StepUpdater`] per `(family, from_version)`.
//! [`Registry::update`] loads the input, works out its family and version,
//! then runs the chain of steps up to the requested version, folding each
//! step's removals and id remaps into one [`UpdateResults`].
//!
//! ```rust,ignore
//! use ramrod::{update, UpdateRequest};
//! use ramrod::loaders::Source;
//!
//! let results = update(Source::path("package.xml"), &UpdateRequest::new().with_force(true))?;
//! results.write_to(std::io::stdout(), true)?;
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::documents::{Document, NodeId};
use crate::error::{Error, InvalidVersionError, Result, UnknownVersionError};
use crate::loaders::Source;
use crate::updater::{Changes, StepUpdater, UpdateOptions};
use crate::versions::{Family, Version, CYBOX_NAMESPACE};

/// Outcome of a successful update
#[derive(Debug, Clone)]
pub struct UpdateResults {
    /// The updated document
    pub document: Document,
    /// Standalone copies of every subtree a forced step removed
    pub removed: Vec<Document>,
    /// Original id to the nodes of `document` that were given fresh ids
    pub remapped: IndexMap<String, Vec<NodeId>>,
}

impl UpdateResults {
    /// Root element of the updated document
    pub fn root(&self) -> NodeId {
        self.document.root()
    }

    /// Ids now carried by the nodes that used to share `original`
    pub fn new_ids(&self, original: &str) -> Vec<&str> {
        self.remapped
            .get(original)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| self.document.attribute_local(*n, "id"))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serialize the updated document
    pub fn write_to<W: Write>(&self, out: W, pretty: bool) -> Result<()> {
        self.document.write_to(out, pretty)
    }

    /// Serialize the updated document to bytes
    pub fn to_bytes(&self, pretty: bool) -> Result<Vec<u8>> {
        self.document.to_bytes(pretty)
    }
}

/// What to update to, and how
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Source version; read from the document when absent
    ///
    /// Supplying it turns off per-step version checks.
    pub from: Option<Version>,
    /// Target version; the family's latest when absent
    pub to: Option<Version>,
    /// Options passed to every step
    pub options: UpdateOptions,
    /// Clean untranslatable content instead of failing
    pub force: bool,
}

impl UpdateRequest {
    /// Update to the latest version with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the source version
    pub fn with_from(mut self, from: Version) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the target version
    pub fn with_to(mut self, to: Version) -> Self {
        self.to = Some(to);
        self
    }

    /// Set the step options
    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Set forcing
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// JSON document of step declarations, `{"steps": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBundle {
    /// Steps, each replacing the registered step with the same start
    pub steps: Vec<StepUpdater>,
}

/// CybOX revision used by each STIX revision
fn embedded_cybox_version(stix: &Version) -> Option<Version> {
    let parts: &[u64] = match (stix.major(), stix.minor(), stix.update()) {
        (1, 0, 0) => &[2, 0],
        (1, 0, 1) => &[2, 0, 1],
        (1, 1, 0) | (1, 1, 1) | (1, 2, 0) => &[2, 1],
        _ => return None,
    };
    Some(Version::from_parts(parts))
}

fn builtin_steps() -> Result<Registry> {
    let mut registry = Registry::new();
    for family in Family::ALL {
        for from in family.versions() {
            let Some(to) = family.successor(from) else { continue };
            let mut step = StepUpdater::new(family, from.clone(), to.clone())?;

            if family == Family::Stix {
                step = step.with_namespace("cybox", CYBOX_NAMESPACE);
                if let (Some(cybox_from), Some(cybox_to)) =
                    (embedded_cybox_version(from), embedded_cybox_version(to))
                {
                    if cybox_from != cybox_to {
                        step = step.with_companion(StepUpdater::embedded_cybox(cybox_from, cybox_to)?);
                    }
                }
            }
            registry.register(step)?;
        }
    }
    Ok(registry)
}

static BUILTIN: Lazy<Registry> = Lazy::new(|| builtin_steps().expect("built-in steps are valid"));

/// Step updaters by family and starting version
#[derive(Debug, Clone, Default)]
pub struct Registry {
    steps: IndexMap<(Family, Version), StepUpdater>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every published step of both families, with empty rule tables
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Add a step, returning the one it replaces
    pub fn register(&mut self, step: StepUpdater) -> Result<Option<StepUpdater>> {
        for version in [&step.from_version, &step.to_version] {
            if !step.family.is_known(version) {
                return Err(UnknownVersionError::input(Some(version.to_string()))
                    .with_reason(format!("not a published {} version", step.family))
                    .into());
            }
        }
        if step.to_version <= step.from_version {
            return Err(Error::internal(format!(
                "{} step from {} to {} does not advance the version",
                step.family, step.from_version, step.to_version
            )));
        }

        debug!(family = %step.family, from = %step.from_version, to = %step.to_version, "registered step");
        Ok(self
            .steps
            .insert((step.family, step.from_version.clone()), step))
    }

    /// Register every step of a JSON rule bundle; returns how many
    pub fn load_bundle(&mut self, json: &str) -> Result<usize> {
        let bundle: RuleBundle = serde_json::from_str(json)?;
        let count = bundle.steps.len();
        for step in bundle.steps {
            self.register(step)?;
        }
        info!(steps = count, "loaded rule bundle");
        Ok(count)
    }

    /// Register every step of a JSON rule bundle file
    pub fn load_bundle_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            Error::Resource(format!("Failed to read rule bundle '{}': {}", path.display(), e))
        })?;
        self.load_bundle(&json)
    }

    /// The step starting at `from`
    pub fn step(&self, family: Family, from: &Version) -> Option<&StepUpdater> {
        self.steps.get(&(family, from.clone()))
    }

    /// Every registered step
    pub fn steps(&self) -> impl Iterator<Item = &StepUpdater> {
        self.steps.values()
    }

    /// Update a document to the requested version
    pub fn update<'a>(&self, source: impl Into<Source<'a>>, request: &UpdateRequest) -> Result<UpdateResults> {
        let mut doc = source.into().load()?;
        let root = doc.root();

        let family = Family::detect(&doc).ok_or_else(|| {
            Error::from(
                UnknownVersionError::input(None)
                    .with_reason("root element is neither a STIX package nor CybOX observables")
                    .with_node(doc.node_info(root)),
            )
        })?;

        let mut options = request.options.clone();
        let from = match &request.from {
            Some(from) => {
                options.check_versions = false;
                from.clone()
            }
            None => family.shape().read(&doc, root)?.ok_or_else(|| {
                Error::from(UnknownVersionError::input(None).with_node(doc.node_info(root)))
            })?,
        };
        if !family.is_known(&from) {
            return Err(UnknownVersionError::input(Some(from.to_string()))
                .with_reason(format!("not a {} version", family))
                .with_node(doc.node_info(root))
                .into());
        }

        let to = match &request.to {
            Some(to) => to.clone(),
            None => family.latest().clone(),
        };
        if !family.is_known(&to) {
            return Err(UnknownVersionError::requested(to.to_string())
                .with_reason(format!("not a {} version", family))
                .into());
        }
        if from >= to {
            return Err(InvalidVersionError::new(format!("a {} version before {}", family, to), from.to_string())
                .with_node(doc.node_info(root))
                .into());
        }

        info!(family = %family, from = %from, to = %to, force = request.force, "updating document");
        let mut changes = Changes::default();
        let mut current = from;
        while current < to {
            let step = self.step(family, &current).ok_or_else(|| {
                Error::from(
                    UnknownVersionError::input(Some(current.to_string()))
                        .with_reason(format!("no {} updater is registered for this version", family)),
                )
            })?;
            changes.merge(step.update(&mut doc, &options, request.force)?);
            current = step.to_version.clone();
        }
        if current != to {
            return Err(Error::internal(format!(
                "update chain went past {} to {}",
                to, current
            )));
        }

        Ok(UpdateResults {
            document: doc,
            removed: changes.removed,
            remapped: changes.remapped,
        })
    }
}

/// Update with the built-in registry
pub fn update<'a>(source: impl Into<Source<'a>>, request: &UpdateRequest) -> Result<UpdateResults> {
    BUILTIN.update(source, request)
}
