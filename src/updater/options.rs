use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Generator of replacement ids for non-unique ones
pub type NewIdFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// `original-cleaned-<uuid>`
pub fn default_new_id(original: &str) -> String {
    format!("{}-cleaned-{}", original, Uuid::new_v4())
}

/// Options controlling an update
#[derive(Clone)]
pub struct UpdateOptions {
    /// Fail when a step finds an unexpected version (default: true)
    pub check_versions: bool,
    /// Rewrite controlled-vocabulary types and terms (default: true)
    pub update_vocabularies: bool,
    /// Prune vacant optional elements and empty optional attributes (default: true)
    pub remove_optionals: bool,
    /// Fresh id for a non-unique one (default: [`default_new_id`])
    pub new_id_func: NewIdFn,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            check_versions: true,
            update_vocabularies: true,
            remove_optionals: true,
            new_id_func: Arc::new(default_new_id),
        }
    }
}

impl UpdateOptions {
    /// Create options with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set version checking
    pub fn with_check_versions(mut self, check: bool) -> Self {
        self.check_versions = check;
        self
    }

    /// Set vocabulary updating
    pub fn with_update_vocabularies(mut self, update: bool) -> Self {
        self.update_vocabularies = update;
        self
    }

    /// Set optional pruning
    pub fn with_remove_optionals(mut self, remove: bool) -> Self {
        self.remove_optionals = remove;
        self
    }

    /// Set the id generator
    pub fn with_new_id_func<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.new_id_func = Arc::new(f);
        self
    }

    /// Generate a replacement for `original`
    pub fn new_id(&self, original: &str) -> String {
        (self.new_id_func)(original)
    }
}

impl fmt::Debug for UpdateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("check_versions", &self.check_versions)
            .field("update_vocabularies", &self.update_vocabularies)
            .field("remove_optionals", &self.remove_optionals)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let options = UpdateOptions::default();
        assert!(options.check_versions);
        assert!(options.update_vocabularies);
        assert!(options.remove_optionals);
    }

    #[test]
    fn test_default_new_id_is_unique() {
        let a = default_new_id("example:ind-1");
        let b = default_new_id("example:ind-1");
        assert!(a.starts_with("example:ind-1-cleaned-"));
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a["example:ind-1-cleaned-".len()..]).is_ok());
    }

    #[test]
    fn test_counter_new_id() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let options = UpdateOptions::new()
            .with_remove_optionals(false)
            .with_new_id_func(move |id| format!("{}-{}", id, c.fetch_add(1, Ordering::SeqCst)));

        assert_eq!(options.new_id("x"), "x-0");
        assert_eq!(options.new_id("x"), "x-1");
        assert!(!options.remove_optionals);
        assert!(format!("{:?}", options).contains("check_versions: true"));
    }
}
