//! Image reference extraction from manifest objects.
//!
//! Extraction is driven entirely by a [`RuleRegistry`]: each rule names a
//! kind/apiVersion pair and a list of path expressions. There is no per-kind
//! code; supporting a new kind means adding a rule.

pub mod path;
pub mod rules;

use std::collections::BTreeSet;

use a3s_airgap_core::error::Result;
use a3s_airgap_core::ManifestObject;
use serde_json::Value;

pub use path::{PathExpr, PathSyntaxError};
pub use rules::{ExtractionRule, RuleRegistry};

/// Deduplicated image reference strings, iterated in sorted order.
///
/// Deduplication is by exact string: `nginx` and `nginx:latest` are
/// distinct members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageReferenceSet {
    images: BTreeSet<String>,
}

impl ImageReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reference. Empty strings are ignored; returns whether the
    /// reference was newly added.
    pub fn insert(&mut self, image: impl Into<String>) -> bool {
        let image = image.into();
        if image.is_empty() {
            return false;
        }
        self.images.insert(image)
    }

    pub fn union(&mut self, other: ImageReferenceSet) {
        self.images.extend(other.images);
    }

    pub fn contains(&self, image: &str) -> bool {
        self.images.contains(image)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ImageReferenceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for image in iter {
            set.insert(image);
        }
        set
    }
}

impl IntoIterator for ImageReferenceSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

/// Applies a rule registry to manifest objects.
#[derive(Debug, Clone)]
pub struct ImageReferenceExtractor {
    rules: RuleRegistry,
}

impl ImageReferenceExtractor {
    pub fn new(rules: RuleRegistry) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Union of the images found in every object by every matching rule.
    pub fn extract(&self, objects: &[ManifestObject]) -> ImageReferenceSet {
        let mut images = ImageReferenceSet::new();
        for object in objects {
            images.union(self.extract_from_object(object));
        }
        images
    }

    fn extract_from_object(&self, object: &ManifestObject) -> ImageReferenceSet {
        let mut images = ImageReferenceSet::new();

        for rule in self.rules.matching(object) {
            for path in rule.paths() {
                for value in path.evaluate(object.root()) {
                    match scalar_to_string(value) {
                        Some(image) => {
                            images.insert(image);
                        }
                        None => tracing::debug!(
                            object = %object,
                            path = %path,
                            "Ignoring non-scalar value"
                        ),
                    }
                }
            }
        }

        if !images.is_empty() {
            tracing::debug!(object = %object, count = images.len(), "Found image references");
        }

        images
    }
}

/// Build the rule registry from `objects` (built-ins plus any config
/// objects) and extract every image reference in one step.
pub fn collect_image_references(objects: &[ManifestObject]) -> Result<ImageReferenceSet> {
    let rules = RuleRegistry::from_objects(objects)?;
    Ok(ImageReferenceExtractor::new(rules).extract(objects))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
