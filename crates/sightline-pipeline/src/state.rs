//! Mutable state of a single pipeline run.
//!
//! Handlers see the run through [`ExecutionState`]: they may replace the
//! working image and edit the variable table, but earlier artifacts and
//! stage reports are only reachable through read accessors. The executor
//! owns the write side (`pub(crate)`), so a handler can never rewrite what
//! an earlier stage produced.

use std::collections::BTreeMap;

use image::DynamicImage;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::definition::INPUT_NAME;
use crate::report::StageReport;
use crate::types::Dimensions;

/// Substitution variables available to `{{name}}` parameter placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Bind `name`, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    /// Unbind `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Variables {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

/// Snapshots of the working image, keyed by stage name.
///
/// Seeded with the run's input under `"input"`. Each explicitly named
/// stage adds an independent copy of the image it produced.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCache {
    images: IndexMap<String, DynamicImage>,
}

impl ArtifactCache {
    /// Artifact stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DynamicImage> {
        self.images.get(name)
    }

    /// Returns `true` if `name` has been stored.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    /// Stored names, oldest first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, image: DynamicImage) -> Option<DynamicImage> {
        self.images.insert(name, image)
    }
}

/// Everything a run reads and writes.
#[derive(Debug)]
pub struct ExecutionState {
    image: DynamicImage,
    cache: ArtifactCache,
    log: IndexMap<String, StageReport>,
    variables: Variables,
}

impl ExecutionState {
    /// Fresh state whose working image and `"input"` artifact are `input`.
    #[must_use]
    pub fn new(input: DynamicImage, variables: Variables) -> Self {
        let mut cache = ArtifactCache::default();
        cache.insert(INPUT_NAME.to_owned(), input.clone());
        Self {
            image: input,
            cache,
            log: IndexMap::new(),
            variables,
        }
    }

    /// The working image.
    #[must_use]
    pub const fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Mutable access to the working image.
    pub const fn image_mut(&mut self) -> &mut DynamicImage {
        &mut self.image
    }

    /// Replace the working image.
    pub fn set_image(&mut self, image: DynamicImage) {
        self.image = image;
    }

    /// Dimensions of the working image.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.image)
    }

    /// Artifact cached by an earlier stage (or `"input"`).
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&DynamicImage> {
        self.cache.get(name)
    }

    /// All cached artifacts.
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Report written by an earlier stage.
    #[must_use]
    pub fn stage_report(&self, name: &str) -> Option<&StageReport> {
        self.log.get(name)
    }

    /// The substitution table.
    #[must_use]
    pub const fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Mutable access to the substitution table.
    pub const fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    /// Copy the working image into the cache under `name`.
    ///
    /// Returns `true` if an earlier artifact of that name was replaced.
    pub(crate) fn snapshot(&mut self, name: String) -> bool {
        let image = self.image.clone();
        self.cache.insert(name, image).is_some()
    }

    /// Append a stage report to the run log.
    ///
    /// Returns `true` if an earlier report of that name was replaced.
    pub(crate) fn record(&mut self, name: String, report: StageReport) -> bool {
        // shift_remove keeps the log in execution order when a name repeats
        let replaced = self.log.shift_remove(&name).is_some();
        self.log.insert(name, report);
        replaced
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        DynamicImage,
        ArtifactCache,
        IndexMap<String, StageReport>,
        Variables,
    ) {
        (self.image, self.cache, self.log, self.variables)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_state_caches_input() {
        let input = DynamicImage::new_luma8(3, 2);
        let state = ExecutionState::new(input.clone(), Variables::new());
        assert_eq!(state.artifact("input"), Some(&input));
        assert_eq!(state.image(), &input);
        assert_eq!(state.artifacts().len(), 1);
    }

    #[test]
    fn snapshot_is_independent_of_later_edits() {
        let mut state = ExecutionState::new(DynamicImage::new_luma8(2, 2), Variables::new());
        state.snapshot("a".to_owned());
        state.set_image(DynamicImage::new_rgb8(5, 5));
        assert_eq!(state.artifact("a").unwrap().width(), 2);
        assert_eq!(state.dimensions(), Dimensions { width: 5, height: 5 });
    }

    #[test]
    fn record_keeps_execution_order_and_flags_repeats() {
        let mut state = ExecutionState::new(DynamicImage::new_luma8(1, 1), Variables::new());
        assert!(!state.record("a".to_owned(), StageReport::default()));
        assert!(!state.record("b".to_owned(), StageReport::default()));
        let mut again = StageReport::default();
        again.insert("n", 2);
        assert!(state.record("a".to_owned(), again));
        let (_, _, log, _) = state.into_parts();
        let names: Vec<&str> = log.keys().map(String::as_str).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(log["a"].get("n"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn variables_round_trip() {
        let mut vars: Variables = [("a", "1")].into_iter().collect();
        assert_eq!(vars.set("b", "2"), None);
        assert_eq!(vars.set("a", "3"), Some("1".to_owned()));
        assert_eq!(vars.get("a"), Some("3"));
        assert_eq!(vars.len(), 2);
        let pairs: Vec<(&str, &str)> = vars.iter().collect();
        assert_eq!(pairs, [("a", "3"), ("b", "2")]);
        assert_eq!(vars.remove("a"), Some("3".to_owned()));
        assert_eq!(vars.get("a"), None);
    }

    #[test]
    fn variables_serialize_as_plain_object() {
        let vars: Variables = [("run", "7")].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&vars).unwrap(),
            serde_json::json!({"run": "7"}),
        );
    }
}
