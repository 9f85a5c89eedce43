//! Structural migration, applied once at load time.
//!
//! A migration is a batch of path-addressed operations — delete, replace,
//! include, initialize — run against a collection before any persistence
//! hook attaches and before the collection is shared. Patterns are absolute
//! storage paths whose segments may be the wildcard `*`:
//!
//! - a pattern equal to the collection's own path addresses the whole
//!   collection
//! - one segment deeper addresses an element, identified by its path key
//! - deeper still, the remaining segments address properties inside an
//!   element, recursing through migration-capable values
//!
//! After recursing into an element, its canonical key is re-derived: a
//! migration that rewrites the uniqueness property re-files the element
//! under its new key.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use reef_types::StoragePath;
use reef_value::{ObjectValue, Value};

use crate::error::MigrationError;
use crate::map::{MapCollection, MapEntry};
use crate::set::Set;
use crate::thread::Thread;

/// An absolute path pattern. Segments may be the wildcard `*`, which matches
/// any single segment.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathPattern {
    raw: String,
    segments: Vec<String>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, MigrationError> {
        if !raw.starts_with('/') || raw.len() < 2 || raw.ends_with('/') {
            return Err(MigrationError::InvalidPattern(raw.to_owned()));
        }
        let segments: Vec<String> = raw[1..].split('/').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(MigrationError::InvalidPattern(raw.to_owned()));
        }
        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if the pattern's leading segments match the path.
    pub(crate) fn matches_prefix(&self, path: &StoragePath) -> bool {
        let path_segments = path.segments();
        self.segments.len() >= path_segments.len()
            && self
                .segments
                .iter()
                .map(String::as_str)
                .zip(path_segments.iter().copied())
                .all(|(p, s)| p == "*" || p == s)
    }

    pub(crate) fn matches_exactly(&self, path: &StoragePath) -> bool {
        self.depth() == path.depth() && self.matches_prefix(path)
    }

    /// The pattern segment addressing the next level below `path`.
    fn segment_below<'a>(&'a self, path: &StoragePath) -> &'a str {
        &self.segments[path.depth()]
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Produces the value a migration writes. `Value` handlers hand out deep
/// clones so repeated application never aliases state; `Compute` handlers
/// receive the previous value, if any.
#[derive(Clone)]
pub enum MigrationHandler {
    Value(Value),
    Compute(Arc<dyn Fn(Option<&Value>) -> Result<Value, MigrationError> + Send + Sync>),
}

impl MigrationHandler {
    pub fn produce(&self, previous: Option<&Value>) -> Result<Value, MigrationError> {
        match self {
            MigrationHandler::Value(value) => Ok(value.deep_clone()),
            MigrationHandler::Compute(f) => f(previous),
        }
    }
}

impl std::fmt::Debug for MigrationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationHandler::Value(value) => f.debug_tuple("Value").field(value).finish(),
            MigrationHandler::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// The migration batch: pattern-keyed operations, applied in a fixed order
/// (deletions, replacements, inclusions, initializations).
#[derive(Clone, Debug, Default)]
pub struct MigrationHandlers {
    deletions: BTreeMap<PathPattern, Option<MigrationHandler>>,
    replacements: BTreeMap<PathPattern, MigrationHandler>,
    inclusions: BTreeMap<PathPattern, MigrationHandler>,
    initializations: BTreeMap<PathPattern, MigrationHandler>,
}

impl MigrationHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete the addressed value. The optional handler observes each
    /// deleted value before it is dropped.
    pub fn delete(&mut self, pattern: PathPattern, handler: Option<MigrationHandler>) -> &mut Self {
        self.deletions.insert(pattern, handler);
        self
    }

    /// Replace the addressed value with the handler's output.
    pub fn replace(&mut self, pattern: PathPattern, handler: MigrationHandler) -> &mut Self {
        self.replacements.insert(pattern, handler);
        self
    }

    /// Set the addressed property, overwriting any previous value.
    pub fn include(&mut self, pattern: PathPattern, handler: MigrationHandler) -> &mut Self {
        self.inclusions.insert(pattern, handler);
        self
    }

    /// Set the addressed property only if it is absent.
    pub fn initialize(&mut self, pattern: PathPattern, handler: MigrationHandler) -> &mut Self {
        self.initializations.insert(pattern, handler);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.replacements.is_empty()
            && self.inclusions.is_empty()
            && self.initializations.is_empty()
    }

    /// The subset of operations addressing `prefix` or anything below it.
    pub(crate) fn filter_by_prefix(&self, prefix: &StoragePath) -> MigrationHandlers {
        MigrationHandlers {
            deletions: self
                .deletions
                .iter()
                .filter(|(p, _)| p.matches_prefix(prefix))
                .map(|(p, h)| (p.clone(), h.clone()))
                .collect(),
            replacements: filter_map_by_prefix(&self.replacements, prefix),
            inclusions: filter_map_by_prefix(&self.inclusions, prefix),
            initializations: filter_map_by_prefix(&self.initializations, prefix),
        }
    }
}

fn filter_map_by_prefix(
    map: &BTreeMap<PathPattern, MigrationHandler>,
    prefix: &StoragePath,
) -> BTreeMap<PathPattern, MigrationHandler> {
    map.iter()
        .filter(|(p, _)| p.matches_prefix(prefix))
        .map(|(p, h)| (p.clone(), h.clone()))
        .collect()
}

/// Result of migrating one value or collection.
#[derive(Debug)]
pub enum MigrationOutcome {
    /// The value survives, possibly mutated in place.
    Kept,
    /// The value was replaced wholesale.
    Replaced(Value),
    /// The value was deleted.
    Deleted,
}

/// A value that migrations can be applied to and recursed through.
pub trait Migratable {
    /// Apply every operation in `handlers` that addresses `path` or
    /// something below it.
    fn migrate(
        &self,
        path: &StoragePath,
        handlers: &MigrationHandlers,
    ) -> Result<MigrationOutcome, MigrationError>;
}

fn unsupported(pattern: &PathPattern, reason: &str) -> MigrationError {
    MigrationError::UnsupportedOperation {
        pattern: pattern.as_str().to_owned(),
        reason: reason.to_owned(),
    }
}

fn join(path: &StoragePath, segment: &str) -> Result<StoragePath, MigrationError> {
    path.join(segment)
        .map_err(|e| MigrationError::InvalidPattern(e.to_string()))
}

impl Migratable for Set {
    fn migrate(
        &self,
        path: &StoragePath,
        handlers: &MigrationHandlers,
    ) -> Result<MigrationOutcome, MigrationError> {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        if state.overlays.any_pending() {
            return Err(MigrationError::PendingChanges);
        }
        let base_depth = path.depth();
        let policy = inner.config.uniqueness.clone();

        // Whole-collection operations first.
        for (pattern, handler) in &handlers.deletions {
            if pattern.matches_exactly(path) {
                if let Some(handler) = handler {
                    handler.produce(None)?;
                }
                debug!(path = %path, "migration deleted collection");
                return Ok(MigrationOutcome::Deleted);
            }
        }
        for (pattern, handler) in &handlers.replacements {
            if pattern.matches_exactly(path) {
                debug!(path = %path, "migration replaced collection");
                return Ok(MigrationOutcome::Replaced(handler.produce(None)?));
            }
        }
        for pattern in handlers.inclusions.keys().chain(handlers.initializations.keys()) {
            if pattern.matches_exactly(path) {
                return Err(unsupported(pattern, "a collection cannot be included over"));
            }
        }

        // Element-level deletions (one segment below the collection).
        for (pattern, handler) in &handlers.deletions {
            if !pattern.matches_prefix(path) || pattern.depth() != base_depth + 1 {
                continue;
            }
            let segment = pattern.segment_below(path);
            if segment == "*" {
                let doomed: Vec<String> = state.elements.keys().cloned().collect();
                for key in doomed {
                    if let (Some(handler), Some(element)) = (handler, state.elements.get(&key)) {
                        handler.produce(Some(&element.clone()))?;
                    }
                    state.remove_element(&policy, &key);
                }
            } else {
                let key = lookup_by_path_key(&state, &policy, segment)
                    .ok_or_else(|| MigrationError::TargetNotFound {
                        pattern: pattern.as_str().to_owned(),
                    })?;
                if let (Some(handler), Some(element)) = (handler, state.elements.get(&key)) {
                    handler.produce(Some(&element.clone()))?;
                }
                state.remove_element(&policy, &key);
            }
        }
        // Elements are identity-derived, so they cannot be written by slot.
        for pattern in handlers
            .replacements
            .keys()
            .chain(handlers.inclusions.keys())
            .chain(handlers.initializations.keys())
        {
            if pattern.matches_prefix(path) && pattern.depth() == base_depth + 1 {
                return Err(unsupported(
                    pattern,
                    "set elements are identity-derived, not slot-addressed",
                ));
            }
        }

        // Nested operations: recurse into each addressed element once, with
        // the operations filtered down to its subtree, then re-file it under
        // its re-derived key.
        let mut targets: BTreeSet<String> = BTreeSet::new();
        let nested_patterns = handlers
            .deletions
            .keys()
            .chain(handlers.replacements.keys())
            .chain(handlers.inclusions.keys())
            .chain(handlers.initializations.keys());
        for pattern in nested_patterns {
            if !pattern.matches_prefix(path) || pattern.depth() <= base_depth + 1 {
                continue;
            }
            let segment = pattern.segment_below(path);
            if segment == "*" {
                let all: Vec<String> = state
                    .elements
                    .keys()
                    .map(|key| policy.path_key_of(key).as_str().to_owned())
                    .collect();
                targets.extend(all);
            } else {
                if lookup_by_path_key(&state, &policy, segment).is_none() {
                    return Err(MigrationError::TargetNotFound {
                        pattern: pattern.as_str().to_owned(),
                    });
                }
                targets.insert(segment.to_owned());
            }
        }

        for path_key in targets {
            let Some(key) = lookup_by_path_key(&state, &policy, &path_key) else {
                continue;
            };
            let element_path = join(path, &path_key)?;
            let element = state.elements.get(&key).cloned().ok_or_else(|| {
                MigrationError::TargetNotFound {
                    pattern: element_path.as_str().to_owned(),
                }
            })?;
            let Some(obj) = element.as_object() else {
                return Err(MigrationError::NotMigrationCapable {
                    pattern: element_path.as_str().to_owned(),
                });
            };
            let sub = handlers.filter_by_prefix(&element_path);
            state.remove_element(&policy, &key);
            match obj.migrate(&element_path, &sub)? {
                MigrationOutcome::Deleted => {}
                MigrationOutcome::Replaced(replacement) => {
                    let new_key = inner
                        .canonical_key(&replacement)
                        .map_err(|e| MigrationError::Rekey(e.to_string()))?;
                    state.insert_element(&policy, new_key, replacement);
                }
                MigrationOutcome::Kept => {
                    let new_key = inner
                        .canonical_key(&element)
                        .map_err(|e| MigrationError::Rekey(e.to_string()))?;
                    if state.elements.contains_key(&new_key) {
                        return Err(MigrationError::Rekey(format!(
                            "duplicate key after migration: {new_key}"
                        )));
                    }
                    state.insert_element(&policy, new_key, element);
                }
            }
        }

        Ok(MigrationOutcome::Kept)
    }
}

fn lookup_by_path_key(
    state: &crate::set::SetState,
    policy: &crate::uniqueness::UniquenessPolicy,
    segment: &str,
) -> Option<String> {
    // Linear re-derivation instead of the lazy alias index: migration runs
    // once, at load, on the base mapping only.
    state
        .elements
        .keys()
        .find(|key| policy.path_key_of(key).as_str() == segment)
        .cloned()
}

impl Migratable for ObjectValue {
    fn migrate(
        &self,
        path: &StoragePath,
        handlers: &MigrationHandlers,
    ) -> Result<MigrationOutcome, MigrationError> {
        let base_depth = path.depth();

        for (pattern, handler) in &handlers.deletions {
            if !pattern.matches_prefix(path) {
                continue;
            }
            if pattern.matches_exactly(path) {
                if let Some(handler) = handler {
                    handler.produce(Some(&Value::Object(self.clone())))?;
                }
                return Ok(MigrationOutcome::Deleted);
            }
            let segment = pattern.segment_below(path);
            if pattern.depth() == base_depth + 1 {
                if segment == "*" {
                    for name in self.property_names() {
                        if let (Some(handler), Some(previous)) = (handler, self.get(&name)) {
                            handler.produce(Some(&previous))?;
                        }
                        self.remove(&name);
                    }
                } else {
                    let previous = self.remove(segment).ok_or_else(|| {
                        MigrationError::TargetNotFound {
                            pattern: pattern.as_str().to_owned(),
                        }
                    })?;
                    if let Some(handler) = handler {
                        handler.produce(Some(&previous))?;
                    }
                }
            } else {
                self.recurse_property(path, segment, pattern, |child, child_path| {
                    let mut sub = MigrationHandlers::new();
                    sub.delete(pattern.clone(), handler.clone());
                    child.migrate(child_path, &sub)
                })?;
            }
        }

        for (pattern, handler) in &handlers.replacements {
            if !pattern.matches_prefix(path) {
                continue;
            }
            if pattern.matches_exactly(path) {
                return Ok(MigrationOutcome::Replaced(
                    handler.produce(Some(&Value::Object(self.clone())))?,
                ));
            }
            let segment = pattern.segment_below(path);
            if pattern.depth() == base_depth + 1 {
                if segment == "*" {
                    for name in self.property_names() {
                        let previous = self.get(&name);
                        let next = handler.produce(previous.as_ref())?;
                        self.set(name, next)
                            .map_err(|e| MigrationError::Handler(e.to_string()))?;
                    }
                } else {
                    let previous =
                        self.get(segment)
                            .ok_or_else(|| MigrationError::TargetNotFound {
                                pattern: pattern.as_str().to_owned(),
                            })?;
                    let next = handler.produce(Some(&previous))?;
                    self.set(segment, next)
                        .map_err(|e| MigrationError::Handler(e.to_string()))?;
                }
            } else {
                self.recurse_property(path, segment, pattern, |child, child_path| {
                    let mut sub = MigrationHandlers::new();
                    sub.replace(pattern.clone(), handler.clone());
                    child.migrate(child_path, &sub)
                })?;
            }
        }

        for (pattern, handler) in &handlers.inclusions {
            if !pattern.matches_prefix(path) {
                continue;
            }
            if pattern.matches_exactly(path) {
                return Err(unsupported(pattern, "an object cannot be included over"));
            }
            let segment = pattern.segment_below(path);
            if pattern.depth() == base_depth + 1 {
                if segment == "*" {
                    return Err(unsupported(pattern, "an inclusion needs a property name"));
                }
                let previous = self.get(segment);
                let next = handler.produce(previous.as_ref())?;
                self.set(segment, next)
                    .map_err(|e| MigrationError::Handler(e.to_string()))?;
            } else {
                self.recurse_property(path, segment, pattern, |child, child_path| {
                    let mut sub = MigrationHandlers::new();
                    sub.include(pattern.clone(), handler.clone());
                    child.migrate(child_path, &sub)
                })?;
            }
        }

        for (pattern, handler) in &handlers.initializations {
            if !pattern.matches_prefix(path) {
                continue;
            }
            if pattern.matches_exactly(path) {
                return Err(unsupported(
                    pattern,
                    "an initialization needs a property name",
                ));
            }
            let segment = pattern.segment_below(path);
            if pattern.depth() == base_depth + 1 {
                if segment == "*" {
                    return Err(unsupported(
                        pattern,
                        "an initialization needs a property name",
                    ));
                }
                if self.get(segment).is_none() {
                    let next = handler.produce(None)?;
                    self.set(segment, next)
                        .map_err(|e| MigrationError::Handler(e.to_string()))?;
                }
            } else {
                self.recurse_property(path, segment, pattern, |child, child_path| {
                    let mut sub = MigrationHandlers::new();
                    sub.initialize(pattern.clone(), handler.clone());
                    child.migrate(child_path, &sub)
                })?;
            }
        }

        Ok(MigrationOutcome::Kept)
    }
}

/// Property-recursion helper shared by the object migration passes.
trait ObjectRecursion {
    fn recurse_property<F>(
        &self,
        path: &StoragePath,
        segment: &str,
        pattern: &PathPattern,
        apply: F,
    ) -> Result<(), MigrationError>
    where
        F: Fn(&ObjectValue, &StoragePath) -> Result<MigrationOutcome, MigrationError>;
}

impl ObjectRecursion for ObjectValue {
    fn recurse_property<F>(
        &self,
        path: &StoragePath,
        segment: &str,
        pattern: &PathPattern,
        apply: F,
    ) -> Result<(), MigrationError>
    where
        F: Fn(&ObjectValue, &StoragePath) -> Result<MigrationOutcome, MigrationError>,
    {
        let names: Vec<String> = if segment == "*" {
            self.property_names()
        } else {
            if self.get(segment).is_none() {
                return Err(MigrationError::TargetNotFound {
                    pattern: pattern.as_str().to_owned(),
                });
            }
            vec![segment.to_owned()]
        };
        for name in names {
            let Some(child) = self.get(&name) else {
                continue;
            };
            let child_path = join(path, &name)?;
            let Some(child_obj) = child.as_object() else {
                if segment == "*" {
                    // Wildcards skip values that cannot recurse.
                    continue;
                }
                return Err(MigrationError::NotMigrationCapable {
                    pattern: child_path.as_str().to_owned(),
                });
            };
            match apply(child_obj, &child_path)? {
                MigrationOutcome::Kept => {}
                MigrationOutcome::Replaced(replacement) => {
                    self.set(name, replacement)
                        .map_err(|e| MigrationError::Handler(e.to_string()))?;
                }
                MigrationOutcome::Deleted => {
                    self.remove(&name);
                }
            }
        }
        Ok(())
    }
}

impl Migratable for MapCollection {
    fn migrate(
        &self,
        path: &StoragePath,
        handlers: &MigrationHandlers,
    ) -> Result<MigrationOutcome, MigrationError> {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        if state.overlays.any_pending() {
            return Err(MigrationError::PendingChanges);
        }
        let base_depth = path.depth();

        for (pattern, handler) in &handlers.deletions {
            if pattern.matches_exactly(path) {
                if let Some(handler) = handler {
                    handler.produce(None)?;
                }
                return Ok(MigrationOutcome::Deleted);
            }
        }
        for (pattern, handler) in &handlers.replacements {
            if pattern.matches_exactly(path) {
                return Ok(MigrationOutcome::Replaced(handler.produce(None)?));
            }
        }
        for pattern in handlers.inclusions.keys().chain(handlers.initializations.keys()) {
            if pattern.matches_exactly(path) {
                return Err(unsupported(pattern, "a collection cannot be included over"));
            }
        }

        // Entry-level deletions address the association by its key's path
        // key.
        for (pattern, handler) in &handlers.deletions {
            if !pattern.matches_prefix(path) || pattern.depth() != base_depth + 1 {
                continue;
            }
            let segment = pattern.segment_below(path);
            if segment == "*" {
                if let Some(handler) = handler {
                    for entry in state.entries.values() {
                        handler.produce(Some(&entry.value))?;
                    }
                }
                state.entries.clear();
            } else {
                let canonical = lookup_map_key(&state.entries, segment).ok_or_else(|| {
                    MigrationError::TargetNotFound {
                        pattern: pattern.as_str().to_owned(),
                    }
                })?;
                if let (Some(handler), Some(entry)) = (handler, state.entries.get(&canonical)) {
                    handler.produce(Some(&entry.value.clone()))?;
                }
                state.entries.remove(&canonical);
            }
        }

        // Entry-level replacements rewrite the associated value; the key is
        // immutable, so the canonical key is unchanged.
        for (pattern, handler) in &handlers.replacements {
            if !pattern.matches_prefix(path) || pattern.depth() != base_depth + 1 {
                continue;
            }
            let segment = pattern.segment_below(path);
            let canonicals: Vec<String> = if segment == "*" {
                state.entries.keys().cloned().collect()
            } else {
                vec![lookup_map_key(&state.entries, segment).ok_or_else(|| {
                    MigrationError::TargetNotFound {
                        pattern: pattern.as_str().to_owned(),
                    }
                })?]
            };
            for canonical in canonicals {
                if let Some(entry) = state.entries.get_mut(&canonical) {
                    entry.value = handler.produce(Some(&entry.value.clone()))?;
                }
            }
        }
        // The original key cannot be reconstructed from its path key, so
        // associations cannot be created by slot.
        for pattern in handlers.inclusions.keys().chain(handlers.initializations.keys()) {
            if pattern.matches_prefix(path) && pattern.depth() == base_depth + 1 {
                return Err(unsupported(
                    pattern,
                    "map associations cannot be created by slot",
                ));
            }
        }

        // Nested operations recurse into object values.
        let mut targets: BTreeSet<String> = BTreeSet::new();
        let nested_patterns = handlers
            .deletions
            .keys()
            .chain(handlers.replacements.keys())
            .chain(handlers.inclusions.keys())
            .chain(handlers.initializations.keys());
        for pattern in nested_patterns {
            if !pattern.matches_prefix(path) || pattern.depth() <= base_depth + 1 {
                continue;
            }
            let segment = pattern.segment_below(path);
            if segment == "*" {
                targets.extend(
                    state
                        .entries
                        .keys()
                        .map(|canonical| path_key_of_map_key(canonical)),
                );
            } else {
                if lookup_map_key(&state.entries, segment).is_none() {
                    return Err(MigrationError::TargetNotFound {
                        pattern: pattern.as_str().to_owned(),
                    });
                }
                targets.insert(segment.to_owned());
            }
        }

        for path_key in targets {
            let Some(canonical) = lookup_map_key(&state.entries, &path_key) else {
                continue;
            };
            let entry_path = join(path, &path_key)?;
            let value = state
                .entries
                .get(&canonical)
                .map(|e| e.value.clone())
                .ok_or_else(|| MigrationError::TargetNotFound {
                    pattern: entry_path.as_str().to_owned(),
                })?;
            let Some(obj) = value.as_object() else {
                return Err(MigrationError::NotMigrationCapable {
                    pattern: entry_path.as_str().to_owned(),
                });
            };
            let sub = handlers.filter_by_prefix(&entry_path);
            match obj.migrate(&entry_path, &sub)? {
                MigrationOutcome::Kept => {}
                MigrationOutcome::Replaced(replacement) => {
                    if let Some(entry) = state.entries.get_mut(&canonical) {
                        entry.value = replacement;
                    }
                }
                MigrationOutcome::Deleted => {
                    state.entries.remove(&canonical);
                }
            }
        }

        Ok(MigrationOutcome::Kept)
    }
}

fn path_key_of_map_key(canonical: &str) -> String {
    reef_types::PathKey::hash_of(canonical).as_str().to_owned()
}

fn lookup_map_key(
    entries: &std::collections::HashMap<String, MapEntry>,
    segment: &str,
) -> Option<String> {
    entries
        .keys()
        .find(|canonical| path_key_of_map_key(canonical) == segment)
        .cloned()
}

impl Migratable for Thread {
    fn migrate(
        &self,
        path: &StoragePath,
        handlers: &MigrationHandlers,
    ) -> Result<MigrationOutcome, MigrationError> {
        let state = self.inner.lock_state();
        if state.has_pending() {
            return Err(MigrationError::PendingChanges);
        }
        drop(state);

        for (pattern, handler) in &handlers.deletions {
            if pattern.matches_exactly(path) {
                if let Some(handler) = handler {
                    handler.produce(None)?;
                }
                return Ok(MigrationOutcome::Deleted);
            }
            if pattern.matches_prefix(path) {
                return Err(unsupported(pattern, "threads are append-only"));
            }
        }
        for (pattern, handler) in &handlers.replacements {
            if pattern.matches_exactly(path) {
                return Ok(MigrationOutcome::Replaced(handler.produce(None)?));
            }
            if pattern.matches_prefix(path) {
                return Err(unsupported(pattern, "threads are append-only"));
            }
        }
        for pattern in handlers.inclusions.keys().chain(handlers.initializations.keys()) {
            if pattern.matches_prefix(path) {
                return Err(unsupported(pattern, "threads are append-only"));
            }
        }

        Ok(MigrationOutcome::Kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::{Set, SetConfig};
    use crate::uniqueness::UniquenessPolicy;
    use reef_txn::Transaction;
    use reef_value::ShapePattern;

    fn pattern(s: &str) -> PathPattern {
        PathPattern::parse(s).unwrap()
    }

    fn path(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    fn person(id: &str, age: i64) -> Value {
        Value::Object(
            ObjectValue::from_entries([
                ("id", Value::Str(id.into())),
                ("age", Value::Int(age)),
            ])
            .unwrap(),
        )
    }

    fn person_set(people: &[Value]) -> Set {
        let set = Set::new(SetConfig::new(
            Arc::new(ShapePattern::object([("id", ShapePattern::Str)])),
            UniquenessPolicy::ByProperty("id".into()),
        ))
        .unwrap();
        for p in people {
            set.add(None, p.clone()).unwrap();
        }
        set
    }

    fn person_path_key(set: &Set, id: &str) -> String {
        let key = format!("\"{id}\"");
        set.uniqueness().path_key_of(&key).as_str().to_owned()
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        for bad in ["", "relative", "/", "/a//b", "/a/"] {
            assert!(matches!(
                PathPattern::parse(bad),
                Err(MigrationError::InvalidPattern(_))
            ));
        }
        assert_eq!(pattern("/users/*/age").depth(), 3);
    }

    #[test]
    fn wildcard_segments_match_anything() {
        let p = pattern("/users/*/age");
        assert!(p.matches_prefix(&path("/users")));
        assert!(p.matches_prefix(&path("/users/abc")));
        assert!(!p.matches_prefix(&path("/groups")));
        assert!(pattern("/users").matches_exactly(&path("/users")));
    }

    #[test]
    fn empty_migration_keeps_everything() {
        let set = person_set(&[person("a", 30)]);
        let outcome = set.migrate(&path("/users"), &MigrationHandlers::new()).unwrap();
        assert!(matches!(outcome, MigrationOutcome::Kept));
        assert_eq!(set.len(None).unwrap(), 1);
    }

    #[test]
    fn whole_collection_deletion() {
        let set = person_set(&[person("a", 30)]);
        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern("/users"), None);
        assert!(matches!(
            set.migrate(&path("/users"), &handlers).unwrap(),
            MigrationOutcome::Deleted
        ));
    }

    #[test]
    fn element_deletion_by_path_key_and_wildcard() {
        let set = person_set(&[person("a", 30), person("b", 40)]);
        let pk = person_path_key(&set, "a");
        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern(&format!("/users/{pk}")), None);
        set.migrate(&path("/users"), &handlers).unwrap();
        assert_eq!(set.len(None).unwrap(), 1);

        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern("/users/*"), None);
        set.migrate(&path("/users"), &handlers).unwrap();
        assert!(set.is_empty(None).unwrap());
    }

    #[test]
    fn deleting_a_missing_element_is_reported() {
        let set = person_set(&[person("a", 30)]);
        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern("/users/doesnotexist"), None);
        assert!(matches!(
            set.migrate(&path("/users"), &handlers),
            Err(MigrationError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn elements_cannot_be_written_by_slot() {
        let set = person_set(&[person("a", 30)]);
        let pk = person_path_key(&set, "a");
        let mut handlers = MigrationHandlers::new();
        handlers.replace(
            pattern(&format!("/users/{pk}")),
            MigrationHandler::Value(person("z", 1)),
        );
        assert!(matches!(
            set.migrate(&path("/users"), &handlers),
            Err(MigrationError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn nested_inclusion_adds_a_property_to_every_element() {
        let set = person_set(&[person("a", 30), person("b", 40)]);
        let mut handlers = MigrationHandlers::new();
        handlers.include(
            pattern("/users/*/active"),
            MigrationHandler::Value(Value::Bool(true)),
        );
        set.migrate(&path("/users"), &handlers).unwrap();

        for element in set.iter(None).unwrap() {
            assert_eq!(
                element.as_object().unwrap().get("active"),
                Some(Value::Bool(true))
            );
        }
    }

    #[test]
    fn nested_initialization_only_fills_gaps() {
        let with = person("a", 30);
        let without = Value::Object(
            ObjectValue::from_entries([("id", Value::Str("b".into()))]).unwrap(),
        );
        let set = person_set(&[with, without]);
        let mut handlers = MigrationHandlers::new();
        handlers.initialize(
            pattern("/users/*/age"),
            MigrationHandler::Value(Value::Int(0)),
        );
        set.migrate(&path("/users"), &handlers).unwrap();

        let ages: Vec<Value> = set
            .iter(None)
            .unwrap()
            .map(|e| e.as_object().unwrap().get("age").unwrap())
            .collect();
        assert!(ages.contains(&Value::Int(30)));
        assert!(ages.contains(&Value::Int(0)));
    }

    #[test]
    fn rewriting_the_uniqueness_property_refiles_the_element() {
        let set = person_set(&[person("a", 30)]);
        let pk = person_path_key(&set, "a");
        let mut handlers = MigrationHandlers::new();
        handlers.replace(
            pattern(&format!("/users/{pk}/id")),
            MigrationHandler::Value(Value::Str("renamed".into())),
        );
        set.migrate(&path("/users"), &handlers).unwrap();

        assert!(set.get(None, "\"renamed\"").unwrap().is_some());
        assert!(set.get(None, "\"a\"").unwrap().is_none());
        // The alias index follows the re-filed key.
        let new_pk = set.uniqueness().path_key_of("\"renamed\"");
        assert!(set.get_by_path_key(None, &new_pk).is_ok());
    }

    #[test]
    fn compute_handlers_see_the_previous_value() {
        let set = person_set(&[person("a", 30)]);
        let mut handlers = MigrationHandlers::new();
        handlers.replace(
            pattern("/users/*/age"),
            MigrationHandler::Compute(Arc::new(|previous| match previous {
                Some(Value::Int(age)) => Ok(Value::Int(age + 1)),
                _ => Err(MigrationError::Handler("expected an int age".into())),
            })),
        );
        set.migrate(&path("/users"), &handlers).unwrap();

        let element = set.iter(None).unwrap().next().unwrap();
        assert_eq!(element.as_object().unwrap().get("age"), Some(Value::Int(31)));
    }

    #[test]
    fn pending_transactional_changes_block_migration() {
        let set = person_set(&[]);
        set.share();
        let tx = Transaction::new();
        set.add(Some(&tx), person("a", 30)).unwrap();

        let err = set
            .migrate(&path("/users"), &MigrationHandlers::new())
            .unwrap_err();
        assert!(matches!(err, MigrationError::PendingChanges));
        tx.rollback().unwrap();
    }

    #[test]
    fn object_deletion_and_value_handlers_clone() {
        let obj = ObjectValue::from_entries([
            ("keep", Value::Int(1)),
            ("drop", Value::Int(2)),
        ])
        .unwrap();
        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern("/cfg/drop"), None);
        obj.migrate(&path("/cfg"), &handlers).unwrap();
        assert!(!obj.has_property("drop"));
        assert!(obj.has_property("keep"));

        // Value handlers hand out independent deep clones.
        let template = ObjectValue::from_entries([("n", Value::Int(0))]).unwrap();
        let handler = MigrationHandler::Value(Value::Object(template.clone()));
        let produced = handler.produce(None).unwrap();
        produced
            .as_object()
            .unwrap()
            .set("n", Value::Int(9))
            .unwrap();
        assert_eq!(template.get("n"), Some(Value::Int(0)));
    }

    #[test]
    fn deep_object_recursion() {
        let inner = ObjectValue::from_entries([("city", Value::Str("paris".into()))]).unwrap();
        let obj = ObjectValue::from_entries([("address", Value::Object(inner))]).unwrap();

        let mut handlers = MigrationHandlers::new();
        handlers.include(
            pattern("/cfg/address/country"),
            MigrationHandler::Value(Value::Str("fr".into())),
        );
        obj.migrate(&path("/cfg"), &handlers).unwrap();

        let address = obj.get("address").unwrap();
        assert_eq!(
            address.as_object().unwrap().get("country"),
            Some(Value::Str("fr".into()))
        );
    }

    #[test]
    fn recursion_through_a_scalar_is_reported() {
        let obj = ObjectValue::from_entries([("n", Value::Int(1))]).unwrap();
        let mut handlers = MigrationHandlers::new();
        handlers.include(
            pattern("/cfg/n/deep"),
            MigrationHandler::Value(Value::Int(0)),
        );
        assert!(matches!(
            obj.migrate(&path("/cfg"), &handlers),
            Err(MigrationError::NotMigrationCapable { .. })
        ));
    }

    #[test]
    fn map_value_replacement_keeps_the_key() {
        use crate::map::{MapCollection, MapConfig};
        let map = MapCollection::new(MapConfig::new(
            Arc::new(ShapePattern::Str),
            Arc::new(ShapePattern::Int),
        ));
        map.insert(None, Value::Str("a".into()), Value::Int(1))
            .unwrap();

        let mut handlers = MigrationHandlers::new();
        handlers.replace(
            pattern("/scores/*"),
            MigrationHandler::Value(Value::Int(0)),
        );
        map.migrate(&path("/scores"), &handlers).unwrap();
        assert_eq!(
            map.get(None, &Value::Str("a".into())).unwrap(),
            Some(Value::Int(0))
        );
    }

    #[test]
    fn threads_only_support_whole_collection_migration() {
        use crate::thread::{Thread, ThreadConfig};
        let thread = Thread::new(ThreadConfig::new(Arc::new(ShapePattern::Any)));

        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern("/log/*"), None);
        assert!(matches!(
            thread.migrate(&path("/log"), &handlers),
            Err(MigrationError::UnsupportedOperation { .. })
        ));

        let mut handlers = MigrationHandlers::new();
        handlers.delete(pattern("/log"), None);
        assert!(matches!(
            thread.migrate(&path("/log"), &handlers).unwrap(),
            MigrationOutcome::Deleted
        ));
    }
}
