//! Detector class lookup
//!
//! Built once at startup from the class names the detector exposes. The
//! allowed set is derived by name so configs stay readable across models
//! with different id layouts.

use crate::domain::types::ClassId;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

/// Class id to class name table plus the ids admitted as obstacles
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    names: BTreeMap<ClassId, String>,
    allowed: FxHashSet<ClassId>,
}

impl ClassTable {
    /// Build the table and resolve `allowed_names` against it
    ///
    /// Names in `allowed_names` that the detector does not know are ignored.
    pub fn new<I, S>(names: BTreeMap<ClassId, String>, allowed_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: Vec<String> = allowed_names.into_iter().map(|s| s.as_ref().to_string()).collect();
        let allowed = names
            .iter()
            .filter(|(_, name)| wanted.iter().any(|w| w == *name))
            .map(|(&id, _)| id)
            .collect();
        Self { names, allowed }
    }

    pub fn name(&self, id: ClassId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Whether `id` counts as an obstacle
    ///
    /// An empty allowed set admits every class.
    #[inline]
    pub fn is_allowed(&self, id: ClassId) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&id)
    }

    pub fn allowed_ids(&self) -> Vec<ClassId> {
        let mut ids: Vec<ClassId> = self.allowed.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
