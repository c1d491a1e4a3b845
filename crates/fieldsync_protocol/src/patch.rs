//! Per-field patches.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An edit to a single field: either leave it alone or set it.
///
/// "No update" is a variant rather than `None`/`null` because `null` is a
/// legitimate value to set (clearing a note, for example).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldPatch<T> {
    /// The field is not touched.
    NoUpdate,
    /// The field is set to this value.
    Updated(T),
}

impl<T> FieldPatch<T> {
    /// Right-biased merge: `other` wins if it is an update, otherwise `self` is kept.
    pub fn merge(self, other: FieldPatch<T>) -> FieldPatch<T> {
        match other {
            FieldPatch::Updated(value) => FieldPatch::Updated(value),
            FieldPatch::NoUpdate => self,
        }
    }

    /// Folds a sequence of patches oldest-first.
    pub fn merge_all(patches: impl IntoIterator<Item = FieldPatch<T>>) -> FieldPatch<T> {
        patches
            .into_iter()
            .fold(FieldPatch::NoUpdate, FieldPatch::merge)
    }

    /// Returns true if this patch sets a value.
    pub fn is_updated(&self) -> bool {
        matches!(self, FieldPatch::Updated(_))
    }

    /// Borrows the new value, if any.
    pub fn as_updated(&self) -> Option<&T> {
        match self {
            FieldPatch::Updated(value) => Some(value),
            FieldPatch::NoUpdate => None,
        }
    }

    /// Converts the new value with `f`.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldPatch<U> {
        match self {
            FieldPatch::Updated(value) => FieldPatch::Updated(f(value)),
            FieldPatch::NoUpdate => FieldPatch::NoUpdate,
        }
    }

    /// Writes the new value into `target` if this is an update.
    pub fn apply_to(self, target: &mut T) {
        if let FieldPatch::Updated(value) = self {
            *target = value;
        }
    }
}

impl<T> Default for FieldPatch<T> {
    fn default() -> Self {
        FieldPatch::NoUpdate
    }
}

impl<T> From<Option<T>> for FieldPatch<T> {
    /// `Some(v)` becomes an update, `None` becomes "no update".
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => FieldPatch::Updated(value),
            None => FieldPatch::NoUpdate,
        }
    }
}

/// Field name to patch. Sorted by field name.
pub type PatchPayload = BTreeMap<String, FieldPatch<Value>>;

/// Merges two payloads field by field, `newer` winning where it updates.
pub fn merge_payloads(older: &PatchPayload, newer: &PatchPayload) -> PatchPayload {
    let mut merged = older.clone();
    for (field, patch) in newer {
        let current = merged.remove(field).unwrap_or_default();
        merged.insert(field.clone(), current.merge(patch.clone()));
    }
    merged
}

/// Collapses a payload into the JSON merge-patch object that goes on the wire.
///
/// Only updated fields are included.
pub fn payload_to_document(payload: &PatchPayload) -> Value {
    let map: Map<String, Value> = payload
        .iter()
        .filter_map(|(field, patch)| patch.as_updated().map(|v| (field.clone(), v.clone())))
        .collect();
    Value::Object(map)
}
