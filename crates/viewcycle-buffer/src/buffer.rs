#![forbid(unsafe_code)]

//! Optimistic local edits over an upstream record.
//!
//! An [`EditBuffer`] holds an upstream base object plus a set of key-level
//! local edits. `current()` is the merged view; `rebase()` absorbs a new
//! upstream base while edits are pending, consulting an optional three-way
//! resolver. The default resolution is key-level: edited keys keep the
//! local value, untouched keys take the new upstream value.

use std::fmt;

use serde_json::{Map, Value};
use tracing::trace;

/// Three-way resolver: `(base, ours, theirs) -> merged`.
///
/// `base` is the upstream object both sides diverged from, `ours` the
/// locally edited view, `theirs` the new upstream object.
pub type MergeFn = Box<dyn Fn(&Value, &Value, &Value) -> Value + Send>;

/// A JSON object with pending key-level edits.
pub struct EditBuffer {
    base: Value,
    edits: Map<String, Value>,
    merge: Option<MergeFn>,
}

impl EditBuffer {
    /// Wrap an upstream object. Non-object bases are legal but only whole
    /// keys of an object base participate in merging.
    #[must_use]
    pub fn new(base: Value) -> Self {
        Self {
            base,
            edits: Map::new(),
            merge: None,
        }
    }

    /// Attach a three-way resolver consulted by [`EditBuffer::rebase`]
    /// while local edits are pending.
    #[must_use]
    pub fn with_merge(mut self, merge: impl Fn(&Value, &Value, &Value) -> Value + Send + 'static) -> Self {
        self.merge = Some(Box::new(merge));
        self
    }

    /// The upstream base.
    #[must_use]
    pub fn base(&self) -> &Value {
        &self.base
    }

    /// The merged view: the base with local edits overlaid.
    #[must_use]
    pub fn current(&self) -> Value {
        if self.edits.is_empty() {
            return self.base.clone();
        }
        let mut merged = match &self.base {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for (key, value) in &self.edits {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }

    /// Whether any local edit differs from the base.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.edits
            .iter()
            .any(|(key, value)| self.base.get(key) != Some(value))
    }

    /// Apply key-level edits from a partial object. Non-object arguments
    /// are ignored.
    pub fn assign(&mut self, partial: Value) {
        let Value::Object(partial) = partial else {
            return;
        };
        trace!(keys = partial.len(), "edits assigned");
        for (key, value) in partial {
            self.edits.insert(key, value);
        }
    }

    /// Absorb a new upstream base.
    ///
    /// With no pending edits the buffer just tracks upstream. With pending
    /// edits, the attached resolver (if any) produces the merged view and
    /// the buffer keeps, as edits, exactly the keys where that view differs
    /// from the new base; without a resolver, edited keys keep the local
    /// value and untouched keys take upstream's.
    pub fn rebase(&mut self, new_base: Value) {
        if self.changed() {
            if let Some(merge) = &self.merge {
                let ours = self.current();
                let merged = merge(&self.base, &ours, &new_base);
                self.edits = diff_keys(&new_base, &merged);
            }
            // Default key-level resolution: the edit set already expresses
            // "ours for edited keys, theirs elsewhere".
        } else {
            self.edits.clear();
        }
        self.base = new_base;
    }

    /// Discard all local edits.
    pub fn reset(&mut self) {
        self.edits.clear();
    }
}

impl fmt::Debug for EditBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditBuffer")
            .field("base", &self.base)
            .field("edits", &self.edits)
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

/// Keys of `merged` whose value differs from (or is absent in) `base`.
fn diff_keys(base: &Value, merged: &Value) -> Map<String, Value> {
    let Value::Object(merged) = merged else {
        return Map::new();
    };
    merged
        .iter()
        .filter(|(key, value)| base.get(key.as_str()) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
