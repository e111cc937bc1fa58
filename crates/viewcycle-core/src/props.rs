#![forbid(unsafe_code)]

//! Body identity and prop snapshots.
//!
//! A [`BodyId`] names the async body bound to a view instance; the registry
//! compares it (together with the [`Props`] snapshot) to decide whether an
//! invocation continues the current cycle or starts a new render generation.
//! Props are JSON-valued records so that value equality, per-key diffing, and
//! the seed interchange format all share one representation.

use std::fmt;
use std::sync::Arc;

use serde::de::{Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of an async body.
///
/// Cheap to clone; compared by name. Two view instances rendering the same
/// body share a `BodyId` but never a cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BodyId(Arc<str>);

impl BodyId {
    /// Create an identity from a body name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The body name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BodyId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Serialize for BodyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BodyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = BodyId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a body identity string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<BodyId, E> {
                Ok(BodyId::new(v))
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

/// Immutable snapshot of the inputs for one render attempt.
///
/// A JSON-valued `key → value` map compared by value equality. The registry
/// treats any difference as a new render generation; the seed store scores
/// candidates by [`Props::matching_keys`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Props {
    entries: Map<String, Value>,
}

impl Props {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Count the keys of `self` whose value equals the value stored under
    /// the same key in `other`.
    ///
    /// This is the seed-matching score: the query props are `self`, the
    /// candidate's stored props are `other`.
    #[must_use]
    pub fn matching_keys(&self, other: &Props) -> usize {
        self.entries
            .iter()
            .filter(|(key, value)| other.entries.get(*key) == Some(value))
            .count()
    }

    /// Keys whose value differs from (or is absent in) `other`.
    #[must_use]
    pub fn changed_keys(&self, other: &Props) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, value)| other.entries.get(*key) != Some(value))
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

impl From<Map<String, Value>> for Props {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, Value)> for Props {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
