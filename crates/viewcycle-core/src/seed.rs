#![forbid(unsafe_code)]

//! Seed store for warm-start hydration.
//!
//! A seed is a result computed during an earlier pass (typically
//! server-side) planted for reuse: when a slot's first cycle is created, the
//! registry asks the store for a match and, if one exists, the cycle starts
//! directly in `Resolved` without running the body. Entries are consumed on
//! first match — a seed never satisfies two instances.
//!
//! Matching: candidates must share the body identity; among those, the entry
//! whose stored props agree with the most query-prop values wins, ties going
//! to the earliest-planted entry. Any identity match qualifies, even with
//! zero agreeing keys.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{SeedError, SeedResult};
use crate::props::{BodyId, Props};

/// One precomputed result available for reuse.
#[derive(Clone, Debug)]
pub struct Seed<T> {
    /// Identity of the body that produced the result.
    pub identity: BodyId,
    /// Props the result was computed for.
    pub props: Props,
    /// The precomputed result.
    pub result: T,
}

impl<T> Seed<T> {
    /// Create a seed record.
    #[must_use]
    pub fn new(identity: impl Into<BodyId>, props: Props, result: T) -> Self {
        Self {
            identity: identity.into(),
            props,
            result,
        }
    }
}

/// Pool of planted seeds, ordered by planting.
#[derive(Debug)]
pub struct SeedStore<T> {
    entries: Vec<Seed<T>>,
}

impl<T> SeedStore<T> {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Replace the pool with a freshly planted collection.
    ///
    /// One hydration pass plants one pool; appending is re-planting a
    /// concatenated collection.
    pub fn plant(&mut self, seeds: Vec<Seed<T>>) {
        trace!(count = seeds.len(), "seed pool planted");
        self.entries = seeds;
    }

    /// Number of unconsumed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return the best match for `identity`/`props`, if any.
    ///
    /// Scoring counts query-prop keys whose value equals the stored entry's;
    /// the highest score wins, ties broken by earliest planting.
    pub fn take(&mut self, identity: &BodyId, props: &Props) -> Option<T> {
        let mut best: Option<(usize, usize)> = None;
        for (index, seed) in self.entries.iter().enumerate() {
            if seed.identity != *identity {
                continue;
            }
            let score = props.matching_keys(&seed.props);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((index, score));
            }
        }
        best.map(|(index, score)| {
            debug!(%identity, score, remaining = self.entries.len() - 1, "seed consumed");
            self.entries.remove(index).result
        })
    }
}

impl<T: DeserializeOwned> SeedStore<T> {
    /// Validate and plant a collection in the interchange format: an array
    /// of objects each carrying a string `identity`, an object `props`, and
    /// a `result` deserializable to the output type.
    ///
    /// Fails synchronously with a [`SeedError`] on any malformed record;
    /// nothing is planted on failure.
    pub fn plant_records(&mut self, records: &Value) -> SeedResult<usize> {
        let list = records.as_array().ok_or(SeedError::NotACollection)?;
        let mut seeds = Vec::with_capacity(list.len());
        for (index, record) in list.iter().enumerate() {
            let malformed = |reason: &str| SeedError::MalformedEntry {
                index,
                reason: reason.into(),
            };
            let object = record
                .as_object()
                .ok_or_else(|| malformed("record is not an object"))?;
            let identity = object
                .get("identity")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing string `identity`"))?;
            let props = object
                .get("props")
                .and_then(Value::as_object)
                .ok_or_else(|| malformed("missing object `props`"))?;
            let result = object
                .get("result")
                .ok_or_else(|| malformed("missing `result`"))?;
            let result: T =
                serde_json::from_value(result.clone()).map_err(|err| SeedError::MalformedEntry {
                    index,
                    reason: format!("result does not deserialize: {err}"),
                })?;
            seeds.push(Seed {
                identity: BodyId::new(identity),
                props: Props::from(props.clone()),
                result,
            });
        }
        let count = seeds.len();
        self.plant(seeds);
        Ok(count)
    }
}

impl<T> Default for SeedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(entries: Vec<(&str, Props, &str)>) -> SeedStore<String> {
        let mut store = SeedStore::new();
        store.plant(
            entries
                .into_iter()
                .map(|(id, props, result)| Seed {
                    identity: BodyId::new(id),
                    props,
                    result: result.to_string(),
                })
                .collect(),
        );
        store
    }

    #[test]
    fn take_consumes_at_most_once() {
        let mut store = store_with(vec![("f", Props::new().with("a", 1), "R")]);

        let query = Props::new().with("a", 1).with("b", 2);
        assert_eq!(store.take(&BodyId::new("f"), &query), Some("R".into()));
        assert_eq!(store.take(&BodyId::new("f"), &Props::new().with("a", 1)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn identity_must_match() {
        let mut store = store_with(vec![("f", Props::new().with("a", 1), "R")]);
        assert_eq!(store.take(&BodyId::new("g"), &Props::new().with("a", 1)), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn highest_score_wins() {
        let mut store = store_with(vec![
            ("f", Props::new().with("a", 1), "one"),
            ("f", Props::new().with("a", 1).with("b", 2), "two"),
        ]);
        let query = Props::new().with("a", 1).with("b", 2);
        assert_eq!(store.take(&BodyId::new("f"), &query), Some("two".into()));
    }

    #[test]
    fn ties_break_to_earliest_planted() {
        let mut store = store_with(vec![
            ("f", Props::new().with("a", 1), "early"),
            ("f", Props::new().with("a", 1), "late"),
        ]);
        let query = Props::new().with("a", 1);
        assert_eq!(store.take(&BodyId::new("f"), &query), Some("early".into()));
        assert_eq!(store.take(&BodyId::new("f"), &query), Some("late".into()));
    }

    #[test]
    fn zero_score_still_qualifies() {
        let mut store = store_with(vec![("f", Props::new(), "R")]);
        assert_eq!(store.take(&BodyId::new("f"), &Props::new()), Some("R".into()));
    }

    #[test]
    fn plant_replaces_pool() {
        let mut store = store_with(vec![("f", Props::new(), "old")]);
        store.plant(vec![Seed {
            identity: BodyId::new("f"),
            props: Props::new(),
            result: "new".to_string(),
        }]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&BodyId::new("f"), &Props::new()), Some("new".into()));
    }

    #[test]
    fn plant_records_accepts_well_formed_collections() {
        let mut store: SeedStore<String> = SeedStore::new();
        let planted = store
            .plant_records(&json!([
                {"identity": "f", "props": {"a": 1}, "result": "R"},
                {"identity": "g", "props": {}, "result": "S"},
            ]))
            .unwrap();
        assert_eq!(planted, 2);
        assert_eq!(
            store.take(&BodyId::new("f"), &Props::new().with("a", 1)),
            Some("R".into())
        );
    }

    #[test]
    fn plant_records_rejects_malformed_input() {
        let mut store: SeedStore<String> = SeedStore::new();

        assert!(matches!(
            store.plant_records(&json!({"identity": "f"})),
            Err(SeedError::NotACollection)
        ));
        assert!(matches!(
            store.plant_records(&json!([42])),
            Err(SeedError::MalformedEntry { index: 0, .. })
        ));
        assert!(matches!(
            store.plant_records(&json!([
                {"identity": "f", "props": {}, "result": "ok"},
                {"identity": "g", "props": {}},
            ])),
            Err(SeedError::MalformedEntry { index: 1, .. })
        ));
        assert!(matches!(
            store.plant_records(&json!([{"identity": "f", "props": {}, "result": 42}])),
            Err(SeedError::MalformedEntry { index: 0, .. })
        ));
        // Nothing planted on failure.
        assert!(store.is_empty());
    }
}
