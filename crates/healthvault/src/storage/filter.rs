//! Advisory metadata filters for queries.
//!
//! A filter only excludes a record when the record's metadata positively
//! contradicts it. Missing or unparseable metadata never hides a record.

use crate::storage::record::{Metadata, TIMESTAMP_KEY};
use crate::time::rfc3339_to_micros;

/// Restrictions applied to query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Inclusive lower bound, microseconds since Unix epoch.
    pub since: Option<u64>,
    /// Inclusive upper bound, microseconds since Unix epoch.
    pub until: Option<u64>,
    /// Exact-match metadata requirements.
    pub equals: Metadata,
}

impl QueryFilter {
    /// A filter that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(mut self, micros: u64) -> Self {
        self.since = Some(micros);
        self
    }

    pub fn until(mut self, micros: u64) -> Self {
        self.until = Some(micros);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    /// Whether a record with `metadata` passes.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        if self.since.is_some() || self.until.is_some() {
            if let Some(ts) = metadata.get(TIMESTAMP_KEY).and_then(|s| rfc3339_to_micros(s)) {
                if self.since.is_some_and(|since| ts < since) {
                    return false;
                }
                if self.until.is_some_and(|until| ts > until) {
                    return false;
                }
            }
        }
        self.equals
            .iter()
            .all(|(k, want)| metadata.get(k).map_or(true, |have| have == want))
    }
}
