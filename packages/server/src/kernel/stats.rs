//! Per-sync counters (spec §3 "Stats").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `{created, updated, skipped, deleted, errors}` counters plus an optional
/// mapping of sub-entity names to nested `Stats`, for jobs that populate
/// multiple collections from one fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub errors: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sub_entities: HashMap<String, Stats>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero out all counters in place, keeping sub-entity keys (but zeroing
    /// their values too), matching the per-`Sync`-invocation reset described
    /// in spec §3's lifecycle note.
    pub fn reset(&mut self) {
        self.created = 0;
        self.updated = 0;
        self.skipped = 0;
        self.deleted = 0;
        self.errors = 0;
        for sub in self.sub_entities.values_mut() {
            sub.reset();
        }
    }

    pub fn sub_entity_mut(&mut self, name: &str) -> &mut Stats {
        self.sub_entities.entry(name.to_string()).or_default()
    }

    pub fn total_processed(&self) -> u64 {
        self.created + self.updated + self.skipped + self.errors
    }
}
